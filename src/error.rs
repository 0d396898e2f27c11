//! Error types for the dispatch layer.

use thiserror::Error;

/// Dispatch errors surfaced to callers.
///
/// Registry-access failures never appear here: they are absorbed (and
/// logged) inside the instance cache and degrade to "no instances", so the
/// caller-facing surface stays small.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The invoked method has no route registered.
    #[error("no route configured for method: {0}")]
    RoutingNotConfigured(String),

    /// The load balancer found no eligible instance for the target service.
    #[error("no available instance for service: {0}")]
    NoAvailableInstance(String),

    /// The route names a balance strategy that was never registered.
    #[error("unknown balance strategy: {0}")]
    UnknownStrategy(String),

    /// A transport-level failure from the request executor, passed through
    /// unchanged.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DispatchError {
    /// Wraps an executor failure for pass-through propagation.
    pub fn transport<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(source))
    }
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
