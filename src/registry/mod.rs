//! Abstract registry interface for service discovery.
//!
//! The coordination service (a ZooKeeper-like hierarchical store) is
//! consumed only through the [`RegistryClient`] trait: child listing, node
//! reads, and persistent child watches delivered as [`RegistryEvent`]s.
//! Node layout is `{root}/{service}/{instance}`, where each instance node
//! holds its load score as a decimal string.

mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

pub use memory::MemoryRegistry;

/// Errors that can occur during registry operations.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The requested node does not exist.
    #[error("registry node not found: {0}")]
    NotFound(String),

    /// The backend failed to serve the request.
    #[error("registry read failed: {0}")]
    Read(String),

    /// A registry call exceeded the configured timeout.
    #[error("registry operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A node's payload did not parse as an integer load score.
    #[error("malformed registry entry at {path}: {data:?}")]
    Malformed { path: String, data: String },
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// A change notification delivered on a child watch.
///
/// Child events carry the full node path and, when the transport supplies
/// one, the node payload. Data-less child events are legitimate (non-data
/// nodes) and are discarded by consumers rather than treated as errors.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A child node appeared under the watched path.
    ChildAdded {
        /// Full path of the new node.
        path: String,
        /// Node payload, if the transport delivered one.
        data: Option<String>,
    },
    /// A child node's payload changed.
    ChildUpdated {
        /// Full path of the changed node.
        path: String,
        /// Node payload, if the transport delivered one.
        data: Option<String>,
    },
    /// A child node was removed.
    ChildRemoved {
        /// Full path of the removed node.
        path: String,
    },
    /// Connectivity to the registry was lost.
    ConnectionLost,
    /// Connectivity is suspended; the session may still recover.
    ConnectionSuspended,
    /// Connectivity was re-established after a loss or suspension.
    Reconnected,
}

/// Client interface to the coordination service.
///
/// Implementations own connection lifecycle and session management; this
/// crate only lists, reads, and watches.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Lists the names of the children under a path.
    async fn list_children(&self, path: &str) -> Result<Vec<String>>;

    /// Reads a node's payload.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the node is missing or
    /// [`RegistryError::Read`] if it cannot be read.
    async fn get_data(&self, path: &str) -> Result<String>;

    /// Registers a persistent watch on the children of a path.
    ///
    /// Events for the watched path, including connection-state changes, are
    /// delivered on the returned receiver in the order the registry
    /// observed them.
    fn watch_children(&self, path: &str) -> broadcast::Receiver<RegistryEvent>;
}

/// Joins a registry path with a child name.
pub fn join_path(base: &str, child: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), child)
}

/// Extracts the instance address from a full node path.
///
/// Expects exactly `{root}/{service}/{instance}`; returns `None` for empty
/// paths, paths outside the root, or paths at the wrong depth. Watch
/// transports can deliver events for intermediate nodes, so depth is
/// validated rather than assumed.
pub fn instance_address<'a>(root: &str, path: &'a str) -> Option<&'a str> {
    let rest = path.strip_prefix(root.trim_end_matches('/'))?;
    let mut segments = rest.split('/').filter(|s| !s.is_empty());
    let _service = segments.next()?;
    let address = segments.next()?;
    if segments.next().is_some() {
        return None;
    }
    Some(address)
}

/// Parses a node payload as an integer load score.
pub fn parse_score(path: &str, data: &str) -> Result<i64> {
    data.trim()
        .parse::<i64>()
        .map_err(|_| RegistryError::Malformed {
            path: path.to_owned(),
            data: data.to_owned(),
        })
}
