//! Client-side dispatch layer for registry-backed RPC.
//!
//! This crate resolves which remote instance should handle a method call
//! and hands the call to a transport executor. It is responsible for:
//!
//! - **Instance caching**: a process-wide view of live instances per
//!   service, kept eventually consistent with a coordination service via
//!   watch events, with full invalidation on connection loss and a full
//!   rebuild on reconnect
//! - **Load balancing**: pluggable selection strategies over the cached
//!   view, defaulting to deterministic minimum-load selection
//! - **Request routing**: an explicit route table mapping method identities
//!   to (service, path, verb, strategy), consulted per dispatch
//!
//! # Architecture
//!
//! A call flows `Dispatcher` → `StrategyRegistry` → `BalanceStrategy` →
//! `InstanceCache` → `RequestExecutor`. The cache reads the registry only
//! on a miss or a rebuild; the common dispatch path is in-memory. Watch
//! events arrive on their own tasks and mutate the cache concurrently with
//! callers; whole-cache clear/rebuild is published atomically so readers
//! never observe a partial view.
//!
//! The coordination service and the wire transport stay behind the
//! [`RegistryClient`] and [`RequestExecutor`] traits; this crate ships only
//! an in-memory registry for tests and single-node runs.
//!
//! # Example
//!
//! ```ignore
//! use parallax_rpc::{
//!     DispatchConfig, Dispatcher, InstanceCache, RouteMetadata, RouteTable,
//!     StrategyRegistry, Verb,
//! };
//!
//! let config = DispatchConfig::default();
//! let cache = Arc::new(InstanceCache::new(registry_client, &config.registry));
//! cache.initialize_all().await;
//! Arc::clone(&cache).start_watching().await;
//!
//! let mut routes = RouteTable::new();
//! routes.insert("Billing.charge", RouteMetadata::new("billing", "/billing/charge", Verb::Post));
//!
//! let strategies = StrategyRegistry::from_config(&config.balance, cache);
//! let dispatcher = Dispatcher::new(routes, strategies, executor);
//! let result = dispatcher.dispatch("Billing.charge", args).await?;
//! ```

pub mod balance;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod registry;

// Re-export main types
pub use balance::{BalanceStrategy, LeastLoaded, RoundRobin, StrategyRegistry};
pub use cache::InstanceCache;
pub use config::{BalanceConfig, DispatchConfig, RegistryConfig, StrategyKind};
pub use dispatch::{CallRequest, Dispatcher, RequestExecutor, RouteMetadata, RouteTable, Verb};
pub use error::{DispatchError, Result};
pub use registry::{MemoryRegistry, RegistryClient, RegistryError, RegistryEvent};
