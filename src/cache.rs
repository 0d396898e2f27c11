//! Process-wide instance cache kept current by registry watch events.
//!
//! The cache is a two-level map, service name → instance address → load
//! score. It is a cache, not a source of truth: the registry is
//! authoritative, and the cache may be transiently stale or absent for a
//! service that has never been queried.
//!
//! The outer map lives behind an [`ArcSwap`] so that whole-cache
//! invalidation and rebuild publish a complete replacement in a single
//! atomic store; readers see the old view or the new one, never a
//! half-cleared intermediate. Watch deltas mutate the currently-published
//! inner maps directly, with per-key last-write-wins semantics against a
//! concurrent snapshot fetch.

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::registry::{self, RegistryClient, RegistryError, RegistryEvent};

type ServiceMap = DashMap<String, Arc<DashMap<String, i64>>>;

/// Registry-backed cache of live service instances and their load scores.
///
/// Created once at process start and shared for the process lifetime; it
/// has no explicit shutdown, only clear/rebuild cycles driven by
/// connectivity events.
pub struct InstanceCache {
    registry: Arc<dyn RegistryClient>,
    root: String,
    op_timeout: Duration,
    services: ArcSwap<ServiceMap>,
    watching: AtomicBool,
}

impl InstanceCache {
    /// Creates an empty cache over the given registry client.
    #[must_use]
    pub fn new(registry: Arc<dyn RegistryClient>, config: &RegistryConfig) -> Self {
        Self {
            registry,
            root: config.root_path.trim_end_matches('/').to_owned(),
            op_timeout: config.op_timeout,
            services: ArcSwap::from_pointee(DashMap::new()),
            watching: AtomicBool::new(false),
        }
    }

    /// Returns the current view of a service's instances, ordered by
    /// address.
    ///
    /// A service with no cached entries is populated synchronously from the
    /// registry and the result stored (when non-empty) before returning.
    /// Registry failures are logged and degrade to an empty map, so an
    /// empty result means "no instance currently known", which callers must
    /// treat as possibly-unavailable rather than nonexistent.
    pub async fn discover(&self, service: &str) -> BTreeMap<String, i64> {
        let services = self.services.load_full();

        if let Some(instances) = services.get(service) {
            if !instances.is_empty() {
                return snapshot(&instances);
            }
        }

        let fresh = self.populate(service).await;
        if !fresh.is_empty() {
            services.insert(
                service.to_owned(),
                Arc::new(fresh.iter().map(|(a, s)| (a.clone(), *s)).collect()),
            );
        }
        fresh
    }

    /// Fetches a fresh listing of a service's instances from the registry.
    ///
    /// Does not touch the shared cache; the caller decides whether to store
    /// the result. Entries whose payload fails to parse are skipped
    /// individually, and registry failures degrade to an empty map.
    pub async fn populate(&self, service: &str) -> BTreeMap<String, i64> {
        let service_path = registry::join_path(&self.root, service);

        let children = match self.list_timed(&service_path).await {
            Ok(children) => children,
            Err(err) => {
                warn!(service = %service, error = %err, "Registry listing failed; treating as zero instances");
                return BTreeMap::new();
            }
        };

        let mut instances = BTreeMap::new();
        for child in children {
            let node_path = registry::join_path(&service_path, &child);
            let data = match self.get_timed(&node_path).await {
                Ok(data) => data,
                Err(err) => {
                    warn!(path = %node_path, error = %err, "Registry read failed; skipping entry");
                    continue;
                }
            };
            match registry::parse_score(&node_path, &data) {
                Ok(score) => {
                    instances.insert(child, score);
                }
                Err(err) => warn!(error = %err, "Skipping malformed registry entry"),
            }
        }
        instances
    }

    /// Rebuilds the entire cache from a fresh registry listing and
    /// publishes it atomically.
    ///
    /// Used at startup and on reconnection; a full rebuild converges
    /// regardless of how many watch events were missed while disconnected.
    /// Services with no readable instances are left out of the rebuilt map.
    pub async fn initialize_all(&self) {
        let fresh: ServiceMap = DashMap::new();

        let names = match self.list_timed(&self.root).await {
            Ok(names) => names,
            Err(err) => {
                warn!(error = %err, "Registry root listing failed; publishing empty cache");
                Vec::new()
            }
        };

        for name in names {
            let instances = self.populate(&name).await;
            if !instances.is_empty() {
                fresh.insert(name, Arc::new(instances.into_iter().collect()));
            }
        }

        let count = fresh.len();
        self.services.store(Arc::new(fresh));
        info!(services = count, "Instance cache rebuilt");
    }

    /// Atomically replaces the cache with an empty one.
    ///
    /// Used on connection loss: partial staleness after a lost connection
    /// cannot be distinguished from correct data, so everything goes.
    /// Idempotent.
    pub fn invalidate_all(&self) {
        self.services.store(Arc::new(DashMap::new()));
        info!("Instance cache invalidated");
    }

    /// Registers one watch per currently-known service and spawns a task
    /// per watch to apply incoming events.
    ///
    /// Safe to call repeatedly; only the first call registers watchers.
    /// The watch set is fixed at registration time: services created later
    /// are reachable through [`discover`](Self::discover)'s lazy populate
    /// but not watch-updated until the next reconnect cycle.
    pub async fn start_watching(self: Arc<Self>) {
        if self.watching.swap(true, Ordering::SeqCst) {
            debug!("Instance watchers already running");
            return;
        }

        let names = match self.list_timed(&self.root).await {
            Ok(names) => names,
            Err(err) => {
                warn!(error = %err, "Registry root listing failed; no watchers registered");
                Vec::new()
            }
        };

        for service in names {
            let path = registry::join_path(&self.root, &service);
            let mut events = self.registry.watch_children(&path);
            let cache = Arc::clone(&self);

            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(event) => cache.apply_event(&service, event).await,
                        Err(RecvError::Lagged(missed)) => {
                            warn!(
                                service = %service,
                                missed,
                                "Watch events dropped; cache may be stale until next rebuild"
                            );
                        }
                        Err(RecvError::Closed) => {
                            debug!(service = %service, "Watch channel closed");
                            break;
                        }
                    }
                }
            });
        }
    }

    /// Applies a single watch event for a service.
    ///
    /// Malformed events (empty or wrong-depth path, missing payload,
    /// non-integer payload) are discarded without mutating state: the
    /// watch transport can legitimately deliver data-less events for
    /// non-data nodes.
    async fn apply_event(&self, service: &str, event: RegistryEvent) {
        match event {
            RegistryEvent::ChildAdded { path, data }
            | RegistryEvent::ChildUpdated { path, data } => {
                let Some(address) = registry::instance_address(&self.root, &path) else {
                    debug!(service, path = %path, "Discarding child event with malformed path");
                    return;
                };
                let Some(data) = data else {
                    debug!(service, path = %path, "Discarding data-less child event");
                    return;
                };
                let score = match registry::parse_score(&path, &data) {
                    Ok(score) => score,
                    Err(err) => {
                        warn!(error = %err, "Discarding malformed child event");
                        return;
                    }
                };

                self.services
                    .load()
                    .entry(service.to_owned())
                    .or_insert_with(|| Arc::new(DashMap::new()))
                    .insert(address.to_owned(), score);
                debug!(service, address, score, "Instance entry applied");
            }
            RegistryEvent::ChildRemoved { path } => {
                let Some(address) = registry::instance_address(&self.root, &path) else {
                    debug!(service, path = %path, "Discarding removal event with malformed path");
                    return;
                };
                if let Some(instances) = self.services.load().get(service) {
                    instances.remove(address);
                }
                debug!(service, address, "Instance entry removed");
            }
            RegistryEvent::ConnectionLost => {
                warn!("Registry connection lost; invalidating instance cache");
                self.invalidate_all();
            }
            RegistryEvent::ConnectionSuspended => {
                // Stale-but-serving: reads keep returning last-known data.
                warn!("Registry connection suspended; serving possibly stale instances");
            }
            RegistryEvent::Reconnected => {
                info!("Registry connection re-established; rebuilding instance cache");
                self.initialize_all().await;
            }
        }
    }

    async fn list_timed(&self, path: &str) -> registry::Result<Vec<String>> {
        match tokio::time::timeout(self.op_timeout, self.registry.list_children(path)).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::Timeout(self.op_timeout)),
        }
    }

    async fn get_timed(&self, path: &str) -> registry::Result<String> {
        match tokio::time::timeout(self.op_timeout, self.registry.get_data(path)).await {
            Ok(result) => result,
            Err(_) => Err(RegistryError::Timeout(self.op_timeout)),
        }
    }
}

impl std::fmt::Debug for InstanceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCache")
            .field("root", &self.root)
            .field("services", &self.services.load().len())
            .finish()
    }
}

fn snapshot(instances: &DashMap<String, i64>) -> BTreeMap<String, i64> {
    instances
        .iter()
        .map(|entry| (entry.key().clone(), *entry.value()))
        .collect()
}
