//! In-memory registry for tests and single-node deployments.

use dashmap::DashMap;
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::debug;

use super::{join_path, RegistryClient, RegistryError, RegistryEvent, Result};
use async_trait::async_trait;

const WATCH_CHANNEL_CAPACITY: usize = 64;

/// In-memory registry holding the `{root}/{service}/{instance}` tree.
///
/// Mutators update the tree and broadcast the corresponding watch event, so
/// a cache watching this registry observes the same event stream a real
/// coordination service would deliver. Connection-state events can be
/// injected directly to exercise failure handling.
#[derive(Debug)]
pub struct MemoryRegistry {
    root: String,
    services: DashMap<String, BTreeMap<String, String>>,
    watchers: DashMap<String, broadcast::Sender<RegistryEvent>>,
}

impl MemoryRegistry {
    /// Creates an empty registry rooted at the given path.
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            root: root.trim_end_matches('/').to_owned(),
            services: DashMap::new(),
            watchers: DashMap::new(),
        }
    }

    /// Adds or replaces an instance node and emits a `ChildAdded` event.
    pub fn add_instance(&self, service: &str, address: &str, data: &str) {
        self.services
            .entry(service.to_owned())
            .or_default()
            .insert(address.to_owned(), data.to_owned());

        let path = self.instance_path(service, address);
        self.notify(
            service,
            RegistryEvent::ChildAdded {
                path,
                data: Some(data.to_owned()),
            },
        );
    }

    /// Updates an instance node's payload and emits a `ChildUpdated` event.
    pub fn update_instance(&self, service: &str, address: &str, data: &str) {
        self.services
            .entry(service.to_owned())
            .or_default()
            .insert(address.to_owned(), data.to_owned());

        let path = self.instance_path(service, address);
        self.notify(
            service,
            RegistryEvent::ChildUpdated {
                path,
                data: Some(data.to_owned()),
            },
        );
    }

    /// Removes an instance node and emits a `ChildRemoved` event.
    pub fn remove_instance(&self, service: &str, address: &str) {
        if let Some(mut instances) = self.services.get_mut(service) {
            instances.remove(address);
        }

        let path = self.instance_path(service, address);
        self.notify(service, RegistryEvent::ChildRemoved { path });
    }

    /// Broadcasts a connection-loss event to every watcher.
    pub fn lose_connection(&self) {
        self.notify_all(RegistryEvent::ConnectionLost);
    }

    /// Broadcasts a connection-suspended event to every watcher.
    pub fn suspend_connection(&self) {
        self.notify_all(RegistryEvent::ConnectionSuspended);
    }

    /// Broadcasts a reconnection event to every watcher.
    pub fn reconnect(&self) {
        self.notify_all(RegistryEvent::Reconnected);
    }

    fn service_path(&self, service: &str) -> String {
        join_path(&self.root, service)
    }

    fn instance_path(&self, service: &str, address: &str) -> String {
        join_path(&self.service_path(service), address)
    }

    fn notify(&self, service: &str, event: RegistryEvent) {
        let watch_path = self.service_path(service);
        if let Some(sender) = self.watchers.get(&watch_path) {
            // No receivers is fine; the event is simply dropped.
            let _ = sender.send(event);
        }
    }

    fn notify_all(&self, event: RegistryEvent) {
        for sender in self.watchers.iter() {
            let _ = sender.send(event.clone());
        }
    }

    /// Splits a path into its segments relative to the root.
    fn relative_segments<'a>(&self, path: &'a str) -> Option<Vec<&'a str>> {
        let rest = path.trim_end_matches('/').strip_prefix(&self.root)?;
        Some(rest.split('/').filter(|s| !s.is_empty()).collect())
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let segments = self
            .relative_segments(path)
            .ok_or_else(|| RegistryError::NotFound(path.to_owned()))?;

        match segments.as_slice() {
            [] => Ok(self.services.iter().map(|r| r.key().clone()).collect()),
            [service] => self
                .services
                .get(*service)
                .map(|instances| instances.keys().cloned().collect())
                .ok_or_else(|| RegistryError::NotFound(path.to_owned())),
            _ => Err(RegistryError::NotFound(path.to_owned())),
        }
    }

    async fn get_data(&self, path: &str) -> Result<String> {
        let segments = self
            .relative_segments(path)
            .ok_or_else(|| RegistryError::NotFound(path.to_owned()))?;

        let [service, address] = segments.as_slice() else {
            return Err(RegistryError::NotFound(path.to_owned()));
        };

        self.services
            .get(*service)
            .and_then(|instances| instances.get(*address).cloned())
            .ok_or_else(|| RegistryError::NotFound(path.to_owned()))
    }

    fn watch_children(&self, path: &str) -> broadcast::Receiver<RegistryEvent> {
        debug!(path = %path, "Watch registered");
        self.watchers
            .entry(path.trim_end_matches('/').to_owned())
            .or_insert_with(|| broadcast::channel(WATCH_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_root_returns_service_names() {
        let registry = MemoryRegistry::new("/services");
        registry.add_instance("billing", "a", "1");
        registry.add_instance("ledger", "b", "2");

        let mut names = registry.list_children("/services").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["billing", "ledger"]);
    }

    #[tokio::test]
    async fn list_service_returns_addresses() {
        let registry = MemoryRegistry::new("/services");
        registry.add_instance("billing", "10.0.0.1:80", "1");
        registry.add_instance("billing", "10.0.0.2:80", "2");

        let addrs = registry.list_children("/services/billing").await.unwrap();
        assert_eq!(addrs, vec!["10.0.0.1:80", "10.0.0.2:80"]);
    }

    #[tokio::test]
    async fn missing_nodes_return_not_found() {
        let registry = MemoryRegistry::new("/services");

        let result = registry.list_children("/services/ghost").await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));

        let result = registry.get_data("/services/ghost/a").await;
        assert!(matches!(result, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test]
    async fn get_data_reads_payload() {
        let registry = MemoryRegistry::new("/services");
        registry.add_instance("billing", "a", "7");

        let data = registry.get_data("/services/billing/a").await.unwrap();
        assert_eq!(data, "7");
    }

    #[tokio::test]
    async fn mutators_emit_watch_events() {
        let registry = MemoryRegistry::new("/services");
        let mut rx = registry.watch_children("/services/billing");

        registry.add_instance("billing", "a", "5");
        registry.remove_instance("billing", "a");

        let added = rx.recv().await.unwrap();
        assert!(matches!(
            added,
            RegistryEvent::ChildAdded { ref path, ref data }
                if path == "/services/billing/a" && data.as_deref() == Some("5")
        ));

        let removed = rx.recv().await.unwrap();
        assert!(matches!(
            removed,
            RegistryEvent::ChildRemoved { ref path } if path == "/services/billing/a"
        ));
    }

    #[tokio::test]
    async fn connection_events_reach_all_watchers() {
        let registry = MemoryRegistry::new("/services");
        registry.add_instance("billing", "a", "1");
        registry.add_instance("ledger", "b", "2");

        let mut rx_billing = registry.watch_children("/services/billing");
        let mut rx_ledger = registry.watch_children("/services/ledger");

        registry.lose_connection();
        registry.suspend_connection();
        registry.reconnect();

        for rx in [&mut rx_billing, &mut rx_ledger] {
            assert!(matches!(
                rx.recv().await.unwrap(),
                RegistryEvent::ConnectionLost
            ));
            assert!(matches!(
                rx.recv().await.unwrap(),
                RegistryEvent::ConnectionSuspended
            ));
            assert!(matches!(
                rx.recv().await.unwrap(),
                RegistryEvent::Reconnected
            ));
        }
    }
}
