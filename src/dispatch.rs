//! Request routing: method identity → (service, instance, transport).
//!
//! Routes live in an explicit [`RouteTable`] built once at startup, and the
//! [`Dispatcher`] performs a lookup per call. The actual remote call is the
//! [`RequestExecutor`]'s job; this layer only decides where it goes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::balance::StrategyRegistry;
use crate::error::{DispatchError, Result};

/// HTTP-style verb for a routed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

/// Static routing metadata for one callable method.
#[derive(Debug, Clone)]
pub struct RouteMetadata {
    /// Logical service the call targets.
    pub service: String,
    /// Target path template.
    pub path: String,
    /// Accepted verbs; the first is authoritative for outgoing requests.
    pub verbs: Vec<Verb>,
    /// Named balance strategy; `None` selects the configured default.
    pub strategy: Option<String>,
}

impl RouteMetadata {
    /// Creates a route with a single verb and the default strategy.
    #[must_use]
    pub fn new(service: impl Into<String>, path: impl Into<String>, verb: Verb) -> Self {
        Self {
            service: service.into(),
            path: path.into(),
            verbs: vec![verb],
            strategy: None,
        }
    }

    /// Names the balance strategy for this route.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Returns the authoritative verb (the first of the list).
    ///
    /// A route with an emptied verb list falls back to `Get`.
    #[must_use]
    pub fn verb(&self) -> Verb {
        self.verbs.first().copied().unwrap_or(Verb::Get)
    }
}

/// Method identity → routing metadata, built once at startup.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<String, RouteMetadata>,
}

impl RouteTable {
    /// Creates an empty route table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Registers a route for a method identity, replacing any previous one.
    pub fn insert(&mut self, method: impl Into<String>, route: RouteMetadata) {
        self.routes.insert(method.into(), route);
    }

    /// Looks up the route for a method identity.
    #[must_use]
    pub fn get(&self, method: &str) -> Option<&RouteMetadata> {
        self.routes.get(method)
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Transport-agnostic request descriptor for one invocation.
///
/// Owned by the dispatcher for the duration of one call and handed to the
/// executor; never shared across calls.
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// Verb for the outgoing request.
    pub verb: Verb,
    /// Target path.
    pub path: String,
    /// Method identity, for return-type marshalling and parameter mapping.
    pub method: String,
    /// Positional argument values.
    pub arguments: Vec<Value>,
}

/// Performs the actual remote call.
///
/// Opaque to this layer: serialization, wire protocol, and connection
/// handling all live behind this seam.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Executes the request against the resolved instance.
    ///
    /// # Errors
    ///
    /// Transport-level failures are propagated to the dispatch caller
    /// unchanged; this layer adds no retry semantics.
    async fn execute(&self, request: CallRequest, instance: &str) -> Result<Value>;
}

/// Resolves a call's route, picks an instance, and forwards the request.
pub struct Dispatcher {
    routes: RouteTable,
    strategies: StrategyRegistry,
    executor: Arc<dyn RequestExecutor>,
}

impl Dispatcher {
    /// Creates a dispatcher over a route table, strategy registry, and
    /// executor.
    #[must_use]
    pub fn new(
        routes: RouteTable,
        strategies: StrategyRegistry,
        executor: Arc<dyn RequestExecutor>,
    ) -> Self {
        Self {
            routes,
            strategies,
            executor,
        }
    }

    /// Dispatches a method invocation.
    ///
    /// Resolves the route (failing fast with no network activity when none
    /// is registered), builds the request, selects an instance through the
    /// route's strategy, and forwards to the executor. The only cache side
    /// effect is a possible lazy population the first time a service is
    /// queried.
    ///
    /// # Errors
    ///
    /// [`DispatchError::RoutingNotConfigured`] for an unrouted method,
    /// [`DispatchError::UnknownStrategy`] for an unregistered strategy name,
    /// [`DispatchError::NoAvailableInstance`] when selection yields nothing,
    /// and executor failures passed through unchanged.
    pub async fn dispatch(&self, method: &str, arguments: Vec<Value>) -> Result<Value> {
        let route = self
            .routes
            .get(method)
            .ok_or_else(|| DispatchError::RoutingNotConfigured(method.to_owned()))?;

        let request = CallRequest {
            verb: route.verb(),
            path: route.path.clone(),
            method: method.to_owned(),
            arguments,
        };

        let strategy = self.strategies.resolve(route.strategy.as_deref())?;
        let instance = strategy
            .select(&route.service)
            .await
            .ok_or_else(|| DispatchError::NoAvailableInstance(route.service.clone()))?;

        debug!(
            method,
            service = %route.service,
            instance = %instance,
            strategy = strategy.name(),
            "Dispatching call"
        );
        self.executor.execute(request, &instance).await
    }

    /// Returns the route table.
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.routes.len())
            .field("strategies", &self.strategies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::StrategyRegistry;
    use crate::cache::InstanceCache;
    use crate::config::{BalanceConfig, RegistryConfig};
    use crate::registry::MemoryRegistry;
    use serde_json::json;
    use std::sync::Mutex;

    /// Executor stub that records every call.
    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<(CallRequest, String)>>,
    }

    #[async_trait]
    impl RequestExecutor for RecordingExecutor {
        async fn execute(&self, request: CallRequest, instance: &str) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((request, instance.to_owned()));
            Ok(json!({"ok": true}))
        }
    }

    /// Executor stub that always fails at the transport level.
    struct FailingExecutor;

    #[async_trait]
    impl RequestExecutor for FailingExecutor {
        async fn execute(&self, _request: CallRequest, _instance: &str) -> Result<Value> {
            Err(DispatchError::transport(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))
        }
    }

    fn make_dispatcher(
        registry: Arc<MemoryRegistry>,
        routes: RouteTable,
        executor: Arc<dyn RequestExecutor>,
    ) -> Dispatcher {
        let cache = Arc::new(InstanceCache::new(registry, &RegistryConfig::default()));
        let strategies = StrategyRegistry::from_config(&BalanceConfig::default(), cache);
        Dispatcher::new(routes, strategies, executor)
    }

    #[tokio::test]
    async fn unrouted_method_fails_without_any_call() {
        let registry = Arc::new(MemoryRegistry::new("/services"));
        let executor = Arc::new(RecordingExecutor::default());
        let dispatcher = make_dispatcher(registry, RouteTable::new(), executor.clone());

        let result = dispatcher.dispatch("Billing.charge", vec![]).await;
        assert!(matches!(
            result,
            Err(DispatchError::RoutingNotConfigured(_))
        ));
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatch_forwards_request_and_instance() {
        let registry = Arc::new(MemoryRegistry::new("/services"));
        registry.add_instance("billing", "10.0.0.1:80", "3");
        registry.add_instance("billing", "10.0.0.2:80", "1");

        let mut routes = RouteTable::new();
        routes.insert(
            "Billing.charge",
            RouteMetadata::new("billing", "/billing/charge", Verb::Post),
        );

        let executor = Arc::new(RecordingExecutor::default());
        let dispatcher = make_dispatcher(registry, routes, executor.clone());

        let result = dispatcher
            .dispatch("Billing.charge", vec![json!(42), json!("usd")])
            .await
            .unwrap();
        assert_eq!(result, json!({"ok": true}));

        let calls = executor.calls.lock().unwrap();
        let (request, instance) = &calls[0];
        assert_eq!(request.verb, Verb::Post);
        assert_eq!(request.path, "/billing/charge");
        assert_eq!(request.method, "Billing.charge");
        assert_eq!(request.arguments, vec![json!(42), json!("usd")]);
        // Least-loaded default picks the idler instance.
        assert_eq!(instance, "10.0.0.2:80");
    }

    #[tokio::test]
    async fn no_instance_surfaces_as_call_failure() {
        let registry = Arc::new(MemoryRegistry::new("/services"));

        let mut routes = RouteTable::new();
        routes.insert(
            "Billing.charge",
            RouteMetadata::new("billing", "/billing/charge", Verb::Post),
        );

        let executor = Arc::new(RecordingExecutor::default());
        let dispatcher = make_dispatcher(registry, routes, executor.clone());

        let result = dispatcher.dispatch("Billing.charge", vec![]).await;
        assert!(matches!(
            result,
            Err(DispatchError::NoAvailableInstance(service)) if service == "billing"
        ));
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_strategy_fails_before_executing() {
        let registry = Arc::new(MemoryRegistry::new("/services"));
        registry.add_instance("billing", "a", "1");

        let mut routes = RouteTable::new();
        routes.insert(
            "Billing.charge",
            RouteMetadata::new("billing", "/billing/charge", Verb::Get)
                .with_strategy("weighted_random"),
        );

        let executor = Arc::new(RecordingExecutor::default());
        let dispatcher = make_dispatcher(registry, routes, executor.clone());

        let result = dispatcher.dispatch("Billing.charge", vec![]).await;
        assert!(matches!(result, Err(DispatchError::UnknownStrategy(_))));
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn route_can_name_its_strategy() {
        let registry = Arc::new(MemoryRegistry::new("/services"));
        registry.add_instance("billing", "a", "1");
        registry.add_instance("billing", "b", "9");

        let mut routes = RouteTable::new();
        routes.insert(
            "Billing.charge",
            RouteMetadata::new("billing", "/billing/charge", Verb::Get)
                .with_strategy("round_robin"),
        );

        let executor = Arc::new(RecordingExecutor::default());
        let dispatcher = make_dispatcher(registry, routes, executor.clone());

        dispatcher.dispatch("Billing.charge", vec![]).await.unwrap();
        dispatcher.dispatch("Billing.charge", vec![]).await.unwrap();

        let calls = executor.calls.lock().unwrap();
        let picks: Vec<&str> = calls.iter().map(|(_, i)| i.as_str()).collect();
        // Round-robin alternates regardless of load scores.
        assert_eq!(picks, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn executor_failure_passes_through() {
        let registry = Arc::new(MemoryRegistry::new("/services"));
        registry.add_instance("billing", "a", "1");

        let mut routes = RouteTable::new();
        routes.insert(
            "Billing.charge",
            RouteMetadata::new("billing", "/billing/charge", Verb::Post),
        );

        let dispatcher = make_dispatcher(registry, routes, Arc::new(FailingExecutor));

        let result = dispatcher.dispatch("Billing.charge", vec![]).await;
        assert!(matches!(result, Err(DispatchError::Transport(_))));
    }

    #[test]
    fn first_verb_is_authoritative() {
        let mut route = RouteMetadata::new("billing", "/p", Verb::Put);
        route.verbs.push(Verb::Get);
        assert_eq!(route.verb(), Verb::Put);
    }
}
