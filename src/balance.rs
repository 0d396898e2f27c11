//! Load-balancing strategies over the instance cache.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::InstanceCache;
use crate::config::{BalanceConfig, StrategyKind};
use crate::error::{DispatchError, Result};

/// Trait for instance selection strategies.
#[async_trait]
pub trait BalanceStrategy: Send + Sync {
    /// Selects an instance of the service.
    ///
    /// Returns `None` if no eligible instance is known. That is a normal,
    /// expected outcome, not an error; callers apply their own fallback or
    /// retry policy.
    async fn select(&self, service: &str) -> Option<String>;

    /// Returns the name routes use to refer to this strategy.
    fn name(&self) -> &'static str;
}

/// Deterministic minimum-load selection.
///
/// Scans the service's instances in ascending address order, tracking the
/// smallest load score seen, starting from the configured ceiling. An entry
/// wins when its score is `<=` the running minimum, so equal scores resolve
/// to the last such entry in scan order, i.e. the highest address.
/// Instances scoring above the ceiling are never selected.
#[derive(Debug)]
pub struct LeastLoaded {
    cache: Arc<InstanceCache>,
    ceiling: i64,
}

impl LeastLoaded {
    /// Creates a least-loaded strategy with the given score ceiling.
    #[must_use]
    pub fn new(cache: Arc<InstanceCache>, ceiling: i64) -> Self {
        Self { cache, ceiling }
    }
}

#[async_trait]
impl BalanceStrategy for LeastLoaded {
    async fn select(&self, service: &str) -> Option<String> {
        let instances = self.cache.discover(service).await;

        let mut limit = self.ceiling;
        let mut chosen = None;
        for (address, score) in &instances {
            if *score <= limit {
                limit = *score;
                chosen = Some(address.clone());
            }
        }
        chosen
    }

    fn name(&self) -> &'static str {
        "least_loaded"
    }
}

/// Per-service round-robin selection over the ordered instance snapshot.
#[derive(Debug)]
pub struct RoundRobin {
    cache: Arc<InstanceCache>,
    counters: DashMap<String, AtomicU64>,
}

impl RoundRobin {
    /// Creates a round-robin strategy.
    #[must_use]
    pub fn new(cache: Arc<InstanceCache>) -> Self {
        Self {
            cache,
            counters: DashMap::new(),
        }
    }
}

#[async_trait]
impl BalanceStrategy for RoundRobin {
    async fn select(&self, service: &str) -> Option<String> {
        let instances = self.cache.discover(service).await;
        if instances.is_empty() {
            return None;
        }

        let counter = self
            .counters
            .entry(service.to_owned())
            .or_insert_with(|| AtomicU64::new(0));
        let index = counter.fetch_add(1, Ordering::Relaxed) as usize % instances.len();
        drop(counter);

        instances.keys().nth(index).cloned()
    }

    fn name(&self) -> &'static str {
        "round_robin"
    }
}

/// Explicit name → strategy table with a configured default.
///
/// Built once at startup; routes resolve their strategy here per call.
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn BalanceStrategy>>,
    default: Arc<dyn BalanceStrategy>,
}

impl StrategyRegistry {
    /// Creates a registry with the given default strategy, which is also
    /// registered under its own name.
    #[must_use]
    pub fn new(default: Arc<dyn BalanceStrategy>) -> Self {
        let mut strategies = HashMap::new();
        strategies.insert(default.name().to_owned(), Arc::clone(&default));
        Self {
            strategies,
            default,
        }
    }

    /// Builds the registry from configuration: both built-in strategies
    /// registered, with the configured one as default.
    #[must_use]
    pub fn from_config(config: &BalanceConfig, cache: Arc<InstanceCache>) -> Self {
        let least_loaded: Arc<dyn BalanceStrategy> =
            Arc::new(LeastLoaded::new(Arc::clone(&cache), config.load_ceiling));
        let round_robin: Arc<dyn BalanceStrategy> = Arc::new(RoundRobin::new(cache));

        let default = match config.default_strategy {
            StrategyKind::LeastLoaded => Arc::clone(&least_loaded),
            StrategyKind::RoundRobin => Arc::clone(&round_robin),
        };

        let mut registry = Self::new(default);
        registry.register(least_loaded);
        registry.register(round_robin);
        registry
    }

    /// Registers a strategy under its own name, replacing any previous
    /// strategy with that name.
    pub fn register(&mut self, strategy: Arc<dyn BalanceStrategy>) {
        self.strategies.insert(strategy.name().to_owned(), strategy);
    }

    /// Resolves a route's strategy name.
    ///
    /// An absent or empty name selects the default.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownStrategy`] for a name that was never
    /// registered.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn BalanceStrategy>> {
        match name {
            None | Some("") => Ok(Arc::clone(&self.default)),
            Some(name) => self
                .strategies
                .get(name)
                .cloned()
                .ok_or_else(|| DispatchError::UnknownStrategy(name.to_owned())),
        }
    }

    /// Returns the default strategy's name.
    #[must_use]
    pub fn default_name(&self) -> &'static str {
        self.default.name()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .field("default", &self.default.name())
            .finish()
    }
}
