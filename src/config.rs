//! Configuration types for the dispatch layer.

use serde::Deserialize;
use std::time::Duration;

/// Dispatch layer configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Registry access configuration.
    pub registry: RegistryConfig,
    /// Load balancing configuration.
    pub balance: BalanceConfig,
}

/// Registry access configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Root path under which one child exists per service name.
    pub root_path: String,
    /// Timeout applied to each registry call made by the cache.
    #[serde(with = "serde_duration_secs")]
    pub op_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root_path: "/services".to_owned(),
            op_timeout: Duration::from_secs(5),
        }
    }
}

/// Load balancing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BalanceConfig {
    /// Strategy used when a route does not name one.
    pub default_strategy: StrategyKind,
    /// Upper bound on eligible load scores. The minimum-load scan starts
    /// from this value, so instances scoring above it are never selected.
    pub load_ceiling: i64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            default_strategy: StrategyKind::LeastLoaded,
            load_ceiling: i64::MAX,
        }
    }
}

/// Balance strategy kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum StrategyKind {
    /// Deterministic minimum-load selection.
    LeastLoaded,
    /// Per-service round-robin.
    RoundRobin,
}

/// Serde helper for Duration as seconds.
mod serde_duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
