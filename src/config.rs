//! Engine configuration
//!
//! All tunables in one place, constructed at the composition root and passed
//! by reference to every component. Defaults match production behavior;
//! `from_env` lets deployments override the interesting knobs.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct LensConfig {
    /// Documents pulled per collection by the schema extractor ($sample size)
    pub sample_size: u32,

    /// Maximum nesting depth walked when folding sampled documents
    pub max_field_depth: usize,

    /// Representative values kept per field
    pub sample_values_per_field: usize,

    /// Seconds a cached schema snapshot stays fresh
    pub schema_ttl_secs: u64,

    /// Seconds a pooled connection may sit idle at zero references
    pub idle_timeout_secs: u64,

    /// Seconds between idle-sweep passes over the pool
    pub sweep_interval_secs: u64,

    /// Server selection / connect timeout for every external client
    pub connect_timeout_secs: u64,

    /// Default limit applied to find queries without an explicit limit
    pub default_find_limit: i64,

    /// Default limit applied to aggregation pipelines
    pub default_aggregate_limit: i64,

    /// Hard cap on any user-requested limit
    pub max_limit: i64,

    /// Intent confidence required before a compiled query is executed
    pub execution_confidence_threshold: f64,
}

impl Default for LensConfig {
    fn default() -> Self {
        Self {
            sample_size: 100,
            max_field_depth: 3,
            sample_values_per_field: 3,
            schema_ttl_secs: 30 * 60,
            idle_timeout_secs: 60,
            sweep_interval_secs: 30,
            connect_timeout_secs: 5,
            default_find_limit: 10,
            default_aggregate_limit: 100,
            max_limit: 1000,
            execution_confidence_threshold: 0.6,
        }
    }
}

impl LensConfig {
    /// Defaults with environment overrides (MONGOLENS_ prefix).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_u64("MONGOLENS_SAMPLE_SIZE") {
            cfg.sample_size = v as u32;
        }
        if let Some(v) = env_u64("MONGOLENS_SCHEMA_TTL_SECS") {
            cfg.schema_ttl_secs = v;
        }
        if let Some(v) = env_u64("MONGOLENS_IDLE_TIMEOUT_SECS") {
            cfg.idle_timeout_secs = v;
        }
        if let Some(v) = env_u64("MONGOLENS_CONNECT_TIMEOUT_SECS") {
            cfg.connect_timeout_secs = v;
        }
        cfg
    }

    pub fn schema_ttl(&self) -> Duration {
        Duration::from_secs(self.schema_ttl_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
