//! Core configuration.
//!
//! Loaded from YAML, then overridden by environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `TASK_CORE_WORKERS` | `pool.workers` |
//! | `TASK_CORE_QUEUE_CAPACITY` | `pool.queue_capacity` |
//! | `TASK_CORE_RESULTS_CAPACITY` | `pool.results_capacity` |
//! | `TASK_CORE_RPS` | `rate_limit.rps` (enables the limiter) |
//! | `TASK_CORE_BURST` | `rate_limit.burst` |
//! | `TASK_CORE_BREAKER_FAILURE_THRESHOLD` | `circuit_breaker.failure_threshold` (enables the breaker) |
//! | `TASK_CORE_BREAKER_COOLDOWN_MS` | `circuit_breaker.open_timeout_ms` |
//!
//! ```yaml
//! pool:
//!   workers: 8
//!   queue_capacity: 128
//! rate_limit:
//!   rps: 50.0
//!   burst: 10
//! circuit_breaker:
//!   failure_threshold: 5
//!   open_timeout_ms: 30000
//! ```

use crate::pool::WorkerPoolConfig;
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_WORKERS: &str = "TASK_CORE_WORKERS";
pub const ENV_QUEUE_CAPACITY: &str = "TASK_CORE_QUEUE_CAPACITY";
pub const ENV_RESULTS_CAPACITY: &str = "TASK_CORE_RESULTS_CAPACITY";
pub const ENV_RPS: &str = "TASK_CORE_RPS";
pub const ENV_BURST: &str = "TASK_CORE_BURST";
pub const ENV_BREAKER_FAILURE_THRESHOLD: &str = "TASK_CORE_BREAKER_FAILURE_THRESHOLD";
pub const ENV_BREAKER_COOLDOWN_MS: &str = "TASK_CORE_BREAKER_COOLDOWN_MS";

/// Circuit breaker settings as they appear in configuration files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub open_timeout_ms: u64,
    pub half_open_max_requests: u32,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let cfg = CircuitBreakerConfig::default();
        Self {
            failure_threshold: cfg.failure_threshold,
            open_timeout_ms: cfg.open_timeout.as_millis() as u64,
            half_open_max_requests: cfg.half_open_max_requests,
            success_threshold: cfg.success_threshold,
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(s: &CircuitBreakerSettings) -> Self {
        CircuitBreakerConfig::new()
            .with_failure_threshold(s.failure_threshold)
            .with_open_timeout(Duration::from_millis(s.open_timeout_ms))
            .with_half_open_max_requests(s.half_open_max_requests)
            .with_success_threshold(s.success_threshold)
    }
}

/// Top-level configuration for an [`crate::Orchestrator`].
///
/// `rate_limit` and `circuit_breaker` are optional; absent sections disable
/// the corresponding gate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub pool: WorkerPoolConfig,
    pub rate_limit: Option<RateLimiterConfig>,
    pub circuit_breaker: Option<CircuitBreakerSettings>,
}

fn config_error(field: &str, msg: impl Into<String>) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("config"),
    )
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            Error::configuration_with_context(
                format!("cannot parse {}", key),
                ErrorContext::new()
                    .with_field_path(key)
                    .with_details(format!("value: {:?}", raw))
                    .with_source("env"),
            )
        }),
    }
}

impl CoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(mut self, pool: WorkerPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_rate_limit(mut self, cfg: RateLimiterConfig) -> Self {
        self.rate_limit = Some(cfg);
        self
    }

    pub fn with_circuit_breaker(mut self, settings: CircuitBreakerSettings) -> Self {
        self.circuit_breaker = Some(settings);
        self
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Read `path` if given (defaults otherwise), apply environment overrides, validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let cfg = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        let cfg = cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `TASK_CORE_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_env_with(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(n) = parse_env(&lookup, ENV_WORKERS)? {
            self.pool.workers = n;
        }
        if let Some(n) = parse_env(&lookup, ENV_QUEUE_CAPACITY)? {
            self.pool.queue_capacity = n;
        }
        if let Some(n) = parse_env(&lookup, ENV_RESULTS_CAPACITY)? {
            self.pool.results_capacity = n;
        }

        let rps: Option<f64> = parse_env(&lookup, ENV_RPS)?;
        let burst: Option<u32> = parse_env(&lookup, ENV_BURST)?;
        if rps.is_some() || burst.is_some() {
            let mut rl = match (self.rate_limit.take(), rps) {
                (Some(existing), _) => existing,
                (None, Some(rps)) => RateLimiterConfig::from_rps(rps)
                    .ok_or_else(|| config_error("rate_limit.rps", "rps must be finite and >= 0"))?,
                (None, None) => RateLimiterConfig::default(),
            };
            if let Some(rps) = rps {
                rl.rps = rps;
            }
            if let Some(burst) = burst {
                rl.burst = burst;
            }
            self.rate_limit = Some(rl);
        }

        let threshold: Option<u32> = parse_env(&lookup, ENV_BREAKER_FAILURE_THRESHOLD)?;
        let cooldown_ms: Option<u64> = parse_env(&lookup, ENV_BREAKER_COOLDOWN_MS)?;
        if threshold.is_some() || cooldown_ms.is_some() {
            let mut cb = self.circuit_breaker.take().unwrap_or_default();
            if let Some(t) = threshold {
                cb.failure_threshold = t;
            }
            if let Some(ms) = cooldown_ms {
                cb.open_timeout_ms = ms;
            }
            self.circuit_breaker = Some(cb);
        }

        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.workers == 0 {
            return Err(config_error("pool.workers", "workers must be at least 1"));
        }
        if self.pool.queue_capacity == 0 {
            return Err(config_error(
                "pool.queue_capacity",
                "queue_capacity must be at least 1",
            ));
        }
        if self.pool.results_capacity == 0 {
            return Err(config_error(
                "pool.results_capacity",
                "results_capacity must be at least 1",
            ));
        }

        if let Some(rl) = &self.rate_limit {
            rl.validate()?;
        }

        if let Some(cb) = &self.circuit_breaker {
            if cb.failure_threshold == 0 {
                return Err(config_error(
                    "circuit_breaker.failure_threshold",
                    "failure_threshold must be at least 1",
                ));
            }
            if cb.open_timeout_ms == 0 {
                return Err(config_error(
                    "circuit_breaker.open_timeout_ms",
                    "open_timeout_ms must be positive",
                ));
            }
            if cb.half_open_max_requests == 0 {
                return Err(config_error(
                    "circuit_breaker.half_open_max_requests",
                    "half_open_max_requests must be at least 1",
                ));
            }
            if cb.success_threshold == 0 {
                return Err(config_error(
                    "circuit_breaker.success_threshold",
                    "success_threshold must be at least 1",
                ));
            }
        }
        Ok(())
    }
}
