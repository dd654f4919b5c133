use super::Orchestrator;
use crate::config::CoreConfig;
use crate::pool::{WorkerPool, WorkerPoolConfig};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig};
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;

/// Builder for [`Orchestrator`].
///
/// Gates are off unless configured. A limiter or breaker can be passed in
/// shared, so several orchestrators may throttle against the same budget.
#[derive(Debug, Default)]
pub struct OrchestratorBuilder {
    pool: WorkerPoolConfig,
    rate_limiter: Option<Arc<RateLimiter>>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder populated from a loaded configuration.
    pub fn from_config(cfg: &CoreConfig) -> Self {
        let mut builder = Self::new().pool_config(cfg.pool.clone());
        if let Some(rl) = &cfg.rate_limit {
            builder = builder.rate_limit(rl.clone());
        }
        if let Some(cb) = &cfg.circuit_breaker {
            builder = builder.circuit_breaker_config(cb.into());
        }
        builder
    }

    pub fn pool_config(mut self, cfg: WorkerPoolConfig) -> Self {
        self.pool = cfg;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.pool.workers = n;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.pool.queue_capacity = n;
        self
    }

    pub fn results_capacity(mut self, n: usize) -> Self {
        self.pool.results_capacity = n;
        self
    }

    pub fn rate_limit(self, cfg: RateLimiterConfig) -> Self {
        self.rate_limiter(Arc::new(RateLimiter::new(cfg)))
    }

    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn circuit_breaker_config(self, cfg: CircuitBreakerConfig) -> Self {
        self.circuit_breaker(Arc::new(CircuitBreaker::new(cfg)))
    }

    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Build without starting; call [`Orchestrator::start`] next.
    ///
    /// Rejects zero-sized pools instead of clamping them, as well as a limiter
    /// whose rate is negative or not finite and a breaker with no open timeout.
    pub fn build<O: Send + 'static>(self) -> Result<Orchestrator<O>> {
        CoreConfig::new().with_pool(self.pool.clone()).validate()?;
        if let Some(limiter) = &self.rate_limiter {
            limiter.config().validate()?;
        }
        if let Some(breaker) = &self.breaker {
            if breaker.config().open_timeout.is_zero() {
                return Err(Error::configuration_with_context(
                    "open timeout must be positive",
                    ErrorContext::new()
                        .with_field_path("circuit_breaker.open_timeout_ms")
                        .with_source("orchestrator"),
                ));
            }
        }
        let mut pool = WorkerPool::with_config(self.pool);
        if let Some(breaker) = &self.breaker {
            pool = pool.with_breaker(Arc::clone(breaker));
        }
        Ok(Orchestrator {
            pool,
            rate_limiter: self.rate_limiter,
            breaker: self.breaker,
        })
    }
}
