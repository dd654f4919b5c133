use crate::pool::PoolStats;
use crate::resilience::{CircuitBreakerSnapshot, RateLimiterSnapshot};
use serde::Serialize;

/// Point-in-time view of every gate and the pool behind an [`super::Orchestrator`].
///
/// Facts only; callers decide what to do with them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignalsSnapshot {
    pub pool: PoolStats,
    pub rate_limiter: Option<RateLimiterSnapshot>,
    pub circuit_breaker: Option<CircuitBreakerSnapshot>,
}

impl SignalsSnapshot {
    /// True when the breaker is currently rejecting or the bucket is empty.
    pub fn is_throttled(&self) -> bool {
        let breaker_open = self
            .circuit_breaker
            .as_ref()
            .is_some_and(|cb| cb.open_remaining_ms.is_some());
        let bucket_empty = self
            .rate_limiter
            .as_ref()
            .is_some_and(|rl| rl.tokens < 1.0);
        breaker_open || bucket_empty
    }
}
