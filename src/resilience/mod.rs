//! # Resilience Primitives Module
//!
//! Admission control and failure isolation for work entering the core.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Generation-tracked circuit breaker for failure isolation |
//! | [`rate_limiter`] | Token bucket rate limiter for submission pacing |
//!
//! ## Circuit Breaker
//!
//! - **Closed**: Normal operation, calls pass through
//! - **Open**: Failures reached the threshold, calls fail fast
//! - **Half-Open**: Trial calls test whether the dependency recovered
//!
//! ```rust
//! use task_core::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new()
//!         .with_failure_threshold(3)
//!         .with_open_timeout(Duration::from_secs(10)),
//! );
//!
//! let value: u32 = breaker.execute(|| async { Ok::<_, anyhow::Error>(42) }).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ## Rate Limiter
//!
//! ```rust
//! use task_core::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
//!
//! let limiter = RateLimiter::new(
//!     RateLimiterConfig::new()
//!         .with_burst(5)
//!         .with_refill_rate(1.0), // 1 token per second
//! );
//!
//! if limiter.allow() {
//!     // Proceed with submission...
//! }
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState, Permit,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RateLimiterSnapshot};
