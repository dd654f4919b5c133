//! # task-core
//!
//! Concurrent task processing core: a bounded worker pool, a token-bucket rate
//! limiter, a circuit breaker, and a staged channel pipeline.
//!
//! ## Overview
//!
//! Jobs are submitted into a bounded queue and executed by a fixed number of
//! tokio workers. Results come back on a bounded channel, one per admitted job,
//! with execution failures and panics reported as data. Admission can be gated
//! by a [`RateLimiter`] and a [`CircuitBreaker`], which an [`Orchestrator`]
//! wires together. Stream-shaped workloads use a [`Pipeline`] of stages instead.
//!
//! ## Core Guarantees
//!
//! - **No loss, no duplication**: every accepted job yields exactly one [`JobResult`]
//! - **Bounded memory**: queue, results and stage channels are all bounded
//! - **Contained failures**: a failing or panicking job never takes a worker down
//! - **Clean shutdown**: every channel closes exactly once, no task outlives shutdown
//!
//! ## Quick Start
//!
//! ```rust
//! use task_core::{Job, Orchestrator, RateLimiterConfig};
//!
//! #[tokio::main]
//! async fn main() -> task_core::Result<()> {
//!     let orch = Orchestrator::<usize>::builder()
//!         .workers(2)
//!         .queue_capacity(10)
//!         .rate_limit(RateLimiterConfig::new().with_burst(10))
//!         .build()?;
//!     let mut results = orch.results().expect("results are taken once");
//!     orch.start()?;
//!
//!     orch.submit(Job::new(1, "hello", |s: &str| async move { Ok(s.len()) })).await?;
//!     orch.shutdown().await;
//!
//!     while let Some(r) = results.recv().await {
//!         println!("job {} -> {:?}", r.job_id, r.output());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`pool`] | Worker pool, jobs and results |
//! | [`resilience`] | Rate limiter and circuit breaker |
//! | [`orchestrator`] | Pool behind rate-limit and breaker admission |
//! | [`pipeline`] | Staged processing over bounded channels |
//! | [`config`] | YAML and environment configuration |
//! | [`error`] | Error type shared by every module |

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod pool;
pub mod resilience;

pub use config::{CircuitBreakerSettings, CoreConfig};
pub use error::{Error, ErrorContext};
pub use orchestrator::{Orchestrator, OrchestratorBuilder, SignalsSnapshot};
pub use pipeline::{Pipeline, Stage};
pub use pool::{Job, JobId, JobResult, PoolStats, Task, WorkerPool, WorkerPoolConfig};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState, Permit,
    RateLimiter, RateLimiterConfig, RateLimiterSnapshot,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
