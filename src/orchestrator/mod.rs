//! # Orchestrator
//!
//! A [`WorkerPool`] behind two admission gates: a [`RateLimiter`] and a
//! [`CircuitBreaker`].
//!
//! ```text
//! submit ──▶ breaker open? ──▶ token? ──▶ queue ──▶ workers ──▶ results
//!               │ yes             │ no
//!               ▼                 ▼
//!          CircuitOpen        RateLimited
//! ```
//!
//! The breaker is also attached to the pool, so every executed job reports its
//! outcome to it and a tripped breaker stops both admission and execution.
//!
//! ## Example
//!
//! ```rust
//! use task_core::orchestrator::OrchestratorBuilder;
//! use task_core::{Job, RateLimiterConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> task_core::Result<()> {
//! let orch = OrchestratorBuilder::new()
//!     .workers(2)
//!     .rate_limit(RateLimiterConfig::new().with_burst(5).with_refill_rate(100.0))
//!     .build::<u64>()?;
//! let mut results = orch.results().expect("first call");
//! orch.start()?;
//!
//! for id in 0..3u64 {
//!     orch.submit(Job::from_fn(id, move || async move { Ok(id * id) })).await?;
//! }
//! orch.shutdown().await;
//!
//! let mut total = 0;
//! while let Some(r) = results.recv().await {
//!     total += r.into_output()?;
//! }
//! assert_eq!(total, 5);
//! # Ok(())
//! # }
//! ```

mod builder;
mod signals;

pub use builder::OrchestratorBuilder;
pub use signals::SignalsSnapshot;

use crate::config::CoreConfig;
use crate::pool::{Job, JobResult, WorkerPool};
use crate::resilience::{CircuitBreaker, RateLimiter};
use crate::{Error, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Worker pool with rate limiting and circuit breaking on the way in.
#[derive(Debug)]
pub struct Orchestrator<O> {
    pool: WorkerPool<O>,
    rate_limiter: Option<Arc<RateLimiter>>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl<O: Send + 'static> Orchestrator<O> {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::new()
    }

    pub fn from_config(cfg: &CoreConfig) -> Result<Self> {
        cfg.validate()?;
        OrchestratorBuilder::from_config(cfg).build()
    }

    pub fn start(&self) -> Result<()> {
        self.pool.start()
    }

    fn reject<T>(&self, err: Error) -> Result<T> {
        debug!(error = %err, "submission rejected at admission");
        self.pool.record_rejection();
        Err(err)
    }

    /// Checks that cost nothing: an open breaker and a closed queue.
    fn precheck(&self) -> Result<()> {
        if let Some(breaker) = &self.breaker {
            // Peek only; the half-open transition happens when a worker runs the job.
            if let Some(retry_after_ms) = breaker.snapshot().open_remaining_ms {
                return self.reject(Error::CircuitOpen { retry_after_ms });
            }
        }
        if self.pool.is_closed() {
            return self.reject(Error::QueueClosed);
        }
        Ok(())
    }

    /// Take a token without waiting. Returns whether one was taken.
    fn take_token(&self) -> Result<bool> {
        match &self.rate_limiter {
            Some(limiter) if !limiter.allow() => self.reject(Error::RateLimited),
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// A job the pool refused never ran, so the token it took goes back.
    fn settle(&self, took_token: bool, res: Result<()>) -> Result<()> {
        if res.is_err() && took_token {
            if let Some(limiter) = &self.rate_limiter {
                limiter.refund();
            }
        }
        res
    }

    /// Admit a job without waiting for a token.
    ///
    /// Checks the breaker first, then takes a token, then enqueues (waiting
    /// for queue space). A rejected job is dropped; if the pool refuses it the
    /// token is returned.
    pub async fn submit(&self, job: Job<O>) -> Result<()> {
        self.precheck()?;
        let took = self.take_token()?;
        let res = self.pool.submit(job).await;
        self.settle(took, res)
    }

    /// Admit a job, waiting for a token and for queue space.
    ///
    /// Gives up with [`Error::Cancelled`] when `cancel` fires. An open breaker
    /// still rejects immediately.
    pub async fn submit_wait(&self, job: Job<O>, cancel: &CancellationToken) -> Result<()> {
        self.precheck()?;
        let took = match &self.rate_limiter {
            Some(limiter) => match limiter.wait(cancel).await {
                Ok(()) => true,
                Err(err) => return self.reject(err),
            },
            None => false,
        };
        let res = self.pool.submit_with_cancel(job, cancel).await;
        self.settle(took, res)
    }

    /// Like [`submit`](Self::submit) but fails with [`Error::QueueFull`] instead of waiting.
    pub fn try_submit(&self, job: Job<O>) -> Result<()> {
        self.precheck()?;
        let took = self.take_token()?;
        let res = self.pool.try_submit(job);
        self.settle(took, res)
    }

    pub fn results(&self) -> Option<mpsc::Receiver<JobResult<O>>> {
        self.pool.results()
    }

    pub fn result_stream(&self) -> Option<ReceiverStream<JobResult<O>>> {
        self.pool.result_stream()
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    pub fn cancel(&self) {
        self.pool.cancel();
    }

    pub fn pool(&self) -> &WorkerPool<O> {
        &self.pool
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn signals(&self) -> SignalsSnapshot {
        SignalsSnapshot {
            pool: self.pool.stats(),
            rate_limiter: self.rate_limiter.as_ref().map(|rl| rl.snapshot()),
            circuit_breaker: self.breaker.as_ref().map(|cb| cb.snapshot()),
        }
    }
}
