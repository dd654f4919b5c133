//! # Worker Pool Module
//!
//! A fixed set of tokio workers draining a bounded job queue into a bounded
//! results channel.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`WorkerPool`] | Owns the queue, the workers and the results channel |
//! | [`WorkerPoolConfig`] | Worker count and channel capacities |
//! | [`Job`] | Unit of work: id plus the async function that runs it |
//! | [`Task`] | Trait alternative to closures for stateful jobs |
//! | [`JobResult`] | Outcome, worker id and timings of one job |
//! | [`PoolStats`] | Submission and execution counters |
//!
//! ## Example
//!
//! ```rust
//! use task_core::{Job, WorkerPool};
//!
//! # #[tokio::main]
//! # async fn main() -> task_core::Result<()> {
//! let pool = WorkerPool::new(2, 10);
//! let mut results = pool.results().expect("results taken once");
//! pool.start()?;
//!
//! for id in 1..=5u64 {
//!     pool.submit(Job::new(id, id * 10, |n| async move { Ok(n + 1) })).await?;
//! }
//! pool.shutdown().await;
//!
//! let mut count = 0;
//! while let Some(result) = results.recv().await {
//!     assert!(result.is_ok());
//!     count += 1;
//! }
//! assert_eq!(count, 5);
//! # Ok(())
//! # }
//! ```
//!
//! ## Lifecycle
//!
//! - **start**: spawns the workers
//! - **shutdown**: closes the queue, waits for queued jobs to finish, closes results
//! - **cancel**: workers stop taking jobs; queued jobs are discarded at shutdown

mod job;
mod stats;
mod worker;

pub use job::{Job, JobId, JobResult, Task};
pub use stats::PoolStats;
pub use worker::{WorkerPool, WorkerPoolConfig};
