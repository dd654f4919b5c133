//! Jobs and their results.

use crate::{Error, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::time::{Duration, Instant};

pub type JobId = u64;

type JobFn<O> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<O>> + Send>;

/// Struct-style unit of work, for jobs that carry their own state.
///
/// ```rust
/// use task_core::{Job, Task};
///
/// struct Resize { width: u32 }
///
/// #[async_trait::async_trait]
/// impl Task<u32> for Resize {
///     async fn execute(self: Box<Self>) -> anyhow::Result<u32> {
///         Ok(self.width / 2)
///     }
/// }
///
/// let job = Job::from_task(7, Resize { width: 640 });
/// assert_eq!(job.id(), 7);
/// ```
#[async_trait]
pub trait Task<O>: Send + 'static {
    async fn execute(self: Box<Self>) -> anyhow::Result<O>;
}

/// A unit of work: an identifier plus the function that produces its output.
///
/// The payload is moved into the job at construction and handed to the function
/// when a worker runs it. Ownership passes to the pool on a successful submit.
pub struct Job<O> {
    id: JobId,
    created_at: Instant,
    run: JobFn<O>,
}

impl<O: Send + 'static> Job<O> {
    /// Job that calls `f(payload)` when executed.
    pub fn new<P, F, Fut>(id: JobId, payload: P, f: F) -> Self
    where
        P: Send + 'static,
        F: FnOnce(P) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        Self {
            id,
            created_at: Instant::now(),
            run: Box::new(move || f(payload).boxed()),
        }
    }

    /// Job with no separate payload.
    pub fn from_fn<F, Fut>(id: JobId, f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        Self {
            id,
            created_at: Instant::now(),
            run: Box::new(move || f().boxed()),
        }
    }

    pub fn from_task<T>(id: JobId, task: T) -> Self
    where
        T: Task<O>,
    {
        Self {
            id,
            created_at: Instant::now(),
            run: Box::new(move || Box::new(task).execute()),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Time since the job was created.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub(crate) fn into_future(self) -> BoxFuture<'static, anyhow::Result<O>> {
        (self.run)()
    }
}

impl<O> std::fmt::Debug for Job<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Outcome of one executed job.
#[derive(Debug)]
pub struct JobResult<O> {
    pub job_id: JobId,
    pub worker_id: usize,
    pub outcome: Result<O>,
    /// Time spent executing.
    pub duration: Duration,
    /// Time between job creation and the start of execution.
    pub waited: Duration,
}

impl<O> JobResult<O> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn output(&self) -> Option<&O> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.outcome.as_ref().err()
    }

    pub fn into_output(self) -> Result<O> {
        self.outcome
    }
}
