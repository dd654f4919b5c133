//! Bounded worker pool.

use super::job::{Job, JobId, JobResult};
use super::stats::{Counters, PoolStats};
use crate::resilience::CircuitBreaker;
use crate::{Error, ErrorContext, Result};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub results_capacity: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            results_capacity: 64,
        }
    }
}

impl WorkerPoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn with_queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    pub fn with_results_capacity(mut self, n: usize) -> Self {
        self.results_capacity = n;
        self
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Fixed-size pool of tokio tasks draining a bounded job queue.
///
/// - `start` spawns exactly `workers` tasks; the count stays constant until shutdown
/// - each enqueued job is dequeued by one worker and executed at most once
/// - job errors and panics become [`JobResult::outcome`] values; workers keep running
/// - results arrive in completion order, not submission order
///
/// The results channel is bounded. Callers must drain [`WorkerPool::results`] or
/// workers block once it fills, and so does `shutdown`. A job that never finishes
/// also blocks `shutdown`; running jobs are never preempted.
#[derive(Debug)]
pub struct WorkerPool<O> {
    config: WorkerPoolConfig,
    queue_tx: Mutex<Option<mpsc::Sender<Job<O>>>>,
    queue_rx: Arc<AsyncMutex<mpsc::Receiver<Job<O>>>>,
    results_tx: Mutex<Option<mpsc::Sender<JobResult<O>>>>,
    results_rx: Mutex<Option<mpsc::Receiver<JobResult<O>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    cancel: CancellationToken,
    breaker: Option<Arc<CircuitBreaker>>,
    counters: Arc<Counters>,
}

impl<O: Send + 'static> WorkerPool<O> {
    /// Pool with `workers` workers and a queue holding `queue_capacity` jobs.
    ///
    /// The results channel gets the same capacity as the queue.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        Self::with_config(
            WorkerPoolConfig::new()
                .with_workers(workers)
                .with_queue_capacity(queue_capacity)
                .with_results_capacity(queue_capacity),
        )
    }

    pub fn with_config(config: WorkerPoolConfig) -> Self {
        let config = WorkerPoolConfig {
            workers: config.workers.max(1),
            queue_capacity: config.queue_capacity.max(1),
            results_capacity: config.results_capacity.max(1),
        };
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (results_tx, results_rx) = mpsc::channel(config.results_capacity);
        Self {
            config,
            queue_tx: Mutex::new(Some(queue_tx)),
            queue_rx: Arc::new(AsyncMutex::new(queue_rx)),
            results_tx: Mutex::new(Some(results_tx)),
            results_rx: Mutex::new(Some(results_rx)),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            breaker: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Run every job through `breaker`. Set before `start`.
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Spawn the workers. Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.spawn_workers()? {
            Ok(())
        } else {
            Err(Error::runtime_with_context(
                "worker pool already started",
                ErrorContext::new().with_source("worker_pool"),
            ))
        }
    }

    /// Returns `Ok(false)` when the workers were already spawned.
    fn spawn_workers(&self) -> Result<bool> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::runtime_with_context(
                "worker pool needs a tokio runtime",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("worker_pool"),
            )
        })?;

        let mut handles = lock(&self.workers);
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let results = lock(&self.results_tx).clone().ok_or(Error::QueueClosed)?;

        for id in 0..self.config.workers {
            let worker = Worker {
                id,
                queue: Arc::clone(&self.queue_rx),
                results: results.clone(),
                cancel: self.cancel.clone(),
                breaker: self.breaker.clone(),
                counters: Arc::clone(&self.counters),
            };
            handles.push(runtime.spawn(worker.run()));
        }

        info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            breaker = self.breaker.is_some(),
            "worker pool started"
        );
        Ok(true)
    }

    fn sender(&self) -> Result<mpsc::Sender<Job<O>>> {
        match lock(&self.queue_tx).as_ref() {
            Some(tx) => Ok(tx.clone()),
            None => {
                self.counters.rejected();
                Err(Error::QueueClosed)
            }
        }
    }

    /// Count a submission turned away before it reached the queue.
    pub(crate) fn record_rejection(&self) {
        self.counters.rejected();
    }

    fn accepted(&self, res: Result<()>) -> Result<()> {
        match &res {
            Ok(()) => self.counters.submitted(),
            Err(_) => self.counters.rejected(),
        }
        res
    }

    /// Enqueue a job, waiting while the queue is full.
    ///
    /// Fails with [`Error::QueueClosed`] once shutdown has begun, and with
    /// [`Error::Cancelled`] if the pool is cancelled while waiting.
    pub async fn submit(&self, job: Job<O>) -> Result<()> {
        let tx = self.sender()?;
        let res = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            sent = tx.send(job) => sent.map_err(|_| Error::QueueClosed),
        };
        self.accepted(res)
    }

    /// Like [`submit`](Self::submit), but also gives up when `cancel` fires.
    pub async fn submit_with_cancel(&self, job: Job<O>, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            self.counters.rejected();
            return Err(Error::Cancelled);
        }
        let tx = self.sender()?;
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            sent = tx.send(job) => sent.map_err(|_| Error::QueueClosed),
        };
        self.accepted(res)
    }

    /// Enqueue without waiting; fails with [`Error::QueueFull`] when there is no room.
    pub fn try_submit(&self, job: Job<O>) -> Result<()> {
        let tx = self.sender()?;
        let res = tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull,
            TrySendError::Closed(_) => Error::QueueClosed,
        });
        self.accepted(res)
    }

    /// Take the results receiver. Returns `None` after the first call.
    ///
    /// The channel closes once every worker has exited after shutdown.
    pub fn results(&self) -> Option<mpsc::Receiver<JobResult<O>>> {
        lock(&self.results_rx).take()
    }

    /// [`results`](Self::results) as a `Stream`.
    pub fn result_stream(&self) -> Option<ReceiverStream<JobResult<O>>> {
        self.results().map(ReceiverStream::new)
    }

    /// Stop accepting jobs, let the workers drain the queue, and wait for them to exit.
    ///
    /// A pool that was never started is started first so queued jobs still run.
    /// If [`results`](Self::results) was never taken, results are discarded.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if !self.started.load(Ordering::SeqCst) {
            if let Err(err) = self.spawn_workers() {
                warn!(error = %err, "could not start workers to drain queue");
            }
        }

        let closed_now = lock(&self.queue_tx).take().is_some();
        drop(lock(&self.results_tx).take());
        // Nobody can read a receiver that was never taken; close it so workers stop sending.
        drop(lock(&self.results_rx).take());
        let handles = std::mem::take(&mut *lock(&self.workers));
        if !closed_now && handles.is_empty() {
            return;
        }

        info!(workers = handles.len(), "worker pool shutting down");
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "worker task ended abnormally");
            }
        }

        if self.cancel.is_cancelled() {
            let mut discarded = 0usize;
            let mut rx = self.queue_rx.lock().await;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                warn!(discarded, "discarded queued jobs after cancellation");
            }
        }
        info!("worker pool stopped");
    }

    /// Stop workers from taking new jobs and close the queue.
    ///
    /// Jobs already executing run to completion. Jobs still queued are discarded
    /// when [`shutdown`](Self::shutdown) runs.
    pub fn cancel(&self) {
        info!("worker pool cancelled");
        self.cancel.cancel();
        drop(lock(&self.queue_tx).take());
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once the queue no longer accepts jobs.
    pub fn is_closed(&self) -> bool {
        lock(&self.queue_tx).is_none()
    }

    pub fn stats(&self) -> PoolStats {
        let queued = lock(&self.queue_tx)
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0);
        self.counters
            .snapshot(self.config.workers, self.config.queue_capacity, queued)
    }
}

impl<O> Drop for WorkerPool<O> {
    fn drop(&mut self) {
        // Workers exit on their own once the queue closes; make sure it does.
        self.cancel.cancel();
    }
}

struct Worker<O> {
    id: usize,
    queue: Arc<AsyncMutex<mpsc::Receiver<Job<O>>>>,
    results: mpsc::Sender<JobResult<O>>,
    cancel: CancellationToken,
    breaker: Option<Arc<CircuitBreaker>>,
    counters: Arc<Counters>,
}

impl<O: Send + 'static> Worker<O> {
    async fn next_job(&self) -> Option<Job<O>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            job = async { self.queue.lock().await.recv().await } => job,
        }
    }

    async fn run(self) {
        debug!(worker_id = self.id, "worker started");
        let mut results_open = true;

        while let Some(job) = self.next_job().await {
            let result = self.execute(job).await;
            if results_open && self.results.send(result).await.is_err() {
                debug!(worker_id = self.id, "results receiver dropped, discarding results");
                results_open = false;
            }
        }

        debug!(worker_id = self.id, "worker exiting");
    }

    async fn execute(&self, job: Job<O>) -> JobResult<O> {
        let job_id: JobId = job.id();
        let waited = job.age();
        let fut = job.into_future();

        self.counters.begin();
        let started = Instant::now();
        let caught = match &self.breaker {
            Some(breaker) => {
                AssertUnwindSafe(breaker.execute(|| async move { fut.await.map_err(Error::Execution) }))
                    .catch_unwind()
                    .await
            }
            None => {
                AssertUnwindSafe(async move { fut.await.map_err(Error::Execution) })
                    .catch_unwind()
                    .await
            }
        };
        let duration = started.elapsed();

        let outcome = caught.unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            warn!(worker_id = self.id, job_id, panic = %message, "job panicked");
            Err(Error::JobPanicked { job_id, message })
        });
        self.counters.finish(&outcome);

        JobResult {
            job_id,
            worker_id: self.id,
            outcome,
            duration,
            waited,
        }
    }
}
