use crate::Error;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Point-in-time counters for a [`crate::WorkerPool`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub queue_capacity: usize,
    /// Jobs currently buffered in the queue.
    pub queued: usize,
    pub submitted: usize,
    /// Jobs that finished executing, successfully or not.
    pub completed: usize,
    pub failed: usize,
    /// Subset of `failed` that panicked.
    pub panicked: usize,
    /// Submissions refused at admission.
    pub rejected: usize,
    /// Accepted jobs the circuit breaker refused to run. Not counted as completed.
    pub short_circuited: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

impl PoolStats {
    pub fn success_rate(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            (self.completed - self.failed) as f64 / self.completed as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    panicked: AtomicUsize,
    rejected: AtomicUsize,
    short_circuited: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Counters {
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn begin(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    pub(crate) fn finish<O>(&self, outcome: &Result<O, Error>) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Err(Error::CircuitOpen { .. }) = outcome {
            // The job function never ran.
            self.short_circuited.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(_) => {}
            Err(Error::JobPanicked { .. }) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.panicked.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn snapshot(&self, workers: usize, queue_capacity: usize, queued: usize) -> PoolStats {
        PoolStats {
            workers,
            queue_capacity,
            queued,
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}
