//! Built-in pipeline stages.
//!
//! Every stage takes an output buffer size (default 1) and an optional
//! cancellation token. A cancelled stage stops reading and writing and closes
//! its output.

use super::Stage;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const DEFAULT_BUFFER: usize = 1;

async fn recv_or_cancel<T>(
    input: &mut mpsc::Receiver<T>,
    cancel: Option<&CancellationToken>,
) -> Option<T> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            item = input.recv() => item,
        },
        None => input.recv().await,
    }
}

/// Returns false when the item could not be delivered and the stage should stop.
async fn send_or_cancel<T>(
    output: &mpsc::Sender<T>,
    item: T,
    cancel: Option<&CancellationToken>,
) -> bool {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => false,
            sent = output.send(item) => sent.is_ok(),
        },
        None => output.send(item).await.is_ok(),
    }
}

/// Applies an async function to every item, preserving order.
pub struct Map<F> {
    f: Arc<F>,
    buffer: usize,
    cancel: Option<CancellationToken>,
}

impl<F> Map<F> {
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            buffer: DEFAULT_BUFFER,
            cancel: None,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl<T, F, Fut> Stage<T> for Map<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    fn spawn(&self, mut input: mpsc::Receiver<T>) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let f = Arc::clone(&self.f);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            while let Some(item) = recv_or_cancel(&mut input, cancel.as_ref()).await {
                let out = f(item).await;
                if !send_or_cancel(&tx, out, cancel.as_ref()).await {
                    break;
                }
            }
        });
        rx
    }
}

/// Forwards only the items the predicate accepts.
pub struct Filter<F> {
    predicate: Arc<F>,
    buffer: usize,
    cancel: Option<CancellationToken>,
}

impl<F> Filter<F> {
    pub fn new(predicate: F) -> Self {
        Self {
            predicate: Arc::new(predicate),
            buffer: DEFAULT_BUFFER,
            cancel: None,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl<T, F> Stage<T> for Filter<F>
where
    T: Send + 'static,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn spawn(&self, mut input: mpsc::Receiver<T>) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let predicate = Arc::clone(&self.predicate);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            while let Some(item) = recv_or_cancel(&mut input, cancel.as_ref()).await {
                if !predicate(&item) {
                    continue;
                }
                if !send_or_cancel(&tx, item, cancel.as_ref()).await {
                    break;
                }
            }
        });
        rx
    }
}

/// Like [`Map`] but with `workers` tasks pulling from the same input.
///
/// Output order follows completion order. The output closes after the last
/// task exits.
pub struct ParallelMap<F> {
    f: Arc<F>,
    workers: usize,
    buffer: usize,
    cancel: Option<CancellationToken>,
}

impl<F> ParallelMap<F> {
    pub fn new(workers: usize, f: F) -> Self {
        Self {
            f: Arc::new(f),
            workers: workers.max(1),
            buffer: workers.max(1),
            cancel: None,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl<T, F, Fut> Stage<T> for ParallelMap<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    fn spawn(&self, input: mpsc::Receiver<T>) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let input = Arc::new(AsyncMutex::new(input));

        for worker in 0..self.workers {
            let input = Arc::clone(&input);
            let tx = tx.clone();
            let f = Arc::clone(&self.f);
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                loop {
                    let item = {
                        let mut input = input.lock().await;
                        recv_or_cancel(&mut input, cancel.as_ref()).await
                    };
                    let Some(item) = item else { break };
                    let out = f(item).await;
                    if !send_or_cancel(&tx, out, cancel.as_ref()).await {
                        break;
                    }
                }
                debug!(worker, "parallel stage task finished");
            });
        }
        rx
    }
}
