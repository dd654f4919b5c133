//! # Staged Pipeline
//!
//! Stream-shaped workloads as a chain of stages connected by bounded channels.
//!
//! ```text
//! source ──▶ [stage 1] ──▶ [stage 2] ──▶ ... ──▶ [stage N] ──▶ consumer
//!        chan          chan                             chan
//! ```
//!
//! Each stage runs in its own task(s), reads its input channel until it closes,
//! and owns the output channel it creates: the output closes exactly once, when
//! the stage finishes. A slow stage fills its input buffer and blocks the stage
//! before it, which is the only flow control.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Pipeline`] | Ordered list of stages |
//! | [`Stage`] | Trait every stage implements (closures included) |
//! | [`stage::Map`] | Async one-to-one transform |
//! | [`stage::Filter`] | Drops items failing a predicate |
//! | [`stage::ParallelMap`] | Transform with N concurrent tasks, unordered |
//! | [`source`] | Feeds an iterator into a channel |
//!
//! ## Example
//!
//! ```rust
//! use task_core::pipeline::{self, stage::{Filter, Map}, Pipeline};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut pipeline = Pipeline::new();
//! pipeline
//!     .add_stage(Map::new(|x: u32| async move { x * 2 }))
//!     .add_stage(Filter::new(|x: &u32| x % 3 != 0));
//!
//! let mut out = pipeline.execute(pipeline::source(1..=5u32, 4));
//! let mut seen = Vec::new();
//! while let Some(x) = out.recv().await {
//!     seen.push(x);
//! }
//! assert_eq!(seen, vec![2, 4, 8, 10]);
//! # }
//! ```
//!
//! ## Cancellation
//!
//! A pipeline does not cancel on its own. Built-in stages accept a
//! `CancellationToken`; once it fires they stop receiving and sending, and still
//! close their output so downstream consumers see the end of the stream.

pub mod stage;


use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// One step of a [`Pipeline`].
///
/// `spawn` starts the stage on the current tokio runtime and returns its output.
/// The stage owns the output sender and must drop it once it will never send
/// again, normally after `input` closes.
pub trait Stage<T>: Send + Sync {
    fn spawn(&self, input: mpsc::Receiver<T>) -> mpsc::Receiver<T>;
}

impl<T, F> Stage<T> for F
where
    F: Fn(mpsc::Receiver<T>) -> mpsc::Receiver<T> + Send + Sync,
{
    fn spawn(&self, input: mpsc::Receiver<T>) -> mpsc::Receiver<T> {
        self(input)
    }
}

/// Ordered chain of stages.
///
/// The pipeline itself is reusable: every call to [`execute`](Self::execute)
/// spawns a fresh set of stage tasks.
pub struct Pipeline<T> {
    stages: Vec<Arc<dyn Stage<T>>>,
}

impl<T: Send + 'static> Pipeline<T> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage; stages run in the order they were added.
    pub fn add_stage<S>(&mut self, stage: S) -> &mut Self
    where
        S: Stage<T> + 'static,
    {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Builder-style [`add_stage`](Self::add_stage).
    pub fn with_stage<S>(mut self, stage: S) -> Self
    where
        S: Stage<T> + 'static,
    {
        self.add_stage(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Wire `input` through every stage and return the last stage's output.
    ///
    /// With no stages the input is returned unchanged. Must be called from
    /// within a tokio runtime.
    pub fn execute(&self, input: mpsc::Receiver<T>) -> mpsc::Receiver<T> {
        self.stages
            .iter()
            .fold(input, |upstream, stage| stage.spawn(upstream))
    }

    /// [`execute`](Self::execute) with the output wrapped as a `Stream`.
    pub fn execute_stream(&self, input: mpsc::Receiver<T>) -> ReceiverStream<T> {
        ReceiverStream::new(self.execute(input))
    }
}

impl<T: Send + 'static> Default for Pipeline<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Feed `items` into a new channel with room for `buffer` items.
///
/// The feeding task stops early if the receiver is dropped.
pub fn source<I>(items: I, buffer: usize) -> mpsc::Receiver<I::Item>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
    I::Item: Send + 'static,
{
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let items = items.into_iter();
    tokio::spawn(async move {
        for item in items {
            if tx.send(item).await.is_err() {
                break;
            }
        }
    });
    rx
}
