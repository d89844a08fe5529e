//! Executor capability and the in-process graph engine that implements it.
//!
//! The orchestration layer only sees [`Executor`]: start a run and get a
//! live sequence of [`StreamEvent`]s, read a thread's latest state, and
//! (when supported) write a merged state back.
//!
//! Concurrent runs on one thread are neither deduplicated nor serialized.
//! Each run reads the latest checkpoint once when it starts and every
//! checkpoint write appends to the thread's history, so the most recent
//! write wins.

mod checkpoint;
mod graph;
mod research;

pub use checkpoint::{
    Checkpoint, InterruptKind, MemoryCheckpointer, PendingInterrupt, DEFAULT_CHECKPOINT_RETENTION,
};
pub use graph::{
    FnNode, Graph, GraphBuilder, GraphExecutor, Next, Node, NodeContext, NodeOutput, NodeResult, END,
};
pub use research::{research_graph, ResearchOptions};

use std::future::Future;
use std::pin::Pin;

use delve_protocol::StreamMode;
use futures::Stream;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::request::{RunOptions, RunRequest};
use crate::storage::StorageError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Live, ordered event feed of one run. Ends after the last event, or
/// right after yielding an error.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, RunError>> + Send>>;

/// One output event, tagged by the channel that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamEvent {
    pub mode: StreamMode,
    pub payload: Value,
}

/// Latest materialized state of a thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub values: Map<String, Value>,
    pub checkpoint_id: Option<String>,
    /// Nodes that will run on the next continue/resume.
    pub next: Vec<String>,
}

/// Failures that stop a run from starting. Nothing has been streamed yet.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("thread {0} has no pending interrupt to resume")]
    NothingToResume(String),

    #[error("checkpoint {checkpoint_id} not found for thread {thread_id}")]
    CheckpointNotFound {
        thread_id: String,
        checkpoint_id: String,
    },

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    #[error("executor does not support state writes")]
    MergeUnsupported,

    #[error("checkpoint store: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Failures after a run has started; surfaced as a stream error.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Recursion limit of {limit} reached without hitting a stop condition.")]
    RecursionLimit { limit: u32 },

    #[error("node {node} failed: {message}")]
    Node { node: String, message: String },

    #[error("checkpoint store: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The execution engine as seen by the HTTP layer.
pub trait Executor: Send + Sync + 'static {
    /// Start exactly one run and return its event feed.
    fn start<'a>(
        &'a self,
        thread_id: &'a str,
        request: RunRequest,
        options: RunOptions,
    ) -> BoxFuture<'a, Result<EventStream, ExecutorError>>;

    /// Latest snapshot, or `None` for a thread that has never run.
    fn get_state<'a>(
        &'a self,
        thread_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<StateSnapshot>, ExecutorError>>;

    /// Whether [`Executor::update_state`] persists anything.
    fn supports_durable_merge(&self) -> bool {
        false
    }

    /// Store `values` as the thread's new state and return the checkpoint id.
    fn update_state<'a>(
        &'a self,
        _thread_id: &'a str,
        _values: Map<String, Value>,
    ) -> BoxFuture<'a, Result<String, ExecutorError>> {
        Box::pin(async { Err(ExecutorError::MergeUnsupported) })
    }
}

/// The receiving side of a run went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Producer half of a run's event feed.
///
/// Events for channels the run did not ask for are dropped here, so
/// producers can emit unconditionally.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Result<StreamEvent, RunError>>,
    modes: Vec<StreamMode>,
}

impl EventSender {
    pub fn wants(&self, mode: StreamMode) -> bool {
        self.modes.contains(&mode)
    }

    /// Send one event, waiting for buffer space.
    ///
    /// Reports [`Disconnected`] once the stream is gone, even for an
    /// event that would have been dropped.
    pub async fn emit(&self, mode: StreamMode, payload: Value) -> Result<(), Disconnected> {
        if self.is_closed() {
            return Err(Disconnected);
        }
        if !self.wants(mode) {
            return Ok(());
        }
        self.tx
            .send(Ok(StreamEvent { mode, payload }))
            .await
            .map_err(|_| Disconnected)
    }

    /// Send the run's final error.
    pub async fn fail(&self, err: RunError) -> Result<(), Disconnected> {
        self.tx.send(Err(err)).await.map_err(|_| Disconnected)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Bounded channel feeding an [`EventStream`].
///
/// Dropping the stream closes the channel, and the producer sees
/// [`Disconnected`] on its next send.
pub fn event_channel(capacity: usize, modes: Vec<StreamMode>) -> (EventSender, EventStream) {
    let (tx, mut rx) = mpsc::channel(capacity.max(1));
    let stream = futures::stream::poll_fn(move |cx| rx.poll_recv(cx));
    (EventSender { tx, modes }, Box::pin(stream))
}
