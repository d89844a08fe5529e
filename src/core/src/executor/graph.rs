use std::collections::HashMap;
use std::sync::Arc;

use delve_protocol::StreamMode;
use serde_json::{json, Map, Value};

use super::checkpoint::{Checkpoint, InterruptKind, MemoryCheckpointer, PendingInterrupt};
use super::{
    event_channel, BoxFuture, Disconnected, EventSender, EventStream, Executor, ExecutorError,
    RunError, StateSnapshot,
};
use crate::messages::{append_messages, Message};
use crate::request::{RunOptions, RunRequest};
use crate::storage::{now_rfc3339, PathRouter, ThreadFiles};

/// Sentinel edge target that finishes a run.
pub const END: &str = "__end__";

/// Key of the `updates` event announcing a dynamic interrupt.
const INTERRUPT_KEY: &str = "__interrupt__";

/// One unit of work in a [`Graph`].
pub trait Node: Send + Sync + 'static {
    fn run<'a>(&'a self, ctx: &'a NodeContext) -> BoxFuture<'a, Result<NodeResult, RunError>>;
}

/// Adapter turning a synchronous closure into a [`Node`].
pub struct FnNode<F>(F);

impl<F> FnNode<F>
where
    F: Fn(&NodeContext) -> Result<NodeResult, RunError> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Node for FnNode<F>
where
    F: Fn(&NodeContext) -> Result<NodeResult, RunError> + Send + Sync + 'static,
{
    fn run<'a>(&'a self, ctx: &'a NodeContext) -> BoxFuture<'a, Result<NodeResult, RunError>> {
        Box::pin(async move { (self.0)(ctx) })
    }
}

/// What a node sees when it runs.
pub struct NodeContext {
    pub thread_id: String,
    pub node: String,
    /// Step number of this execution within the thread.
    pub step: u32,
    /// Thread state before this node's update.
    pub state: Map<String, Value>,
    /// Value supplied by the client when this node is the first one resumed.
    pub resume: Option<Value>,
    pub files: ThreadFiles,
    pub configurable: Map<String, Value>,
}

impl NodeContext {
    pub fn state_str(&self, key: &str) -> Option<&str> {
        self.state.get(key).and_then(Value::as_str)
    }

    pub fn fail(&self, message: impl Into<String>) -> RunError {
        RunError::Node {
            node: self.node.clone(),
            message: message.into(),
        }
    }
}

/// Where control goes after a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Next {
    /// Follow the node's static edges.
    #[default]
    Edge,
    Goto(Vec<String>),
    End,
}

/// State changes produced by a node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOutput {
    /// Keys overwritten in the thread state.
    pub update: Map<String, Value>,
    /// Appended to `messages`.
    pub messages: Vec<Message>,
    pub next: Next,
}

impl NodeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.update.insert(key.into(), value);
        self
    }

    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn goto(mut self, targets: Vec<String>) -> Self {
        self.next = Next::Goto(targets);
        self
    }

    pub fn end(mut self) -> Self {
        self.next = Next::End;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeResult {
    Done(NodeOutput),
    /// Pause the run and hand this value to the client.
    Interrupt(Value),
}

impl From<NodeOutput> for NodeResult {
    fn from(output: NodeOutput) -> Self {
        Self::Done(output)
    }
}

/// Named nodes joined by static edges. A node without outgoing edges ends
/// the run.
pub struct Graph {
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: HashMap<String, Vec<String>>,
    entry: String,
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    fn node(&self, name: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(name)
    }

    fn successors(&self, name: &str) -> Vec<String> {
        self.edges
            .get(name)
            .map(|targets| targets.iter().filter(|t| *t != END).cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Default)]
pub struct GraphBuilder {
    nodes: HashMap<String, Arc<dyn Node>>,
    order: Vec<String>,
    edges: Vec<(String, String)>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn node(mut self, name: impl Into<String>, node: impl Node) -> Self {
        let name = name.into();
        if !self.nodes.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.nodes.insert(name, Arc::new(node));
        self
    }

    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Defaults to the first node added.
    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    pub fn build(self) -> Result<Graph, ExecutorError> {
        let entry = self
            .entry
            .or_else(|| self.order.first().cloned())
            .ok_or_else(|| ExecutorError::UnknownNode("graph has no nodes".into()))?;
        if !self.nodes.contains_key(&entry) {
            return Err(ExecutorError::UnknownNode(entry));
        }

        let mut edges: HashMap<String, Vec<String>> = HashMap::new();
        for (from, to) in self.edges {
            if !self.nodes.contains_key(&from) {
                return Err(ExecutorError::UnknownNode(from));
            }
            if to != END && !self.nodes.contains_key(&to) {
                return Err(ExecutorError::UnknownNode(to));
            }
            let targets = edges.entry(from).or_default();
            if !targets.contains(&to) {
                targets.push(to);
            }
        }

        Ok(Graph {
            nodes: self.nodes,
            edges,
            entry,
        })
    }
}

/// In-process [`Executor`] driving a [`Graph`] with checkpoints kept in
/// memory.
///
/// Each run executes on its own tokio task and feeds a bounded channel.
/// The task stops at its next send once the consumer drops the stream.
pub struct GraphExecutor {
    graph: Arc<Graph>,
    checkpoints: Arc<MemoryCheckpointer>,
    files: Arc<PathRouter>,
    event_buffer: usize,
}

impl GraphExecutor {
    pub fn new(graph: Graph, files: Arc<PathRouter>) -> Self {
        Self {
            graph: Arc::new(graph),
            checkpoints: Arc::new(MemoryCheckpointer::new()),
            files,
            event_buffer: 64,
        }
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    /// Keep at most `retention` checkpoints per thread. Resets any history
    /// already recorded.
    pub fn with_checkpoint_retention(mut self, retention: usize) -> Self {
        self.checkpoints = Arc::new(MemoryCheckpointer::with_retention(retention));
        self
    }

    pub fn checkpoints(&self) -> &MemoryCheckpointer {
        &self.checkpoints
    }

    pub fn files(&self) -> &Arc<PathRouter> {
        &self.files
    }

    fn prepare(
        &self,
        thread_id: &str,
        request: RunRequest,
        options: &RunOptions,
    ) -> Result<RunPlan, ExecutorError> {
        let base = match options.checkpoint_id.as_deref() {
            Some(id) => Some(self.checkpoints.get(thread_id, id)?.ok_or_else(|| {
                ExecutorError::CheckpointNotFound {
                    thread_id: thread_id.to_string(),
                    checkpoint_id: id.to_string(),
                }
            })?),
            None => self.checkpoints.latest(thread_id)?,
        };

        let mut plan = RunPlan {
            values: base.as_ref().map(|c| c.values.clone()).unwrap_or_default(),
            frontier: vec![self.graph.entry().to_string()],
            parent_id: base.as_ref().map(|c| c.id.clone()),
            step: base.as_ref().map(|c| c.step).unwrap_or(0),
            resume: None,
            skip_before: false,
            input_changed: false,
        };
        let pending = base.as_ref().and_then(|c| c.interrupt.clone());
        let scheduled = base.map(|c| c.next).unwrap_or_default();

        match request {
            RunRequest::NewInput(messages) => {
                append_messages(&mut plan.values, messages);
                plan.input_changed = true;
            }
            RunRequest::Resume(value) => {
                let Some(pending) = pending else {
                    return Err(ExecutorError::NothingToResume(thread_id.to_string()));
                };
                plan.frontier = scheduled;
                plan.resume = Some(value);
                plan.skip_before = pending.kind != InterruptKind::After;
            }
            RunRequest::Goto { targets, update } => {
                if let Some(unknown) = targets.iter().find(|t| !self.graph.contains(t)) {
                    return Err(ExecutorError::UnknownNode(unknown.clone()));
                }
                if let Some(update) = update {
                    apply_patch(&mut plan.values, update)?;
                }
                plan.frontier = targets;
                plan.input_changed = true;
            }
            RunRequest::StatelessContinue => {
                if !scheduled.is_empty() {
                    plan.frontier = scheduled;
                    plan.skip_before = pending.is_some_and(|p| p.kind != InterruptKind::After);
                }
            }
        }
        Ok(plan)
    }
}

/// Overlay a command's update onto state; `messages` entries are appended.
fn apply_patch(values: &mut Map<String, Value>, update: Value) -> Result<(), ExecutorError> {
    let Value::Object(patch) = update else {
        return Err(ExecutorError::InvalidUpdate(format!(
            "expected an object, got {update}"
        )));
    };
    for (key, value) in patch {
        if key == "messages" {
            let incoming = match &value {
                Value::Array(items) => items.iter().map(Message::from_wire).collect(),
                other => vec![Message::from_wire(other)],
            };
            append_messages(values, incoming);
        } else {
            values.insert(key, value);
        }
    }
    Ok(())
}

impl Executor for GraphExecutor {
    fn start<'a>(
        &'a self,
        thread_id: &'a str,
        request: RunRequest,
        options: RunOptions,
    ) -> BoxFuture<'a, Result<EventStream, ExecutorError>> {
        Box::pin(async move {
            let kind = request.kind();
            let plan = self.prepare(thread_id, request, &options)?;
            tracing::info!(
                %thread_id,
                kind,
                modes = ?options.stream_modes,
                recursion_limit = options.recursion_limit,
                "run started"
            );

            let (tx, stream) = event_channel(self.event_buffer, options.stream_modes.clone());
            let run = Run {
                graph: self.graph.clone(),
                checkpoints: self.checkpoints.clone(),
                files: self.files.for_thread(thread_id),
                thread_id: thread_id.to_string(),
                options,
                tx,
            };
            tokio::spawn(run.execute(plan));
            Ok(stream)
        })
    }

    fn get_state<'a>(
        &'a self,
        thread_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<StateSnapshot>, ExecutorError>> {
        Box::pin(async move {
            Ok(self
                .checkpoints
                .latest(thread_id)?
                .map(|cp| StateSnapshot {
                    values: cp.values,
                    checkpoint_id: Some(cp.id),
                    next: cp.next,
                }))
        })
    }

    fn supports_durable_merge(&self) -> bool {
        true
    }

    fn update_state<'a>(
        &'a self,
        thread_id: &'a str,
        values: Map<String, Value>,
    ) -> BoxFuture<'a, Result<String, ExecutorError>> {
        Box::pin(async move {
            let latest = self.checkpoints.latest(thread_id)?;
            let checkpoint = match latest {
                Some(prev) => Checkpoint::new(Some(prev.id), values, prev.next, prev.interrupt, prev.step),
                None => Checkpoint::new(None, values, Vec::new(), None, 0),
            };
            let id = checkpoint.id.clone();
            self.checkpoints.put(thread_id, checkpoint)?;
            tracing::debug!(%thread_id, checkpoint_id = %id, "state written");
            Ok(id)
        })
    }
}

/// Starting point of a run, computed before anything is streamed.
struct RunPlan {
    values: Map<String, Value>,
    frontier: Vec<String>,
    parent_id: Option<String>,
    step: u32,
    resume: Option<Value>,
    /// Skip `interrupt_before` for the first batch of nodes.
    skip_before: bool,
    input_changed: bool,
}

enum Outcome {
    Completed,
    Interrupted(String),
}

enum Halt {
    Disconnected,
    Failed(RunError),
}

impl From<Disconnected> for Halt {
    fn from(_: Disconnected) -> Self {
        Self::Disconnected
    }
}

impl From<RunError> for Halt {
    fn from(err: RunError) -> Self {
        Self::Failed(err)
    }
}

struct Run {
    graph: Arc<Graph>,
    checkpoints: Arc<MemoryCheckpointer>,
    files: ThreadFiles,
    thread_id: String,
    options: RunOptions,
    tx: EventSender,
}

impl Run {
    async fn execute(self, plan: RunPlan) {
        let thread_id = self.thread_id.clone();
        match self.drive(plan).await {
            Ok(Outcome::Completed) => tracing::info!(%thread_id, "run completed"),
            Ok(Outcome::Interrupted(node)) => {
                tracing::info!(%thread_id, %node, "run interrupted")
            }
            Err(Halt::Disconnected) => {
                tracing::info!(%thread_id, "client disconnected, run stopped")
            }
            Err(Halt::Failed(err)) => {
                tracing::warn!(%thread_id, error = %err, "run failed");
                if self.tx.fail(err).await.is_err() {
                    tracing::debug!(%thread_id, "error dropped, client already gone");
                }
            }
        }
    }

    async fn drive(&self, plan: RunPlan) -> Result<Outcome, Halt> {
        let RunPlan {
            mut values,
            mut frontier,
            mut parent_id,
            mut step,
            mut resume,
            mut skip_before,
            input_changed,
        } = plan;
        let limit = self.options.recursion_limit;
        let mut executed: u32 = 0;

        if input_changed {
            self.save(&mut parent_id, &values, frontier.clone(), None, step)?;
        }
        self.emit(StreamMode::Values, Value::Object(values.clone())).await?;

        while !frontier.is_empty() {
            if !skip_before {
                if let Some(node) = frontier.iter().find(|n| self.options.interrupts_before(n)) {
                    let node = node.clone();
                    let pending = PendingInterrupt {
                        node: node.clone(),
                        kind: InterruptKind::Before,
                        value: None,
                    };
                    self.save(&mut parent_id, &values, frontier.clone(), Some(pending), step)?;
                    return Ok(Outcome::Interrupted(node));
                }
            }
            skip_before = false;

            let mut next: Vec<String> = Vec::new();
            for (idx, name) in frontier.iter().enumerate() {
                if self.tx.is_closed() {
                    return Err(Halt::Disconnected);
                }
                if executed >= limit {
                    return Err(RunError::RecursionLimit { limit }.into());
                }
                executed += 1;
                step += 1;

                let node = self.graph.node(name).ok_or_else(|| RunError::Node {
                    node: name.clone(),
                    message: "unknown node".into(),
                })?;
                self.emit(
                    StreamMode::Debug,
                    json!({
                        "type": "task",
                        "step": step,
                        "timestamp": now_rfc3339(),
                        "payload": {"name": name, "input": values},
                    }),
                )
                .await?;

                let ctx = NodeContext {
                    thread_id: self.thread_id.clone(),
                    node: name.clone(),
                    step,
                    state: values.clone(),
                    resume: resume.take(),
                    files: self.files.clone(),
                    configurable: self.options.configurable.clone(),
                };
                let remaining = &frontier[idx + 1..];

                let output = match node.run(&ctx).await? {
                    NodeResult::Done(output) => output,
                    NodeResult::Interrupt(value) => {
                        self.emit(
                            StreamMode::Updates,
                            json!({ INTERRUPT_KEY: [{"value": value, "node": name}] }),
                        )
                        .await?;
                        let mut pending_next = vec![name.clone()];
                        extend_unique(&mut pending_next, remaining);
                        extend_unique(&mut pending_next, &next);
                        let pending = PendingInterrupt {
                            node: name.clone(),
                            kind: InterruptKind::Dynamic,
                            value: Some(value),
                        };
                        self.save(&mut parent_id, &values, pending_next, Some(pending), step)?;
                        return Ok(Outcome::Interrupted(name.clone()));
                    }
                };

                let NodeOutput {
                    update,
                    mut messages,
                    next: route,
                } = output;
                for message in &mut messages {
                    message.ensure_id();
                }

                let mut update_payload = update.clone();
                if !messages.is_empty() {
                    update_payload.insert(
                        "messages".into(),
                        Value::Array(messages.iter().map(Message::to_value).collect()),
                    );
                }
                for (key, value) in update {
                    values.insert(key, value);
                }
                append_messages(&mut values, messages.clone());

                self.emit(
                    StreamMode::Debug,
                    json!({
                        "type": "task_result",
                        "step": step,
                        "timestamp": now_rfc3339(),
                        "payload": {"name": name, "result": update_payload},
                    }),
                )
                .await?;
                self.emit(StreamMode::Updates, json!({ name.as_str(): update_payload }))
                    .await?;
                for message in &messages {
                    self.emit(
                        StreamMode::Messages,
                        json!([message.to_value(), {"langgraph_node": name, "langgraph_step": step}]),
                    )
                    .await?;
                }
                self.emit(StreamMode::Values, Value::Object(values.clone()))
                    .await?;

                let successors = match route {
                    Next::Edge => self.graph.successors(name),
                    Next::Goto(targets) => targets.into_iter().filter(|t| t != END).collect(),
                    Next::End => Vec::new(),
                };
                extend_unique(&mut next, &successors);

                let mut scheduled = remaining.to_vec();
                extend_unique(&mut scheduled, &next);
                if self.options.interrupts_after(name) {
                    let pending = PendingInterrupt {
                        node: name.clone(),
                        kind: InterruptKind::After,
                        value: None,
                    };
                    self.save(&mut parent_id, &values, scheduled, Some(pending), step)?;
                    return Ok(Outcome::Interrupted(name.clone()));
                }
                self.save(&mut parent_id, &values, scheduled, None, step)?;
            }
            frontier = next;
        }
        Ok(Outcome::Completed)
    }

    async fn emit(&self, mode: StreamMode, payload: Value) -> Result<(), Disconnected> {
        self.tx.emit(mode, payload).await
    }

    fn save(
        &self,
        parent_id: &mut Option<String>,
        values: &Map<String, Value>,
        next: Vec<String>,
        interrupt: Option<PendingInterrupt>,
        step: u32,
    ) -> Result<(), RunError> {
        let checkpoint = Checkpoint::new(parent_id.take(), values.clone(), next, interrupt, step);
        let id = checkpoint.id.clone();
        self.checkpoints
            .put(&self.thread_id, checkpoint)
            .map_err(|e| RunError::Checkpoint(e.to_string()))?;
        *parent_id = Some(id);
        Ok(())
    }
}

fn extend_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}
