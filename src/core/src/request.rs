use delve_protocol::{OneOrMany, ProtocolError, RunBody, StreamMode};
use serde_json::{Map, Value};

use crate::config::ServerConfig;
use crate::messages::Message;

/// Node name matching every node in interrupt lists.
pub const INTERRUPT_ALL: &str = "*";

/// What a run should do, derived from a raw request body.
#[derive(Debug, Clone, PartialEq)]
pub enum RunRequest {
    /// Append messages to the thread and run from the entry node.
    NewInput(Vec<Message>),
    /// Feed a value back into a paused execution point.
    Resume(Value),
    /// Jump to one or more nodes, optionally patching state first.
    Goto {
        targets: Vec<String>,
        update: Option<Value>,
    },
    /// Continue from the thread's last checkpoint with no new input.
    StatelessContinue,
}

impl RunRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewInput(_) => "new_input",
            Self::Resume(_) => "resume",
            Self::Goto { .. } => "goto",
            Self::StatelessContinue => "stateless_continue",
        }
    }
}

/// Pick exactly one request variant from a body.
///
/// Resume beats goto, either beats new input, and anything else (including
/// an empty body) is a stateless continue. Never fails.
pub fn normalize(body: &RunBody) -> RunRequest {
    if let Some(command) = body.command.as_ref() {
        if let Some(resume) = command.resume.as_ref().filter(|v| !is_empty_value(v)) {
            return RunRequest::Resume(resume.clone());
        }
        let targets = command
            .goto
            .clone()
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>();
        if !targets.is_empty() {
            return RunRequest::Goto {
                targets,
                update: command.update.clone(),
            };
        }
    }

    let messages = body
        .input
        .as_ref()
        .and_then(|input| input.messages.as_ref())
        .filter(|messages| !messages.is_empty());
    if let Some(messages) = messages {
        return RunRequest::NewInput(messages.iter().map(Message::from_wire).collect());
    }

    RunRequest::StatelessContinue
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Per-run execution options.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Maximum number of node executions in one run.
    pub recursion_limit: u32,
    /// Channels to stream, in request order.
    pub stream_modes: Vec<StreamMode>,
    pub interrupt_before: Vec<String>,
    pub interrupt_after: Vec<String>,
    /// Opaque key/value overlay; always carries `thread_id`.
    pub configurable: Map<String, Value>,
    /// Start from this checkpoint instead of the latest one.
    pub checkpoint_id: Option<String>,
}

impl RunOptions {
    /// Build options from a body, falling back to server defaults.
    ///
    /// Fails only on an unknown stream mode tag.
    pub fn resolve(
        thread_id: &str,
        body: &RunBody,
        defaults: &ServerConfig,
    ) -> Result<Self, ProtocolError> {
        let stream_modes = match body.stream_mode.clone() {
            Some(tags) => {
                let modes = StreamMode::parse_list(&tags.into_vec())?;
                if modes.is_empty() {
                    defaults.stream_modes.clone()
                } else {
                    modes
                }
            }
            None => defaults.stream_modes.clone(),
        };

        let config = body.config.as_ref();
        let mut configurable = config
            .and_then(|c| c.configurable.clone())
            .unwrap_or_default();
        configurable.insert("thread_id".into(), Value::String(thread_id.to_string()));

        Ok(Self {
            recursion_limit: config
                .and_then(|c| c.recursion_limit)
                .unwrap_or(defaults.recursion_limit),
            stream_modes,
            interrupt_before: body
                .interrupt_before
                .clone()
                .map(OneOrMany::into_vec)
                .unwrap_or_default(),
            interrupt_after: body
                .interrupt_after
                .clone()
                .map(OneOrMany::into_vec)
                .unwrap_or_default(),
            configurable,
            checkpoint_id: body.checkpoint_id.clone(),
        })
    }

    pub fn with_defaults(thread_id: &str, defaults: &ServerConfig) -> Self {
        let mut configurable = Map::new();
        configurable.insert("thread_id".into(), Value::String(thread_id.to_string()));
        Self {
            recursion_limit: defaults.recursion_limit,
            stream_modes: defaults.stream_modes.clone(),
            interrupt_before: Vec::new(),
            interrupt_after: Vec::new(),
            configurable,
            checkpoint_id: None,
        }
    }

    pub fn interrupts_before(&self, node: &str) -> bool {
        matches_node(&self.interrupt_before, node)
    }

    pub fn interrupts_after(&self, node: &str) -> bool {
        matches_node(&self.interrupt_after, node)
    }
}

fn matches_node(list: &[String], node: &str) -> bool {
    list.iter().any(|n| n == node || n == INTERRUPT_ALL)
}
