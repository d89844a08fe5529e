use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Checkpoint token returned by a state update that was not persisted.
pub const UNCOMMITTED_CHECKPOINT: &str = "uncommitted";

/// A single value or an ordered list of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(v) => vec![v],
            Self::Many(v) => v,
        }
    }
}

/// Body of `POST /threads/{thread_id}/runs/stream`.
///
/// Every field is optional. Use [`RunBody::parse_lenient`] on untrusted
/// input: a field with the wrong shape is dropped instead of failing the
/// whole body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<RunInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<RunCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<RunConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_before: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupt_after: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_mode: Option<OneOrMany<String>>,
}

/// New input for a run. Messages stay raw JSON until normalized so that
/// entries with an unknown role can still be carried through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Value>>,
}

/// Control command for a paused or existing run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goto: Option<OneOrMany<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configurable: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursion_limit: Option<u32>,
}

impl RunBody {
    /// Parse raw request bytes without ever failing.
    ///
    /// Empty or non-JSON input yields an empty body.
    pub fn parse_lenient(raw: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(raw) {
            Ok(value) => Self::from_value_lenient(&value),
            Err(_) => Self::default(),
        }
    }

    /// Extract each known field independently, dropping the ones that do
    /// not have the expected shape.
    pub fn from_value_lenient(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        Self {
            input: obj.get("input").and_then(Value::as_object).map(|input| RunInput {
                messages: field(input, "messages"),
            }),
            command: obj
                .get("command")
                .and_then(Value::as_object)
                .map(|command| RunCommand {
                    resume: present(command, "resume"),
                    goto: field(command, "goto"),
                    update: present(command, "update"),
                }),
            config: obj.get("config").and_then(Value::as_object).map(|config| RunConfig {
                configurable: field(config, "configurable"),
                recursion_limit: field(config, "recursion_limit"),
            }),
            checkpoint_id: field(obj, "checkpoint_id"),
            interrupt_before: field(obj, "interrupt_before"),
            interrupt_after: field(obj, "interrupt_after"),
            stream_mode: field(obj, "stream_mode"),
        }
    }
}

fn present(obj: &Map<String, Value>, key: &str) -> Option<Value> {
    obj.get(key).filter(|v| !v.is_null()).cloned()
}

fn field<T: DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Option<T> {
    present(obj, key).and_then(|v| serde_json::from_value(v).ok())
}

/// Body of `POST /threads/{thread_id}/state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateUpdateBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
}

/// Reply to a state update.
///
/// `durable` is false when the executor cannot persist merges; in that case
/// `checkpoint_id` is [`UNCOMMITTED_CHECKPOINT`] and the merged values are
/// an echo only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdateResponse {
    pub values: Map<String, Value>,
    pub thread_id: String,
    pub checkpoint_id: String,
    pub durable: bool,
}

/// Reply to `GET /threads/{thread_id}/state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadStateResponse {
    pub values: Map<String, Value>,
    pub thread_id: String,
    pub checkpoint_id: Option<String>,
    #[serde(default)]
    pub next: Vec<String>,
}

/// JSON body of a non-streaming failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_and_garbage_bodies_parse_to_default() {
        assert_eq!(RunBody::parse_lenient(b""), RunBody::default());
        assert_eq!(RunBody::parse_lenient(b"not json"), RunBody::default());
        assert_eq!(RunBody::parse_lenient(b"[1,2]"), RunBody::default());
    }

    #[test]
    fn wrong_shaped_fields_are_dropped() {
        let body = RunBody::from_value_lenient(&json!({
            "input": {"messages": "hello"},
            "config": {"recursion_limit": "ten", "configurable": {"user": "a"}},
            "stream_mode": 5,
        }));
        assert_eq!(body.input, Some(RunInput { messages: None }));
        let config = body.config.unwrap();
        assert_eq!(config.recursion_limit, None);
        assert_eq!(config.configurable.unwrap()["user"], "a");
        assert!(body.stream_mode.is_none());
    }

    #[test]
    fn stream_mode_accepts_string_or_list() {
        let one = RunBody::from_value_lenient(&json!({"stream_mode": "values"}));
        assert_eq!(one.stream_mode.unwrap().into_vec(), vec!["values"]);
        let many = RunBody::from_value_lenient(&json!({"stream_mode": ["values", "debug"]}));
        assert_eq!(many.stream_mode.unwrap().into_vec(), vec!["values", "debug"]);
    }

    #[test]
    fn null_resume_is_absent() {
        let body = RunBody::from_value_lenient(&json!({"command": {"resume": null, "goto": "agent"}}));
        let command = body.command.unwrap();
        assert!(command.resume.is_none());
        assert_eq!(command.goto, Some(OneOrMany::One("agent".into())));
    }

    #[test]
    fn state_update_response_serializes_all_fields() {
        let resp = StateUpdateResponse {
            values: Map::new(),
            thread_id: "t1".into(),
            checkpoint_id: UNCOMMITTED_CHECKPOINT.into(),
            durable: false,
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["checkpoint_id"], "uncommitted");
        assert_eq!(value["durable"], false);
    }
}
