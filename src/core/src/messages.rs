use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Placeholder call id for tool messages that arrive without one.
pub const UNKNOWN_TOOL_CALL_ID: &str = "unknown";

/// Conversation message, tagged by role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Human(ChatMessage),
    Ai(AiMessage),
    Tool(ToolMessage),
    System(ChatMessage),
}

/// Plain text message used by the human and system roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
}

/// Result of a tool call, answering the AI invocation with `tool_call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub tool_call_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallKind {
    #[default]
    ToolCall,
}

/// A tool call requested by an AI message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: ToolCallKind,
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Self::Human(ChatMessage {
            content: content.into(),
            name: None,
            id: None,
        })
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::System(ChatMessage {
            content: content.into(),
            name: None,
            id: None,
        })
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::Ai(AiMessage {
            content: content.into(),
            name: None,
            id: None,
            tool_calls: Vec::new(),
        })
    }

    /// Convert one raw client message.
    ///
    /// An entry that is not an object, or whose `type` is not one of
    /// human/ai/tool/system, becomes a human message whose content is the
    /// raw JSON text. Otherwise optional fields of the wrong shape are
    /// dropped one by one and the role is kept.
    pub fn from_wire(raw: &Value) -> Self {
        let Some(obj) = raw.as_object() else {
            return Self::human(raw.to_string());
        };
        let content = match obj.get("content") {
            Some(Value::String(s)) => s.clone(),
            None | Some(Value::Null) => String::new(),
            Some(other) => other.to_string(),
        };
        let name = field::<String>(obj, "name");
        let id = field::<String>(obj, "id");
        match obj.get("type").and_then(Value::as_str) {
            Some("human") => Self::Human(ChatMessage { content, name, id }),
            Some("ai") => Self::Ai(AiMessage {
                content,
                name,
                id,
                tool_calls: tool_calls(obj),
            }),
            Some("tool") => Self::Tool(ToolMessage {
                content,
                name,
                id,
                tool_call_id: field(obj, "tool_call_id")
                    .unwrap_or_else(|| UNKNOWN_TOOL_CALL_ID.to_string()),
            }),
            Some("system") => Self::System(ChatMessage { content, name, id }),
            _ => Self::human(raw.to_string()),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::Human(_) => "human",
            Self::Ai(_) => "ai",
            Self::Tool(_) => "tool",
            Self::System(_) => "system",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Human(m) | Self::System(m) => &m.content,
            Self::Ai(m) => &m.content,
            Self::Tool(m) => &m.content,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Human(m) | Self::System(m) => m.id.as_deref(),
            Self::Ai(m) => m.id.as_deref(),
            Self::Tool(m) => m.id.as_deref(),
        }
    }

    /// Assign a fresh id if the message has none.
    pub fn ensure_id(&mut self) {
        let slot = match self {
            Self::Human(m) | Self::System(m) => &mut m.id,
            Self::Ai(m) => &mut m.id,
            Self::Tool(m) => &mut m.id,
        };
        if slot.is_none() {
            *slot = Some(Uuid::new_v4().to_string());
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn field<T: DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Option<T> {
    obj.get(key)
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Well-formed entries of `tool_calls`; malformed ones are skipped.
fn tool_calls(obj: &Map<String, Value>) -> Vec<ToolInvocation> {
    obj.get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|c| serde_json::from_value(c.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Add `incoming` to the `messages` list of a state map.
///
/// A message whose id matches an existing entry replaces it in place;
/// everything else is appended. Messages without ids get one first.
pub fn append_messages(state: &mut Map<String, Value>, incoming: Vec<Message>) {
    if incoming.is_empty() {
        return;
    }
    let slot = state
        .entry("messages")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    let Value::Array(list) = slot else {
        return;
    };
    for mut msg in incoming {
        msg.ensure_id();
        let value = msg.to_value();
        let existing = list
            .iter()
            .position(|v| v.get("id").and_then(Value::as_str) == msg.id());
        match existing {
            Some(idx) => list[idx] = value,
            None => list.push(value),
        }
    }
}

/// Decode the `messages` list of a state map, skipping entries that do not
/// parse.
pub fn state_messages(state: &Map<String, Value>) -> Vec<Message> {
    state
        .get("messages")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|v| serde_json::from_value::<Message>(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn human_message_keeps_name_and_id() {
        let msg = Message::from_wire(&json!({"type": "human", "content": "hi", "name": "ann", "id": "m1"}));
        assert_eq!(
            msg,
            Message::Human(ChatMessage {
                content: "hi".into(),
                name: Some("ann".into()),
                id: Some("m1".into()),
            })
        );
    }

    #[test]
    fn ai_message_carries_tool_calls() {
        let msg = Message::from_wire(&json!({
            "type": "ai",
            "content": "",
            "tool_calls": [{"name": "web_search", "args": {"query": "rust"}, "id": "call_1"}]
        }));
        let Message::Ai(ai) = msg else {
            panic!("expected ai message");
        };
        assert_eq!(ai.tool_calls.len(), 1);
        assert_eq!(ai.tool_calls[0].name, "web_search");
        assert_eq!(ai.tool_calls[0].args["query"], "rust");
        assert_eq!(ai.tool_calls[0].id.as_deref(), Some("call_1"));
    }

    #[test]
    fn tool_call_serializes_with_type_tag() {
        let msg = Message::from_wire(&json!({
            "type": "ai",
            "content": "",
            "tool_calls": [{"name": "visit_page", "args": {}}]
        }));
        let value = msg.to_value();
        assert_eq!(value["tool_calls"][0]["type"], "tool_call");
    }

    #[test]
    fn tool_message_without_call_id_uses_placeholder() {
        let msg = Message::from_wire(&json!({"type": "tool", "content": "result"}));
        let Message::Tool(tool) = msg else {
            panic!("expected tool message");
        };
        assert_eq!(tool.tool_call_id, UNKNOWN_TOOL_CALL_ID);
    }

    #[test]
    fn unknown_role_degrades_to_raw_json_human() {
        let raw = json!({"type": "robot", "content": "beep"});
        let msg = Message::from_wire(&raw);
        assert_eq!(msg.role(), "human");
        let echoed: Value = serde_json::from_str(msg.content()).unwrap();
        assert_eq!(echoed, raw);
    }

    #[test]
    fn off_type_optional_fields_keep_the_role() {
        let msg = Message::from_wire(&json!({
            "type": "ai",
            "content": "checking",
            "id": 123,
            "name": "researcher",
            "tool_calls": "web_search"
        }));
        assert_eq!(
            msg,
            Message::Ai(AiMessage {
                content: "checking".into(),
                name: Some("researcher".into()),
                id: None,
                tool_calls: Vec::new(),
            })
        );

        let tool = Message::from_wire(&json!({"type": "tool", "content": "r", "tool_call_id": 7}));
        let Message::Tool(tool) = tool else {
            panic!("expected tool message");
        };
        assert_eq!(tool.tool_call_id, UNKNOWN_TOOL_CALL_ID);
    }

    #[test]
    fn malformed_tool_calls_are_skipped_individually() {
        let msg = Message::from_wire(&json!({
            "type": "ai",
            "content": "",
            "tool_calls": [{"args": {}}, {"name": "visit_page"}]
        }));
        let Message::Ai(ai) = msg else {
            panic!("expected ai message");
        };
        assert_eq!(ai.tool_calls.len(), 1);
        assert_eq!(ai.tool_calls[0].name, "visit_page");
    }

    #[test]
    fn non_object_entry_degrades_to_raw_json_human() {
        let msg = Message::from_wire(&json!(42));
        assert_eq!(msg, Message::human("42"));
    }

    #[test]
    fn structured_content_is_kept_as_json_text() {
        let msg = Message::from_wire(&json!({"type": "human", "content": [{"text": "a"}]}));
        assert_eq!(msg.content(), r#"[{"text":"a"}]"#);
    }

    #[test]
    fn append_assigns_ids_and_replaces_by_id() {
        let mut state = Map::new();
        append_messages(&mut state, vec![Message::human("one")]);
        let first = state_messages(&state);
        assert_eq!(first.len(), 1);
        let id = first[0].id().unwrap().to_string();

        let replacement = Message::Human(ChatMessage {
            content: "edited".into(),
            name: None,
            id: Some(id),
        });
        append_messages(&mut state, vec![replacement, Message::ai("two")]);
        let all = state_messages(&state);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].content(), "edited");
        assert_eq!(all[1].role(), "ai");
    }
}
