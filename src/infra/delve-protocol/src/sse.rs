use serde::Serialize;
use serde_json::json;

use crate::ProtocolError;

/// Event label of the terminal frame sent after a run completes.
pub const END_EVENT: &str = "end";
/// Event label of the terminal frame sent after a run fails.
pub const ERROR_EVENT: &str = "error";

/// One server-sent-events frame.
///
/// ```text
/// event: <label>\n
/// data: <json>\n
/// \n
/// ```
///
/// Multi-line data is split across several `data:` lines, which a
/// conforming client rejoins with `\n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Event label (a stream-mode tag, `end`, or `error`).
    pub event: String,
    /// Raw data payload, normally JSON text.
    pub data: String,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Build a frame whose data is `payload` serialized as JSON.
    pub fn json<T: Serialize + ?Sized>(
        event: impl Into<String>,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        Ok(Self::new(event, serde_json::to_string(payload)?))
    }

    /// Terminal frame for a completed run.
    pub fn end() -> Self {
        Self::new(END_EVENT, "{}")
    }

    /// Terminal frame for a failed run.
    pub fn error(message: &str) -> Self {
        Self::new(ERROR_EVENT, json!({ "message": message }).to_string())
    }

    pub fn is_terminal(&self) -> bool {
        self.event == END_EVENT || self.event == ERROR_EVENT
    }

    /// Encode into the text/event-stream wire form.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.event.len() + self.data.len() + 16);
        out.push_str("event: ");
        out.push_str(&self.event);
        out.push('\n');
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Decode a complete text/event-stream body into frames.
///
/// Comment lines (`:`) are skipped. A frame without an `event:` line is
/// labelled `message`, as browsers do.
pub fn decode_frames(text: &str) -> Result<Vec<SseFrame>, ProtocolError> {
    let mut frames = Vec::new();
    for block in text.split("\n\n") {
        if block.trim().is_empty() {
            continue;
        }
        let mut event = None;
        let mut data: Vec<&str> = Vec::new();
        for line in block.lines() {
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event = Some(value.to_string()),
                "data" => data.push(value),
                "id" | "retry" => {}
                other => return Err(ProtocolError::MalformedFrame(other.to_string())),
            }
        }
        frames.push(SseFrame {
            event: event.unwrap_or_else(|| "message".to_string()),
            data: data.join("\n"),
        });
    }
    Ok(frames)
}
