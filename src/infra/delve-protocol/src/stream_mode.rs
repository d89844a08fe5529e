use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Output channel a run can stream.
///
/// The tag doubles as the SSE `event:` label of every frame produced for
/// that channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Full state snapshot after each step.
    Values,
    /// Individual messages emitted by a node.
    Messages,
    /// Per-node state updates.
    Updates,
    /// Task start/result traces.
    Debug,
}

/// Modes streamed when the request names none.
pub const DEFAULT_STREAM_MODES: [StreamMode; 4] = [
    StreamMode::Values,
    StreamMode::Messages,
    StreamMode::Updates,
    StreamMode::Debug,
];

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Values => "values",
            Self::Messages => "messages",
            Self::Updates => "updates",
            Self::Debug => "debug",
        }
    }

    /// Parse an ordered list of tags, dropping duplicates but keeping the
    /// first occurrence's position.
    pub fn parse_list<S: AsRef<str>>(tags: &[S]) -> Result<Vec<Self>, ProtocolError> {
        let mut modes = Vec::with_capacity(tags.len());
        for tag in tags {
            let mode = tag.as_ref().parse::<Self>()?;
            if !modes.contains(&mode) {
                modes.push(mode);
            }
        }
        Ok(modes)
    }
}

impl FromStr for StreamMode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "values" => Ok(Self::Values),
            "messages" => Ok(Self::Messages),
            "updates" => Ok(Self::Updates),
            "debug" => Ok(Self::Debug),
            other => Err(ProtocolError::UnknownStreamMode(other.to_string())),
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
