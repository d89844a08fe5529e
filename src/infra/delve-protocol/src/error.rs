use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown stream mode: {0}")]
    UnknownStreamMode(String),

    #[error("malformed sse frame: {0}")]
    MalformedFrame(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
