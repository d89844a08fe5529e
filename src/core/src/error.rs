use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use delve_protocol::{ErrorBody, ProtocolError};
use thiserror::Error;

use crate::executor::ExecutorError;
use crate::merge::MergeError;

/// Failures reported as a JSON body instead of a stream.
///
/// All of them render as 500 with `{ "error": <summary>, "details": <cause> }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Failed to start agent run.")]
    RunStart(String),

    #[error("Failed to update agent state.")]
    StateUpdate(String),

    #[error("Failed to read agent state.")]
    StateRead(String),
}

impl ApiError {
    pub fn details(&self) -> &str {
        match self {
            Self::RunStart(d) | Self::StateUpdate(d) | Self::StateRead(d) => d,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, details = %self.details(), "request failed");
        let body = Json(ErrorBody {
            error: self.to_string(),
            details: self.details().to_string(),
        });
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

impl From<ProtocolError> for ApiError {
    fn from(e: ProtocolError) -> Self {
        Self::RunStart(e.to_string())
    }
}

impl From<ExecutorError> for ApiError {
    fn from(e: ExecutorError) -> Self {
        Self::RunStart(e.to_string())
    }
}

impl From<MergeError> for ApiError {
    fn from(e: MergeError) -> Self {
        Self::StateUpdate(e.to_string())
    }
}
