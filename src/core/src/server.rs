use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use delve_protocol::{RunBody, StateUpdateBody, StateUpdateResponse, ThreadStateResponse};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::executor::Executor;
use crate::framer::{frame_events, sse_response};
use crate::merge::merge_state;
use crate::request::{normalize, RunOptions};

/// Shared state accessible by handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub config: Arc<ServerConfig>,
    pub executor: Arc<dyn Executor>,
}

/// Build the axum router.
///
/// Routes:
/// - `GET  /health`
/// - `POST /threads/{thread_id}/runs/stream` (SSE)
/// - `GET  /threads/{thread_id}/state`
/// - `POST /threads/{thread_id}/state`
pub fn build_router(config: ServerConfig, executor: Arc<dyn Executor>) -> Router {
    let state = AppState {
        config: Arc::new(config),
        executor,
    };

    Router::new()
        .route("/health", get(health))
        .route("/threads/{thread_id}/runs/stream", post(stream_run))
        .route("/threads/{thread_id}/state", get(read_state).post(update_state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// The body is read as raw bytes so that a missing or malformed body still
/// starts a run.
async fn stream_run(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body = RunBody::parse_lenient(&body);
    let request = normalize(&body);
    let options = RunOptions::resolve(&thread_id, &body, &state.config)?;
    tracing::debug!(%thread_id, kind = request.kind(), "run requested");

    let events = state.executor.start(&thread_id, request, options).await?;
    Ok(sse_response(frame_events(thread_id, events)))
}

async fn read_state(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<ThreadStateResponse>, ApiError> {
    let snapshot = state
        .executor
        .get_state(&thread_id)
        .await
        .map_err(|e| ApiError::StateRead(e.to_string()))?
        .unwrap_or_default();
    Ok(Json(ThreadStateResponse {
        values: snapshot.values,
        thread_id,
        checkpoint_id: snapshot.checkpoint_id,
        next: snapshot.next,
    }))
}

async fn update_state(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let body: StateUpdateBody = if body.iter().all(u8::is_ascii_whitespace) {
        StateUpdateBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::StateUpdate(format!("invalid JSON body: {e}")))?
    };
    let outcome = merge_state(state.executor.as_ref(), &thread_id, body.values).await?;
    tracing::info!(
        %thread_id,
        durable = outcome.durable,
        checkpoint_id = %outcome.checkpoint_id,
        "state merged"
    );
    Ok(Json(StateUpdateResponse::from(outcome)).into_response())
}
