use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use delve_protocol::{ProtocolError, SseFrame};
use futures::{Stream, StreamExt};

use crate::executor::{EventStream, StreamEvent};

/// Lifecycle of one framed stream.
///
/// `Idle → Streaming* → (Completed | Failed)`. Both terminal states
/// absorb every further input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramerState {
    Idle,
    Streaming,
    Completed,
    Failed,
}

/// What the framer just pulled from the event feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameInput {
    Event,
    Exhausted,
    Error,
}

impl FramerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn advance(self, input: FrameInput) -> Self {
        if self.is_terminal() {
            return self;
        }
        match input {
            FrameInput::Event => Self::Streaming,
            FrameInput::Exhausted => Self::Completed,
            FrameInput::Error => Self::Failed,
        }
    }
}

/// Frame one event, labelled by its channel tag.
pub fn frame_event(event: &StreamEvent) -> Result<SseFrame, ProtocolError> {
    SseFrame::json(event.mode.as_str(), &event.payload)
}

/// Turn a run's event feed into SSE bytes.
///
/// Every event becomes one frame, in order, followed by exactly one
/// terminal frame: `end` when the feed runs out, `error` on the first
/// failure. Nothing is pulled or written after the terminal frame, and
/// dropping the returned stream drops the feed with it.
pub fn frame_events(
    thread_id: String,
    events: EventStream,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    futures::stream::unfold(
        (FramerState::Idle, events, thread_id),
        |(state, mut events, thread_id)| async move {
            if state.is_terminal() {
                return None;
            }
            let (frame, next) = match events.next().await {
                Some(Ok(event)) => match frame_event(&event) {
                    Ok(frame) => (frame, state.advance(FrameInput::Event)),
                    Err(err) => {
                        tracing::warn!(%thread_id, error = %err, "event could not be framed");
                        (SseFrame::error(&err.to_string()), state.advance(FrameInput::Error))
                    }
                },
                Some(Err(err)) => {
                    tracing::warn!(%thread_id, error = %err, "stream ended with error");
                    (SseFrame::error(&err.to_string()), state.advance(FrameInput::Error))
                }
                None => {
                    tracing::debug!(%thread_id, "stream completed");
                    (SseFrame::end(), state.advance(FrameInput::Exhausted))
                }
            };
            Some((Ok(Bytes::from(frame.encode())), (next, events, thread_id)))
        },
    )
}

pub fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}
