//! State merge: overlay a client patch onto a thread's latest values.
//!
//! Whether the result is stored depends on the executor. When it cannot
//! persist state the merged values are only echoed back, flagged with
//! `durable: false` and the [`UNCOMMITTED_CHECKPOINT`] token, and a
//! reconnecting client will not see them.

use delve_protocol::{StateUpdateResponse, UNCOMMITTED_CHECKPOINT};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::executor::{Executor, ExecutorError};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("state patch must be a JSON object, got {0}")]
    InvalidPatch(String),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub thread_id: String,
    pub values: Map<String, Value>,
    pub checkpoint_id: String,
    pub durable: bool,
}

impl From<MergeOutcome> for StateUpdateResponse {
    fn from(outcome: MergeOutcome) -> Self {
        Self {
            values: outcome.values,
            thread_id: outcome.thread_id,
            checkpoint_id: outcome.checkpoint_id,
            durable: outcome.durable,
        }
    }
}

/// Shallow overlay: top-level keys in `patch` replace those in `base`.
pub fn overlay(base: &Map<String, Value>, patch: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = base.clone();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Merge `patch` into the thread's current values.
///
/// A missing patch is an empty one. The merge is computed fully before
/// anything is written, so a failure never leaves a partial result.
pub async fn merge_state(
    executor: &dyn Executor,
    thread_id: &str,
    patch: Option<Value>,
) -> Result<MergeOutcome, MergeError> {
    let patch = match patch {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => return Err(MergeError::InvalidPatch(type_name(&other).to_string())),
    };

    let base = executor
        .get_state(thread_id)
        .await?
        .map(|snapshot| snapshot.values)
        .unwrap_or_default();
    let values = overlay(&base, &patch);

    let (checkpoint_id, durable) = if executor.supports_durable_merge() {
        let id = executor.update_state(thread_id, values.clone()).await?;
        (id, true)
    } else {
        tracing::debug!(%thread_id, "executor cannot persist state, echoing merge");
        (UNCOMMITTED_CHECKPOINT.to_string(), false)
    };

    Ok(MergeOutcome {
        thread_id: thread_id.to_string(),
        values,
        checkpoint_id,
        durable,
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{
        BoxFuture, EventStream, FnNode, Graph, GraphExecutor, NodeContext, NodeOutput, RunError,
        StateSnapshot, StreamEvent,
    };
    use crate::request::{RunOptions, RunRequest};
    use crate::storage::{MemoryTier, PathRouter};
    use serde_json::json;
    use std::sync::Arc;

    /// Read-only executor: serves a fixed snapshot, never persists.
    struct Frozen(Map<String, Value>);

    impl Executor for Frozen {
        fn start<'a>(
            &'a self,
            _thread_id: &'a str,
            _request: RunRequest,
            _options: RunOptions,
        ) -> BoxFuture<'a, Result<EventStream, ExecutorError>> {
            Box::pin(async {
                let events: EventStream =
                    Box::pin(futures::stream::empty::<Result<StreamEvent, RunError>>());
                Ok(events)
            })
        }

        fn get_state<'a>(
            &'a self,
            _thread_id: &'a str,
        ) -> BoxFuture<'a, Result<Option<StateSnapshot>, ExecutorError>> {
            Box::pin(async move {
                Ok(Some(StateSnapshot {
                    values: self.0.clone(),
                    checkpoint_id: Some("c1".into()),
                    next: Vec::new(),
                }))
            })
        }
    }

    fn graph_executor() -> GraphExecutor {
        let graph = Graph::builder()
            .node("noop", FnNode::new(|_: &NodeContext| Ok(NodeOutput::new().into())))
            .build()
            .unwrap();
        GraphExecutor::new(graph, Arc::new(PathRouter::new(Arc::new(MemoryTier::ephemeral()))))
    }

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn overlay_replaces_top_level_keys() {
        let base = obj(json!({"title": "old", "nested": {"a": 1}, "keep": true}));
        let patch = obj(json!({"title": "new", "nested": {"b": 2}}));
        let merged = overlay(&base, &patch);
        assert_eq!(
            Value::Object(merged),
            json!({"title": "new", "nested": {"b": 2}, "keep": true})
        );
    }

    #[test]
    fn overlay_is_idempotent() {
        let base = obj(json!({"a": 1}));
        let patch = obj(json!({"a": 2, "b": [1, 2]}));
        let once = overlay(&base, &patch);
        assert_eq!(overlay(&once, &patch), once);
    }

    #[tokio::test]
    async fn new_thread_gets_the_patch() {
        let exec = graph_executor();
        let outcome = merge_state(&exec, "fresh", Some(json!({"title": "draft"})))
            .await
            .unwrap();
        assert_eq!(Value::Object(outcome.values), json!({"title": "draft"}));
        assert!(outcome.durable);
        assert_ne!(outcome.checkpoint_id, UNCOMMITTED_CHECKPOINT);

        let stored = exec.get_state("fresh").await.unwrap().unwrap();
        assert_eq!(stored.values["title"], "draft");
        assert_eq!(stored.checkpoint_id.as_deref(), Some(outcome.checkpoint_id.as_str()));
    }

    #[tokio::test]
    async fn merging_twice_matches_merging_once() {
        let exec = graph_executor();
        let patch = json!({"title": "draft", "tags": ["a"]});
        let first = merge_state(&exec, "t1", Some(patch.clone())).await.unwrap();
        let second = merge_state(&exec, "t1", Some(patch)).await.unwrap();
        assert_eq!(first.values, second.values);
    }

    #[tokio::test]
    async fn non_durable_executor_echoes_with_placeholder() {
        let exec = Frozen(obj(json!({"title": "old", "n": 1})));
        let outcome = merge_state(&exec, "t1", Some(json!({"title": "new"})))
            .await
            .unwrap();
        assert!(!outcome.durable);
        assert_eq!(outcome.checkpoint_id, UNCOMMITTED_CHECKPOINT);
        assert_eq!(Value::Object(outcome.values), json!({"title": "new", "n": 1}));

        let after = exec.get_state("t1").await.unwrap().unwrap();
        assert_eq!(after.values["title"], "old");
    }

    #[tokio::test]
    async fn missing_patch_returns_current_values() {
        let exec = Frozen(obj(json!({"a": 1})));
        let outcome = merge_state(&exec, "t1", None).await.unwrap();
        assert_eq!(Value::Object(outcome.values), json!({"a": 1}));
    }

    #[tokio::test]
    async fn non_object_patch_is_rejected_without_writing() {
        let exec = graph_executor();
        let err = merge_state(&exec, "t1", Some(json!([1, 2]))).await.unwrap_err();
        assert!(matches!(err, MergeError::InvalidPatch(_)));
        assert!(exec.get_state("t1").await.unwrap().is_none());
    }
}
