use std::collections::HashMap;
use std::sync::RwLock;

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use super::ExecutorError;
use crate::storage::now_rfc3339;

/// Why a run stopped without reaching the end of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    /// Configured static interrupt before `node` ran.
    Before,
    /// Configured static interrupt after `node` ran.
    After,
    /// `node` asked for outside input.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingInterrupt {
    pub node: String,
    pub kind: InterruptKind,
    /// Payload a dynamic interrupt handed to the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Thread state saved after a step, an interrupt, or an external write.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Checkpoint {
    pub id: String,
    pub parent_id: Option<String>,
    pub values: Map<String, Value>,
    /// Nodes scheduled to run when the thread continues.
    pub next: Vec<String>,
    pub interrupt: Option<PendingInterrupt>,
    pub step: u32,
    pub created_at: String,
}

impl Checkpoint {
    pub fn new(
        parent_id: Option<String>,
        values: Map<String, Value>,
        next: Vec<String>,
        interrupt: Option<PendingInterrupt>,
        step: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            parent_id,
            values,
            next,
            interrupt,
            step,
            created_at: now_rfc3339(),
        }
    }
}

/// Checkpoints kept per thread unless configured otherwise.
pub const DEFAULT_CHECKPOINT_RETENTION: usize = 64;

/// Per-thread checkpoint history held in process memory.
///
/// Each thread keeps at most `retention` checkpoints. Older ones are
/// dropped on `put`, after which `get` no longer finds them.
pub struct MemoryCheckpointer {
    threads: RwLock<HashMap<String, Vec<Checkpoint>>>,
    retention: usize,
}

impl Default for MemoryCheckpointer {
    fn default() -> Self {
        Self::with_retention(DEFAULT_CHECKPOINT_RETENTION)
    }
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retention` checkpoints per thread (minimum 1).
    pub fn with_retention(retention: usize) -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            retention: retention.max(1),
        }
    }

    pub fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, ExecutorError> {
        let threads = self
            .threads
            .read()
            .map_err(|e| ExecutorError::Checkpoint(e.to_string()))?;
        Ok(threads.get(thread_id).and_then(|h| h.last()).cloned())
    }

    pub fn get(
        &self,
        thread_id: &str,
        checkpoint_id: &str,
    ) -> Result<Option<Checkpoint>, ExecutorError> {
        let threads = self
            .threads
            .read()
            .map_err(|e| ExecutorError::Checkpoint(e.to_string()))?;
        Ok(threads
            .get(thread_id)
            .and_then(|h| h.iter().find(|c| c.id == checkpoint_id))
            .cloned())
    }

    /// Append to the thread's history; the new checkpoint becomes latest.
    pub fn put(&self, thread_id: &str, checkpoint: Checkpoint) -> Result<(), ExecutorError> {
        let mut threads = self
            .threads
            .write()
            .map_err(|e| ExecutorError::Checkpoint(e.to_string()))?;
        let history = threads.entry(thread_id.to_string()).or_default();
        history.push(checkpoint);
        if history.len() > self.retention {
            let excess = history.len() - self.retention;
            history.drain(..excess);
        }
        Ok(())
    }

    /// Oldest first.
    pub fn history(&self, thread_id: &str) -> Result<Vec<Checkpoint>, ExecutorError> {
        let threads = self
            .threads
            .read()
            .map_err(|e| ExecutorError::Checkpoint(e.to_string()))?;
        Ok(threads.get(thread_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn latest_is_last_put() {
        let store = MemoryCheckpointer::new();
        assert!(store.latest("t1").unwrap().is_none());

        let first = Checkpoint::new(None, values(json!({"a": 1})), vec![], None, 0);
        let second = Checkpoint::new(
            Some(first.id.clone()),
            values(json!({"a": 2})),
            vec!["draft".into()],
            None,
            1,
        );
        store.put("t1", first.clone()).unwrap();
        store.put("t1", second.clone()).unwrap();

        assert_eq!(store.latest("t1").unwrap().unwrap().id, second.id);
        assert_eq!(store.get("t1", &first.id).unwrap().unwrap().values["a"], 1);
        assert_eq!(store.history("t1").unwrap().len(), 2);
        assert!(store.latest("t2").unwrap().is_none());
    }

    #[test]
    fn history_is_capped_at_retention() {
        let store = MemoryCheckpointer::with_retention(2);
        let ids: Vec<String> = (0..3)
            .map(|step| {
                let cp = Checkpoint::new(None, values(json!({"step": step})), vec![], None, step);
                let id = cp.id.clone();
                store.put("t1", cp).unwrap();
                id
            })
            .collect();

        let kept: Vec<String> = store.history("t1").unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(kept, ids[1..].to_vec());
        assert!(store.get("t1", &ids[0]).unwrap().is_none());
        assert_eq!(store.latest("t1").unwrap().unwrap().id, ids[2]);
    }

    #[test]
    fn lookups_are_thread_scoped() {
        let store = MemoryCheckpointer::new();
        let cp = Checkpoint::new(None, Map::new(), vec![], None, 0);
        store.put("t1", cp.clone()).unwrap();
        assert!(store.get("t2", &cp.id).unwrap().is_none());
    }
}
