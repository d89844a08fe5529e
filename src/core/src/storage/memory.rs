use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use super::{FileInfo, FileRecord, StorageError, StorageTier, TierKind};

/// Key used for every thread when the tier is shared.
const SHARED_SCOPE: &str = "";

/// In-memory tier.
///
/// [`MemoryTier::ephemeral`] keeps one file map per thread (the default
/// tier behind `/`). [`MemoryTier::shared`] keeps a single global map that
/// lives as long as the process, which is handy as a durable stand-in for
/// tests.
pub struct MemoryTier {
    kind: TierKind,
    label: String,
    files: RwLock<HashMap<String, BTreeMap<String, FileRecord>>>,
}

impl MemoryTier {
    pub fn ephemeral() -> Self {
        Self {
            kind: TierKind::Ephemeral,
            label: "state".to_string(),
            files: RwLock::new(HashMap::new()),
        }
    }

    pub fn shared() -> Self {
        Self {
            kind: TierKind::Durable,
            label: "shared-memory".to_string(),
            files: RwLock::new(HashMap::new()),
        }
    }

    fn scope<'a>(&self, thread_id: &'a str) -> &'a str {
        match self.kind {
            TierKind::Ephemeral => thread_id,
            TierKind::Durable => SHARED_SCOPE,
        }
    }
}

impl StorageTier for MemoryTier {
    fn kind(&self) -> TierKind {
        self.kind
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn read(&self, thread_id: &str, path: &str) -> Result<Option<FileRecord>, StorageError> {
        let files = self
            .files
            .read()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        Ok(files
            .get(self.scope(thread_id))
            .and_then(|scope| scope.get(path))
            .cloned())
    }

    fn write(
        &self,
        thread_id: &str,
        path: &str,
        content: &str,
    ) -> Result<FileRecord, StorageError> {
        let mut files = self
            .files
            .write()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        let scope = files.entry(self.scope(thread_id).to_string()).or_default();
        let record = match scope.get(path) {
            Some(existing) => existing.updated(content),
            None => FileRecord::new(content),
        };
        scope.insert(path.to_string(), record.clone());
        Ok(record)
    }

    fn list(&self, thread_id: &str, prefix: &str) -> Result<Vec<FileInfo>, StorageError> {
        let files = self
            .files
            .read()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        let Some(scope) = files.get(self.scope(thread_id)) else {
            return Ok(Vec::new());
        };
        Ok(scope
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, record)| FileInfo::from_record(path, record))
            .collect())
    }

    fn delete(&self, thread_id: &str, path: &str) -> Result<bool, StorageError> {
        let mut files = self
            .files
            .write()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        Ok(files
            .get_mut(self.scope(thread_id))
            .and_then(|scope| scope.remove(path))
            .is_some())
    }

    fn clear_thread(&self, thread_id: &str) -> Result<(), StorageError> {
        if self.kind == TierKind::Durable {
            return Ok(());
        }
        let mut files = self
            .files
            .write()
            .map_err(|e| StorageError::Lock(e.to_string()))?;
        files.remove(thread_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_files_are_thread_scoped() {
        let tier = MemoryTier::ephemeral();
        tier.write("t1", "/notes.md", "one").unwrap();
        assert_eq!(tier.read("t1", "/notes.md").unwrap().unwrap().content, "one");
        assert!(tier.read("t2", "/notes.md").unwrap().is_none());
    }

    #[test]
    fn shared_files_ignore_thread() {
        let tier = MemoryTier::shared();
        tier.write("t1", "/memories/a.md", "kept").unwrap();
        assert_eq!(
            tier.read("t2", "/memories/a.md").unwrap().unwrap().content,
            "kept"
        );
    }

    #[test]
    fn list_filters_by_prefix_in_order() {
        let tier = MemoryTier::ephemeral();
        tier.write("t1", "/b/2.md", "x").unwrap();
        tier.write("t1", "/a/1.md", "y").unwrap();
        tier.write("t1", "/b/1.md", "zz").unwrap();
        let listed = tier.list("t1", "/b/").unwrap();
        let paths: Vec<&str> = listed.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/b/1.md", "/b/2.md"]);
        assert_eq!(listed[0].size, 2);
    }

    #[test]
    fn delete_reports_existence() {
        let tier = MemoryTier::ephemeral();
        tier.write("t1", "/x.md", "x").unwrap();
        assert!(tier.delete("t1", "/x.md").unwrap());
        assert!(!tier.delete("t1", "/x.md").unwrap());
    }

    #[test]
    fn clear_thread_only_touches_that_thread() {
        let tier = MemoryTier::ephemeral();
        tier.write("t1", "/x.md", "x").unwrap();
        tier.write("t2", "/x.md", "y").unwrap();
        tier.clear_thread("t1").unwrap();
        assert!(tier.read("t1", "/x.md").unwrap().is_none());
        assert!(tier.read("t2", "/x.md").unwrap().is_some());
    }

    #[test]
    fn shared_tier_survives_clear_thread() {
        let tier = MemoryTier::shared();
        tier.write("t1", "/m.md", "x").unwrap();
        tier.clear_thread("t1").unwrap();
        assert!(tier.read("t1", "/m.md").unwrap().is_some());
    }
}
