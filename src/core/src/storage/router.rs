use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
    normalize_file_path, normalize_prefix, FileInfo, FileRecord, StorageError, StorageTier,
};

struct RouteBinding {
    prefix: String,
    tier: Arc<dyn StorageTier>,
}

/// Presents several storage tiers as one virtual namespace.
///
/// A path goes to the tier bound to its longest matching prefix, or to the
/// default tier when nothing matches. Only that one tier is ever touched
/// for a read, write or delete.
///
/// There are no cross-tier transactions: [`PathRouter::move_file`] is a
/// read, a write and a delete, and a failure part way leaves whatever the
/// earlier steps did in place.
pub struct PathRouter {
    default: Arc<dyn StorageTier>,
    /// Sorted by prefix length, longest first.
    routes: Vec<RouteBinding>,
}

impl PathRouter {
    pub fn new(default: Arc<dyn StorageTier>) -> Self {
        Self {
            default,
            routes: Vec::new(),
        }
    }

    /// Bind `prefix` (normalized to end in `/`) to `tier`, replacing any
    /// earlier binding for the same prefix.
    pub fn with_route(
        mut self,
        prefix: &str,
        tier: Arc<dyn StorageTier>,
    ) -> Result<Self, StorageError> {
        let prefix = normalize_prefix(prefix)?;
        self.routes.retain(|r| r.prefix != prefix);
        self.routes.push(RouteBinding { prefix, tier });
        self.routes
            .sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()).then(a.prefix.cmp(&b.prefix)));
        Ok(self)
    }

    /// Registered prefixes, longest first.
    pub fn prefixes(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.prefix.as_str()).collect()
    }

    /// Tier responsible for `path`.
    pub fn resolve(&self, path: &str) -> &Arc<dyn StorageTier> {
        self.routes
            .iter()
            .find(|r| path.starts_with(&r.prefix))
            .map(|r| &r.tier)
            .unwrap_or(&self.default)
    }

    pub fn read(&self, thread_id: &str, path: &str) -> Result<Option<FileRecord>, StorageError> {
        let path = normalize_file_path(path)?;
        self.resolve(&path).read(thread_id, &path)
    }

    pub fn write(
        &self,
        thread_id: &str,
        path: &str,
        content: &str,
    ) -> Result<FileRecord, StorageError> {
        let path = normalize_file_path(path)?;
        let tier = self.resolve(&path);
        tracing::debug!(%thread_id, %path, tier = tier.label(), "write file");
        tier.write(thread_id, &path, content)
    }

    /// Files under `prefix` across every tier that can hold them.
    ///
    /// Entries are taken from the tier resolving `prefix` plus every tier
    /// bound below it, and kept only where they resolve back to the tier
    /// they came from.
    pub fn list(&self, thread_id: &str, prefix: &str) -> Result<Vec<FileInfo>, StorageError> {
        let prefix = normalize_prefix(prefix)?;
        let mut sources: Vec<&Arc<dyn StorageTier>> = vec![self.resolve(&prefix)];
        for route in &self.routes {
            if route.prefix.starts_with(&prefix) && route.prefix != prefix {
                sources.push(&route.tier);
            }
        }

        let mut merged = BTreeMap::new();
        for source in sources {
            for entry in source.list(thread_id, &prefix)? {
                if same_tier(self.resolve(&entry.path), source) {
                    merged.insert(entry.path.clone(), entry);
                }
            }
        }
        Ok(merged.into_values().collect())
    }

    pub fn delete(&self, thread_id: &str, path: &str) -> Result<bool, StorageError> {
        let path = normalize_file_path(path)?;
        let tier = self.resolve(&path);
        tracing::debug!(%thread_id, %path, tier = tier.label(), "delete file");
        tier.delete(thread_id, &path)
    }

    /// Move a file, possibly across tiers. Not atomic.
    pub fn move_file(&self, thread_id: &str, from: &str, to: &str) -> Result<FileRecord, StorageError> {
        let record = self
            .read(thread_id, from)?
            .ok_or_else(|| StorageError::NotFound(from.to_string()))?;
        let written = self.write(thread_id, to, &record.content)?;
        if normalize_file_path(from)? != normalize_file_path(to)? {
            self.delete(thread_id, from)?;
        }
        Ok(written)
    }

    /// Drop the thread's files from every ephemeral tier.
    pub fn clear_thread(&self, thread_id: &str) -> Result<(), StorageError> {
        self.default.clear_thread(thread_id)?;
        for route in &self.routes {
            route.tier.clear_thread(thread_id)?;
        }
        Ok(())
    }

    /// Handle bound to one thread.
    pub fn for_thread(self: &Arc<Self>, thread_id: &str) -> ThreadFiles {
        ThreadFiles {
            router: self.clone(),
            thread_id: thread_id.to_string(),
        }
    }
}

fn same_tier(a: &Arc<dyn StorageTier>, b: &Arc<dyn StorageTier>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// A [`PathRouter`] with the thread id filled in.
#[derive(Clone)]
pub struct ThreadFiles {
    router: Arc<PathRouter>,
    thread_id: String,
}

impl ThreadFiles {
    pub fn read(&self, path: &str) -> Result<Option<FileRecord>, StorageError> {
        self.router.read(&self.thread_id, path)
    }

    pub fn read_content(&self, path: &str) -> Result<String, StorageError> {
        self.read(path)?
            .map(|r| r.content)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    pub fn write(&self, path: &str, content: &str) -> Result<FileRecord, StorageError> {
        self.router.write(&self.thread_id, path, content)
    }

    pub fn list(&self, prefix: &str) -> Result<Vec<FileInfo>, StorageError> {
        self.router.list(&self.thread_id, prefix)
    }

    pub fn delete(&self, path: &str) -> Result<bool, StorageError> {
        self.router.delete(&self.thread_id, path)
    }

    pub fn move_file(&self, from: &str, to: &str) -> Result<FileRecord, StorageError> {
        self.router.move_file(&self.thread_id, from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryTier, TierKind};

    fn tiers() -> (Arc<dyn StorageTier>, Arc<dyn StorageTier>) {
        (Arc::new(MemoryTier::ephemeral()), Arc::new(MemoryTier::shared()))
    }

    #[test]
    fn resolve_uses_longest_prefix() {
        let (scratch, memories) = tiers();
        let archive: Arc<dyn StorageTier> = Arc::new(MemoryTier::shared());
        let router = PathRouter::new(scratch.clone())
            .with_route("/memories/", memories.clone())
            .unwrap()
            .with_route("/memories/archive", archive.clone())
            .unwrap();

        assert!(same_tier(router.resolve("/notes.md"), &scratch));
        assert!(same_tier(router.resolve("/memories/x.md"), &memories));
        assert!(same_tier(router.resolve("/memories/archive/y.md"), &archive));
        assert!(same_tier(router.resolve("/memoriesx.md"), &scratch));
        assert_eq!(router.prefixes(), vec!["/memories/archive/", "/memories/"]);
    }

    #[test]
    fn rebinding_a_prefix_replaces_it() {
        let (scratch, memories) = tiers();
        let other: Arc<dyn StorageTier> = Arc::new(MemoryTier::shared());
        let router = PathRouter::new(scratch)
            .with_route("/memories/", memories)
            .unwrap()
            .with_route("/memories", other.clone())
            .unwrap();
        assert_eq!(router.prefixes().len(), 1);
        assert!(same_tier(router.resolve("/memories/a.md"), &other));
    }

    #[test]
    fn writes_stay_in_the_resolved_tier() {
        let (scratch, memories) = tiers();
        let router = PathRouter::new(scratch.clone())
            .with_route("/memories/", memories.clone())
            .unwrap();
        router.write("t1", "/memories/x.md", "durable").unwrap();
        assert!(scratch.read("t1", "/memories/x.md").unwrap().is_none());
        assert_eq!(
            memories.read("t1", "/memories/x.md").unwrap().unwrap().content,
            "durable"
        );
        assert_eq!(memories.kind(), TierKind::Durable);
    }

    #[test]
    fn root_listing_merges_tiers() {
        let (scratch, memories) = tiers();
        let router = Arc::new(
            PathRouter::new(scratch)
                .with_route("/memories/", memories)
                .unwrap(),
        );
        let files = router.for_thread("t1");
        files.write("/scratch.md", "a").unwrap();
        files.write("/memories/keep.md", "b").unwrap();
        router.for_thread("t2").write("/other.md", "c").unwrap();

        let listed: Vec<String> = files.list("/").unwrap().into_iter().map(|f| f.path).collect();
        assert_eq!(listed, vec!["/memories/keep.md", "/scratch.md"]);

        let durable_only: Vec<String> = files
            .list("/memories")
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(durable_only, vec!["/memories/keep.md"]);
    }

    #[test]
    fn shared_tier_bound_twice_lists_once() {
        let (scratch, memories) = tiers();
        let router = PathRouter::new(scratch)
            .with_route("/memories/", memories.clone())
            .unwrap()
            .with_route("/archive/", memories)
            .unwrap();
        router.write("t1", "/memories/a.md", "x").unwrap();
        router.write("t1", "/archive/b.md", "y").unwrap();
        let listed = router.list("t1", "/").unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn move_across_tiers() {
        let (scratch, memories) = tiers();
        let router = PathRouter::new(scratch.clone())
            .with_route("/memories/", memories.clone())
            .unwrap();
        router.write("t1", "/draft.md", "report").unwrap();
        router.move_file("t1", "/draft.md", "/memories/report.md").unwrap();
        assert!(router.read("t1", "/draft.md").unwrap().is_none());
        assert_eq!(
            router.read("t2", "/memories/report.md").unwrap().unwrap().content,
            "report"
        );
    }

    #[test]
    fn move_missing_source_fails_without_writing() {
        let (scratch, memories) = tiers();
        let router = PathRouter::new(scratch)
            .with_route("/memories/", memories.clone())
            .unwrap();
        let err = router.move_file("t1", "/nope.md", "/memories/x.md").unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(memories.read("t1", "/memories/x.md").unwrap().is_none());
    }

    #[test]
    fn move_onto_itself_keeps_file() {
        let (scratch, _) = tiers();
        let router = PathRouter::new(scratch);
        router.write("t1", "/a.md", "x").unwrap();
        router.move_file("t1", "/a.md", "/a.md").unwrap();
        assert!(router.read("t1", "/a.md").unwrap().is_some());
    }

    #[test]
    fn clear_thread_spares_durable_files() {
        let (scratch, memories) = tiers();
        let router = PathRouter::new(scratch)
            .with_route("/memories/", memories)
            .unwrap();
        router.write("t1", "/scratch.md", "a").unwrap();
        router.write("t1", "/memories/keep.md", "b").unwrap();
        router.clear_thread("t1").unwrap();
        assert!(router.read("t1", "/scratch.md").unwrap().is_none());
        assert!(router.read("t1", "/memories/keep.md").unwrap().is_some());
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let (scratch, _) = tiers();
        let router = PathRouter::new(scratch);
        assert!(matches!(
            router.write("t1", "relative.md", "x"),
            Err(StorageError::InvalidPath(_))
        ));
    }
}
