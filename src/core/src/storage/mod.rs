mod memory;
mod router;
mod sqlite;

pub use memory::MemoryTier;
pub use router::{PathRouter, ThreadFiles};
pub use sqlite::SqliteTier;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("lock poisoned: {0}")]
    Lock(String),

    #[error("storage backend: {0}")]
    Backend(String),
}

/// Visibility and lifetime of a tier's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// Scoped to one thread; gone when the thread's files are cleared.
    Ephemeral,
    /// Global namespace shared by every thread.
    Durable,
}

/// Stored file content plus timestamps (RFC 3339).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub content: String,
    pub created_at: String,
    pub modified_at: String,
}

impl FileRecord {
    pub fn new(content: impl Into<String>) -> Self {
        let now = now_rfc3339();
        Self {
            content: content.into(),
            created_at: now.clone(),
            modified_at: now,
        }
    }

    /// Replace the content, keeping `created_at`.
    pub fn updated(&self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            created_at: self.created_at.clone(),
            modified_at: now_rfc3339(),
        }
    }
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub modified_at: String,
}

impl FileInfo {
    pub fn from_record(path: &str, record: &FileRecord) -> Self {
        Self {
            path: path.to_string(),
            size: record.content.len() as u64,
            modified_at: record.modified_at.clone(),
        }
    }
}

/// One storage tier behind the [`PathRouter`].
///
/// Every call carries the thread id; ephemeral tiers scope by it, durable
/// tiers ignore it. Paths handed to a tier are already normalized.
/// All methods use `&self`, so implementations handle their own interior
/// mutability.
pub trait StorageTier: Send + Sync + 'static {
    fn kind(&self) -> TierKind;

    /// Short label used in logs.
    fn label(&self) -> &str;

    fn read(&self, thread_id: &str, path: &str) -> Result<Option<FileRecord>, StorageError>;

    /// Create or overwrite a file, returning the stored record.
    fn write(&self, thread_id: &str, path: &str, content: &str)
        -> Result<FileRecord, StorageError>;

    /// Files whose path starts with `prefix`, sorted by path.
    fn list(&self, thread_id: &str, prefix: &str) -> Result<Vec<FileInfo>, StorageError>;

    /// Remove a file; returns whether it existed.
    fn delete(&self, thread_id: &str, path: &str) -> Result<bool, StorageError>;

    /// Drop every file owned by `thread_id`. No-op for durable tiers.
    fn clear_thread(&self, thread_id: &str) -> Result<(), StorageError>;
}

/// Validate a file path: absolute, no empty, `.` or `..` segments, no
/// trailing slash.
pub fn normalize_file_path(path: &str) -> Result<String, StorageError> {
    let trimmed = path.trim();
    if trimmed.len() > 1 && trimmed.ends_with('/') {
        return Err(StorageError::InvalidPath(trimmed.to_string()));
    }
    check_segments(trimmed)?;
    if trimmed == "/" {
        return Err(StorageError::InvalidPath(trimmed.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Validate a directory prefix and make sure it ends with `/`.
pub fn normalize_prefix(prefix: &str) -> Result<String, StorageError> {
    let trimmed = prefix.trim();
    let body = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if body.ends_with('/') {
        return Err(StorageError::InvalidPath(trimmed.to_string()));
    }
    if body.is_empty() {
        return if trimmed.starts_with('/') {
            Ok("/".to_string())
        } else {
            Err(StorageError::InvalidPath(trimmed.to_string()))
        };
    }
    check_segments(body)?;
    Ok(format!("{body}/"))
}

fn check_segments(path: &str) -> Result<(), StorageError> {
    let Some(rest) = path.strip_prefix('/') else {
        return Err(StorageError::InvalidPath(path.to_string()));
    };
    if rest.is_empty() {
        return Ok(());
    }
    let bad = rest
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_paths_must_be_absolute_and_clean() {
        assert_eq!(normalize_file_path(" /notes.md ").unwrap(), "/notes.md");
        assert_eq!(normalize_file_path("/a/b.txt").unwrap(), "/a/b.txt");
        for bad in ["notes.md", "/", "/a//b", "/a/../b", "/a/./b", "/dir/", ""] {
            assert!(normalize_file_path(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn prefixes_get_trailing_slash() {
        assert_eq!(normalize_prefix("/").unwrap(), "/");
        assert_eq!(normalize_prefix("/memories").unwrap(), "/memories/");
        assert_eq!(normalize_prefix("/memories/").unwrap(), "/memories/");
        assert!(normalize_prefix("memories/").is_err());
        assert!(normalize_prefix("/a/../b/").is_err());
    }

    #[test]
    fn updated_record_keeps_created_at() {
        let first = FileRecord::new("one");
        let second = first.updated("two");
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.content, "two");
    }
}
