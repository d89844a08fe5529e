use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::{now_rfc3339, FileInfo, FileRecord, StorageError, StorageTier, TierKind};

/// Durable tier holding every thread's files in one sqlite `files` table.
///
/// Rows are keyed by the full virtual path, so any thread reads what
/// another wrote. The schema is ensured whenever a tier is opened.
pub struct SqliteTier {
    conn: Mutex<Connection>,
}

impl SqliteTier {
    /// Back the tier with the database file at `path`. The file is created
    /// when missing; its parent directory must exist.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let conn = Connection::open(path)
            .map_err(|e| StorageError::Backend(format!("sqlite open: {e}")))?;
        Self::from_connection(conn)
    }

    /// A tier whose files vanish with the process.
    pub fn open_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StorageError::Backend(format!("sqlite open: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        let tier = Self {
            conn: Mutex::new(conn),
        };
        tier.migrate()?;
        Ok(tier)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Lock(e.to_string()))
    }

    fn migrate(&self) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS files (
                path        TEXT PRIMARY KEY,
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                modified_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| StorageError::Backend(format!("migrate: {e}")))?;
        Ok(())
    }
}

impl StorageTier for SqliteTier {
    fn kind(&self) -> TierKind {
        TierKind::Durable
    }

    fn label(&self) -> &str {
        "store"
    }

    fn read(&self, _thread_id: &str, path: &str) -> Result<Option<FileRecord>, StorageError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT content, created_at, modified_at FROM files WHERE path = ?1",
            params![path],
            |row| {
                Ok(FileRecord {
                    content: row.get(0)?,
                    created_at: row.get(1)?,
                    modified_at: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(|e| StorageError::Backend(format!("read: {e}")))
    }

    fn write(
        &self,
        _thread_id: &str,
        path: &str,
        content: &str,
    ) -> Result<FileRecord, StorageError> {
        let now = now_rfc3339();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO files (path, content, created_at, modified_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(path) DO UPDATE SET
                content = excluded.content,
                modified_at = excluded.modified_at",
            params![path, content, now],
        )
        .map_err(|e| StorageError::Backend(format!("write: {e}")))?;
        let created_at: String = conn
            .query_row(
                "SELECT created_at FROM files WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .map_err(|e| StorageError::Backend(format!("write readback: {e}")))?;
        Ok(FileRecord {
            content: content.to_string(),
            created_at,
            modified_at: now,
        })
    }

    fn list(&self, _thread_id: &str, prefix: &str) -> Result<Vec<FileInfo>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT path, length(CAST(content AS BLOB)), modified_at FROM files
                 WHERE substr(path, 1, length(?1)) = ?1
                 ORDER BY path",
            )
            .map_err(|e| StorageError::Backend(format!("list prepare: {e}")))?;
        let rows = stmt
            .query_map(params![prefix], |row| {
                Ok(FileInfo {
                    path: row.get(0)?,
                    size: row.get::<_, i64>(1)? as u64,
                    modified_at: row.get(2)?,
                })
            })
            .map_err(|e| StorageError::Backend(format!("list query: {e}")))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| StorageError::Backend(format!("list collect: {e}")))
    }

    fn delete(&self, _thread_id: &str, path: &str) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let removed = conn
            .execute("DELETE FROM files WHERE path = ?1", params![path])
            .map_err(|e| StorageError::Backend(format!("delete: {e}")))?;
        Ok(removed > 0)
    }

    fn clear_thread(&self, _thread_id: &str) -> Result<(), StorageError> {
        Ok(())
    }
}
