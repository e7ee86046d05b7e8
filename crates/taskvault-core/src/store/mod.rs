//! SQLite-backed document store.
//!
//! Projects and tasks live in one flat `documents` collection, distinguished by
//! `is_project`; the JSON body is the source of truth and the `project_id`
//! column mirrors it for indexed child lookups. Every client opens its own
//! connection; cross-client safety comes from SQLite transactions.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

mod query;

pub use query::{child_ids, load_document, RawDocument};

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::config::VaultConfig;
use crate::model::Entity;

/// Handle on the document store.
pub struct DocumentStore {
    conn: Connection,
}

impl DocumentStore {
    /// Open or create a document store at the given path.
    ///
    /// Creates parent directories if they don't exist.
    pub fn open(path: &Path, config: &VaultConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create parent directories: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        conn.busy_timeout(config.busy_timeout())
            .context("Failed to set busy timeout")?;

        // WAL lets readers proceed while another client holds the write lock.
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("Failed to enable WAL journal")?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "opened document store");

        Ok(Self { conn })
    }

    /// Create an in-memory document store (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Ok(Self { conn })
    }

    /// Initialize the database schema.
    ///
    /// Creates all tables and indexes if they don't exist.
    pub fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA_SQL)
            .context("Failed to initialize schema")?;
        Ok(())
    }

    /// Begin a transaction that takes the write lock up front.
    ///
    /// Fails with `SQLITE_BUSY` if another client holds the lock past the
    /// busy timeout.
    pub fn begin_immediate(&self) -> rusqlite::Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
    }

    /// SQLite's `data_version`: changes whenever another connection commits.
    pub fn data_version(&self) -> Result<i64> {
        self.conn
            .query_row("PRAGMA data_version", [], |row| row.get(0))
            .context("Failed to read data_version")
    }

    /// Read a record from the `meta` table.
    pub fn get_meta(&self, key: &str) -> Result<Option<MetaRecord>> {
        self.conn
            .query_row(
                "SELECT version, value, updated_at FROM meta WHERE key = ?",
                params![key],
                |row| {
                    Ok(MetaRecord {
                        version: row.get(0)?,
                        value: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("Failed to read meta key {key}"))
    }

    /// Get a reference to the underlying connection (for advanced queries).
    #[must_use]
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// A versioned singleton record in the `meta` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRecord {
    pub version: i64,
    pub value: String,
    pub updated_at: String,
}

/// Write a `meta` record (inside whatever transaction `conn` belongs to).
pub fn put_meta(conn: &Connection, key: &str, version: i64, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO meta (key, version, value, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (key) DO UPDATE SET
             version = excluded.version,
             value = excluded.value,
             updated_at = excluded.updated_at",
        params![key, version, value, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("Failed to write meta key {key}"))?;
    Ok(())
}

// ============================================================================
// Document writes
// ============================================================================
//
// Free functions over `&Connection` so they compose inside a caller's
// transaction (`Transaction` derefs to `Connection`).

/// Serialize an entity into its stored JSON body.
pub fn document_body(entity: &Entity) -> Result<String> {
    let mut value = match entity {
        Entity::Project(p) => serde_json::to_value(p),
        Entity::Task(t) => serde_json::to_value(t),
    }
    .context("Failed to serialize document")?;
    if let Some(map) = value.as_object_mut() {
        map.insert("isProject".to_string(), entity.is_project().into());
    }
    serde_json::to_string(&value).context("Failed to encode document")
}

/// Insert a new document. Fails if the id is already taken.
pub fn insert_document(conn: &Connection, entity: &Entity) -> Result<()> {
    let body = document_body(entity)?;
    conn.execute(
        "INSERT INTO documents (id, is_project, project_id, body, updated_at)
         VALUES (?, ?, ?, ?, ?)",
        params![
            entity.id(),
            entity.is_project(),
            entity.project_id(),
            body,
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to insert document {}", entity.id()))?;
    Ok(())
}

/// Insert or overwrite a document.
pub fn put_document(conn: &Connection, entity: &Entity) -> Result<()> {
    let body = document_body(entity)?;
    conn.execute(
        "INSERT INTO documents (id, is_project, project_id, body, updated_at)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT (id) DO UPDATE SET
             is_project = excluded.is_project,
             project_id = excluded.project_id,
             body = excluded.body,
             updated_at = excluded.updated_at",
        params![
            entity.id(),
            entity.is_project(),
            entity.project_id(),
            body,
            Utc::now().to_rfc3339(),
        ],
    )
    .with_context(|| format!("Failed to write document {}", entity.id()))?;
    Ok(())
}

/// Overwrite a raw body only if the stored body still equals `expected_body`.
///
/// Keys the model does not know survive untouched. A task's `project_id`
/// column is refreshed from the body's `projectId` when it has one.
///
/// Returns `false` if the document changed or vanished since it was read.
pub fn replace_body_if_unchanged(
    conn: &Connection,
    id: &str,
    expected_body: &str,
    body: &serde_json::Value,
) -> Result<bool> {
    let encoded = serde_json::to_string(body).context("Failed to encode document")?;
    let project_id = body.get("projectId").and_then(serde_json::Value::as_str);
    let changed = conn
        .execute(
            "UPDATE documents
             SET body = ?, updated_at = ?,
                 project_id = CASE WHEN is_project = 1 THEN NULL ELSE COALESCE(?, project_id) END
             WHERE id = ? AND body = ?",
            params![encoded, Utc::now().to_rfc3339(), project_id, id, expected_body],
        )
        .with_context(|| format!("Failed to rewrite document {id}"))?;
    Ok(changed == 1)
}

/// Overwrite the JSON body of an existing document, leaving its columns alone.
pub fn write_body(conn: &Connection, id: &str, body: &serde_json::Value) -> Result<()> {
    let encoded = serde_json::to_string(body).context("Failed to encode document")?;
    conn.execute(
        "UPDATE documents SET body = ?, updated_at = ? WHERE id = ?",
        params![encoded, Utc::now().to_rfc3339(), id],
    )
    .with_context(|| format!("Failed to write document {id}"))?;
    Ok(())
}

/// Delete a document. Returns the number of rows removed (0 or 1).
pub fn delete_document(conn: &Connection, id: &str) -> Result<usize> {
    conn.execute("DELETE FROM documents WHERE id = ?", params![id])
        .with_context(|| format!("Failed to delete document {id}"))
}

/// Delete a document only if its stored body still equals `expected_body`.
pub fn delete_document_if_unchanged(
    conn: &Connection,
    id: &str,
    expected_body: &str,
) -> Result<bool> {
    let removed = conn
        .execute(
            "DELETE FROM documents WHERE id = ? AND body = ?",
            params![id, expected_body],
        )
        .with_context(|| format!("Failed to delete document {id}"))?;
    Ok(removed == 1)
}

/// Store a document exactly as given, bypassing the model.
///
/// Used to import records written by older clients (legacy ids, loose
/// field encodings). The `project_id` column is lifted from the body.
pub fn import_raw_document(
    conn: &Connection,
    id: &str,
    is_project: bool,
    body: &serde_json::Value,
) -> Result<()> {
    let project_id = if is_project {
        None
    } else {
        body.get("projectId").and_then(serde_json::Value::as_str)
    };
    let encoded = serde_json::to_string(body).context("Failed to encode raw document")?;
    conn.execute(
        "INSERT INTO documents (id, is_project, project_id, body, updated_at)
         VALUES (?, ?, ?, ?, ?)",
        params![id, is_project, project_id, encoded, Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("Failed to import document {id}"))?;
    Ok(())
}

// ============================================================================
// Schema SQL
// ============================================================================

const SCHEMA_SQL: &str = r"
-- DOCUMENTS (projects and tasks, one flat collection)
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    is_project INTEGER NOT NULL CHECK (is_project IN (0, 1)),
    project_id TEXT,
    body TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_project_id ON documents(project_id);
CREATE INDEX IF NOT EXISTS idx_documents_is_project ON documents(is_project);

-- COUNTERS (one singleton per entity kind)
CREATE TABLE IF NOT EXISTS counters (
    name TEXT PRIMARY KEY CHECK (name IN ('projectCounter', 'taskCounter')),
    last_id INTEGER NOT NULL CHECK (last_id >= 1)
);

-- META (versioned singleton records, e.g. the migration marker)
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    version INTEGER NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- MIGRATION CHECKPOINT (legacy id -> canonical id)
CREATE TABLE IF NOT EXISTS migration_map (
    old_id TEXT PRIMARY KEY,
    new_id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL CHECK (kind IN ('project', 'task')),
    recorded_at TEXT NOT NULL
);

-- CASCADE CHECKPOINTS (chunked project deletes in flight)
CREATE TABLE IF NOT EXISTS cascade_checkpoints (
    project_id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL,
    deleted_tasks INTEGER NOT NULL DEFAULT 0
);
";

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemFields, Project, Task};
    use tempfile::tempdir;

    fn project(id: &str) -> Entity {
        Entity::Project(Project {
            id: id.to_string(),
            name: format!("Project {id}"),
            fields: ItemFields::default(),
            sub_task_ids: Vec::new(),
        })
    }

    fn task(id: &str, project_id: Option<&str>) -> Entity {
        Entity::Task(Task {
            id: id.to_string(),
            title: format!("Task {id}"),
            fields: ItemFields::default(),
            project_id: project_id.map(String::from),
        })
    }

    #[test]
    fn test_open_and_init_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("store.db");

        let store = DocumentStore::open(&db_path, &VaultConfig::default()).unwrap();
        store.init_schema().unwrap();
        // Idempotent
        store.init_schema().unwrap();

        assert!(db_path.exists());
        assert_eq!(store.count_documents().unwrap(), 0);
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.init_schema().unwrap();

        insert_document(store.conn(), &project("PID-001")).unwrap();
        assert!(insert_document(store.conn(), &project("PID-001")).is_err());
    }

    #[test]
    fn test_body_carries_is_project_flag() {
        let body = document_body(&project("PID-001")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["isProject"], true);
        assert_eq!(value["name"], "Project PID-001");
        assert!(value.get("kind").is_none());
    }

    #[test]
    fn test_project_id_column_mirrors_body() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.init_schema().unwrap();

        insert_document(store.conn(), &project("PID-001")).unwrap();
        insert_document(store.conn(), &task("TID-001", Some("PID-001"))).unwrap();
        insert_document(store.conn(), &task("TID-002", None)).unwrap();

        let children = store.child_documents("PID-001").unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, "TID-001");
    }

    #[test]
    fn test_conditional_replace_detects_concurrent_change() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.init_schema().unwrap();

        insert_document(store.conn(), &project("PID-001")).unwrap();
        let stale = store.get_document("PID-001").unwrap().unwrap();

        // Someone else rewrites the document
        let mut renamed = project("PID-001");
        renamed.set_title("Renamed".into());
        put_document(store.conn(), &renamed).unwrap();

        let body = serde_json::json!({"name": "Mine"});
        assert!(!replace_body_if_unchanged(store.conn(), "PID-001", &stale.body, &body).unwrap());
        assert!(!delete_document_if_unchanged(store.conn(), "PID-001", &stale.body).unwrap());
        assert_eq!(store.count_documents().unwrap(), 1);
    }

    #[test]
    fn test_body_replace_keeps_unknown_keys_and_moves_column() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
        let original = serde_json::json!({"title": "T", "projectId": "old", "budget": 100});
        import_raw_document(store.conn(), "TID-001", false, &original).unwrap();
        let stored = store.get_document("TID-001").unwrap().unwrap();

        let mut body = original;
        body["projectId"] = "PID-002".into();
        assert!(replace_body_if_unchanged(store.conn(), "TID-001", &stored.body, &body).unwrap());

        let after = store.get_document("TID-001").unwrap().unwrap();
        assert_eq!(after.project_id.as_deref(), Some("PID-002"));
        let value: serde_json::Value = serde_json::from_str(&after.body).unwrap();
        assert_eq!(value["budget"], 100);
        assert_eq!(store.child_documents("PID-002").unwrap().len(), 1);
    }

    #[test]
    fn test_meta_roundtrip() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.init_schema().unwrap();

        assert!(store.get_meta("marker").unwrap().is_none());
        put_meta(store.conn(), "marker", 1, "{}").unwrap();
        put_meta(store.conn(), "marker", 2, r#"{"x":1}"#).unwrap();

        let record = store.get_meta("marker").unwrap().unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(record.value, r#"{"x":1}"#);
    }

    #[test]
    fn test_import_raw_lifts_project_id() {
        let store = DocumentStore::open_in_memory().unwrap();
        store.init_schema().unwrap();

        import_raw_document(
            store.conn(),
            "legacy-task",
            false,
            &serde_json::json!({"title": "Old", "projectId": "abc123"}),
        )
        .unwrap();

        let children = store.child_documents("abc123").unwrap();
        assert_eq!(children.len(), 1);
        assert!(!children[0].is_project);
    }

    #[test]
    fn test_data_version_moves_on_foreign_commit() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("store.db");
        let config = VaultConfig::default();

        let watcher = DocumentStore::open(&db_path, &config).unwrap();
        watcher.init_schema().unwrap();
        let writer = DocumentStore::open(&db_path, &config).unwrap();

        let before = watcher.data_version().unwrap();
        insert_document(writer.conn(), &project("PID-001")).unwrap();
        let after = watcher.data_version().unwrap();

        assert_ne!(before, after);
    }
}
