//! Read API for the document store.
//!
//! Returns raw documents; turning them into entities is the normalizer's job.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DocumentStore;

/// A document as stored, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub id: String,
    pub is_project: bool,
    pub project_id: Option<String>,
    /// Exact stored JSON text. Kept verbatim so conditional writes can
    /// compare against it.
    pub body: String,
}

impl RawDocument {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            is_project: row.get(1)?,
            project_id: row.get(2)?,
            body: row.get(3)?,
        })
    }
}

const SELECT_DOCUMENT: &str = "SELECT id, is_project, project_id, body FROM documents";

/// Load one document through any connection or open transaction.
pub fn load_document(conn: &Connection, id: &str) -> Result<Option<RawDocument>> {
    conn.query_row(
        &format!("{SELECT_DOCUMENT} WHERE id = ?"),
        params![id],
        RawDocument::from_row,
    )
    .optional()
    .with_context(|| format!("Failed to load document {id}"))
}

/// Ids of the children of a project, up to `limit`.
pub fn child_ids(conn: &Connection, project_id: &str, limit: usize) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT id FROM documents WHERE project_id = ? AND is_project = 0 ORDER BY id LIMIT ?")
        .context("Failed to prepare child id query")?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let ids = stmt
        .query_map(params![project_id, limit], |row| row.get(0))
        .context("Failed to query child ids")?
        .collect::<rusqlite::Result<Vec<String>>>()
        .context("Failed to read child ids")?;
    Ok(ids)
}

impl DocumentStore {
    /// Read the whole collection, ordered by id.
    pub fn read_all(&self) -> Result<Vec<RawDocument>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_DOCUMENT} ORDER BY is_project DESC, id"))
            .context("Failed to prepare document scan")?;
        let docs = stmt
            .query_map([], RawDocument::from_row)
            .context("Failed to scan documents")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read documents")?;
        Ok(docs)
    }

    /// Get a single document by id.
    pub fn get_document(&self, id: &str) -> Result<Option<RawDocument>> {
        load_document(&self.conn, id)
    }

    /// Tasks whose `projectId` is the given project, via the `project_id` index.
    pub fn child_documents(&self, project_id: &str) -> Result<Vec<RawDocument>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "{SELECT_DOCUMENT} WHERE project_id = ? AND is_project = 0 ORDER BY id"
            ))
            .context("Failed to prepare child query")?;
        let docs = stmt
            .query_map(params![project_id], RawDocument::from_row)
            .context("Failed to query children")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read children")?;
        Ok(docs)
    }

    /// Number of children of a project.
    pub fn count_children(&self, project_id: &str) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM documents WHERE project_id = ? AND is_project = 0",
                params![project_id],
                |row| row.get(0),
            )
            .context("Failed to count children")?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Total number of documents.
    pub fn count_documents(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .context("Failed to count documents")?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
