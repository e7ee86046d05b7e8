//! Project/task membership.
//!
//! A task's `projectId` and its parent's `subTaskIds` always change together,
//! inside one transaction. Project deletes cascade to every child; when the
//! cascade is larger than one batch it runs in chunks behind a checkpoint row
//! so an interrupted delete can be finished on the next open.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::core::{CoreError, CoreResult};
use crate::model::Entity;
use crate::store::{child_ids, delete_document, insert_document, load_document, write_body, DocumentStore};

pub struct ReferentialIntegrity<'a> {
    store: &'a DocumentStore,
    batch_limit: usize,
}

impl<'a> ReferentialIntegrity<'a> {
    #[must_use]
    pub const fn new(store: &'a DocumentStore, batch_limit: usize) -> Self {
        Self { store, batch_limit }
    }

    /// Insert a new entity and, for a task with a parent, link it.
    ///
    /// The parent is checked inside the write transaction; if it is gone (or is
    /// being deleted) nothing is written and the call fails with `Validation`.
    pub fn insert_linked(&self, entity: &Entity) -> CoreResult<()> {
        let tx = self
            .store
            .begin_immediate()
            .map_err(|e| CoreError::storage(e, "Failed to begin insert"))?;

        if let Some(project_id) = entity.project_id() {
            match load_document(&tx, project_id)? {
                Some(parent) if parent.is_project => {}
                Some(_) => {
                    return Err(CoreError::validation(format!(
                        "{project_id} is not a project"
                    )));
                }
                None => {
                    return Err(CoreError::validation(format!(
                        "parent project {project_id} does not exist"
                    )));
                }
            }
            if cascade_pending(&tx, project_id)? {
                return Err(CoreError::validation(format!(
                    "parent project {project_id} is being deleted"
                )));
            }
        }

        insert_document(&tx, entity)?;
        if let Some(project_id) = entity.project_id() {
            link(&tx, project_id, entity.id())?;
        }
        tx.commit()
            .map_err(|e| CoreError::storage(e, "Failed to commit insert"))?;
        Ok(())
    }

    /// Delete a task or cascade-delete a project. `Ok(false)` if `id` is unknown.
    pub fn delete(&self, id: &str) -> CoreResult<bool> {
        match self.store.get_document(id)? {
            None => Ok(false),
            Some(doc) if doc.is_project => self.cascade_delete(id),
            Some(_) => self.delete_task(id),
        }
    }

    /// Delete a task and unlink it from its parent.
    ///
    /// A missing parent is logged as an integrity warning and otherwise ignored.
    pub fn delete_task(&self, id: &str) -> CoreResult<bool> {
        let tx = self
            .store
            .begin_immediate()
            .map_err(|e| CoreError::storage(e, "Failed to begin delete"))?;

        let Some(doc) = load_document(&tx, id)? else {
            return Ok(false);
        };
        if doc.is_project {
            return Err(CoreError::validation(format!("{id} is a project, not a task")));
        }

        delete_document(&tx, id)?;
        if let Some(project_id) = doc.project_id.as_deref() {
            if !unlink(&tx, project_id, &[id.to_string()])? {
                tracing::warn!(
                    task_id = id,
                    project_id,
                    "integrity warning: parent project missing while deleting task"
                );
            }
        }
        tx.commit()
            .map_err(|e| CoreError::storage(e, "Failed to commit delete"))?;

        tracing::info!(task_id = id, "deleted task");
        Ok(true)
    }

    /// Delete a project and every task whose `projectId` points at it.
    pub fn cascade_delete(&self, project_id: &str) -> CoreResult<bool> {
        let Some(doc) = self.store.get_document(project_id)? else {
            return Ok(false);
        };
        if !doc.is_project {
            return Err(CoreError::validation(format!("{project_id} is not a project")));
        }

        let children = self.store.count_children(project_id)?;
        if children + 1 > self.batch_limit {
            tracing::info!(project_id, children, batch_limit = self.batch_limit, "chunking cascade delete");
            self.start_checkpoint(project_id)?;
            self.resume_cascade(project_id)?;
            return Ok(true);
        }

        let tx = self
            .store
            .begin_immediate()
            .map_err(|e| CoreError::storage(e, "Failed to begin cascade delete"))?;
        let ids = child_ids(&tx, project_id, usize::MAX)?;
        for id in &ids {
            delete_document(&tx, id)?;
        }
        let removed = delete_document(&tx, project_id)?;
        tx.commit()
            .map_err(|e| CoreError::storage(e, "Failed to commit cascade delete"))?;

        tracing::info!(project_id, tasks = ids.len(), "deleted project");
        Ok(removed > 0)
    }

    fn start_checkpoint(&self, project_id: &str) -> CoreResult<()> {
        self.store
            .conn()
            .execute(
                "INSERT OR IGNORE INTO cascade_checkpoints (project_id, started_at, deleted_tasks)
                 VALUES (?, ?, 0)",
                params![project_id, Utc::now().to_rfc3339()],
            )
            .map_err(|e| CoreError::storage(e, "Failed to write cascade checkpoint"))?;
        Ok(())
    }

    /// Finish a checkpointed cascade, one chunk per transaction.
    ///
    /// Returns the number of tasks deleted by this call.
    pub fn resume_cascade(&self, project_id: &str) -> CoreResult<usize> {
        let chunk = self.batch_limit.max(1);
        let mut deleted = 0;

        loop {
            let tx = self
                .store
                .begin_immediate()
                .map_err(|e| CoreError::storage(e, "Failed to begin cascade chunk"))?;
            let ids = child_ids(&tx, project_id, chunk)?;

            if ids.is_empty() {
                delete_document(&tx, project_id)?;
                tx.execute(
                    "DELETE FROM cascade_checkpoints WHERE project_id = ?",
                    params![project_id],
                )
                .map_err(|e| CoreError::storage(e, "Failed to clear cascade checkpoint"))?;
                tx.commit()
                    .map_err(|e| CoreError::storage(e, "Failed to commit cascade chunk"))?;
                break;
            }

            for id in &ids {
                delete_document(&tx, id)?;
            }
            unlink(&tx, project_id, &ids)?;
            tx.execute(
                "UPDATE cascade_checkpoints SET deleted_tasks = deleted_tasks + ? WHERE project_id = ?",
                params![i64::try_from(ids.len()).unwrap_or(i64::MAX), project_id],
            )
            .map_err(|e| CoreError::storage(e, "Failed to advance cascade checkpoint"))?;
            tx.commit()
                .map_err(|e| CoreError::storage(e, "Failed to commit cascade chunk"))?;

            deleted += ids.len();
            tracing::debug!(project_id, chunk = ids.len(), deleted, "cascade chunk committed");
        }

        tracing::info!(project_id, tasks = deleted, "deleted project (chunked)");
        Ok(deleted)
    }

    /// Finish every cascade left behind by an interrupted client.
    pub fn resume_pending_cascades(&self) -> CoreResult<usize> {
        let pending = pending_cascades(self.store.conn())?;
        for project_id in &pending {
            tracing::warn!(project_id = %project_id, "resuming interrupted cascade delete");
            self.resume_cascade(project_id)?;
        }
        Ok(pending.len())
    }
}

/// Project ids with a cascade delete in flight.
pub fn pending_cascades(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT project_id FROM cascade_checkpoints ORDER BY started_at")
        .context("Failed to prepare checkpoint query")?;
    let ids = stmt
        .query_map([], |row| row.get(0))
        .context("Failed to query checkpoints")?
        .collect::<rusqlite::Result<Vec<String>>>()
        .context("Failed to read checkpoints")?;
    Ok(ids)
}

fn cascade_pending(conn: &Connection, project_id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM cascade_checkpoints WHERE project_id = ?",
            params![project_id],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read cascade checkpoint")?;
    Ok(found.is_some())
}

/// Add `task_id` to the parent's `subTaskIds`. `false` if the parent is missing.
pub(crate) fn link(conn: &Connection, project_id: &str, task_id: &str) -> Result<bool> {
    edit_sub_task_ids(conn, project_id, |ids| {
        if !ids.iter().any(|v| v.as_str() == Some(task_id)) {
            ids.push(Value::String(task_id.to_string()));
        }
    })
}

/// Remove `task_ids` from the parent's `subTaskIds`. `false` if the parent is missing.
pub(crate) fn unlink(conn: &Connection, project_id: &str, task_ids: &[String]) -> Result<bool> {
    edit_sub_task_ids(conn, project_id, |ids| {
        ids.retain(|v| !v.as_str().is_some_and(|s| task_ids.iter().any(|t| t == s)));
    })
}

/// Edit the raw `subTaskIds` array in place so other stored fields keep their encoding.
fn edit_sub_task_ids<F>(conn: &Connection, project_id: &str, edit: F) -> Result<bool>
where
    F: FnOnce(&mut Vec<Value>),
{
    let Some(doc) = load_document(conn, project_id)? else {
        return Ok(false);
    };
    if !doc.is_project {
        return Ok(false);
    }

    let mut body: Value = serde_json::from_str(&doc.body)
        .with_context(|| format!("Failed to parse document {project_id}"))?;
    let Some(map) = body.as_object_mut() else {
        bail!("Document {project_id} is not a JSON object");
    };
    let entry = map
        .entry("subTaskIds")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !entry.is_array() {
        *entry = Value::Array(Vec::new());
    }
    if let Value::Array(ids) = entry {
        edit(ids);
    }

    write_body(conn, project_id, &body)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemFields, Project, Task};
    use crate::normalize::normalize_document;

    fn store() -> DocumentStore {
        let store = DocumentStore::open_in_memory().unwrap();
        store.init_schema().unwrap();
        store
    }

    fn project(id: &str) -> Entity {
        Entity::Project(Project {
            id: id.into(),
            name: id.into(),
            fields: ItemFields::default(),
            sub_task_ids: Vec::new(),
        })
    }

    fn task(id: &str, project_id: Option<&str>) -> Entity {
        Entity::Task(Task {
            id: id.into(),
            title: id.into(),
            fields: ItemFields::default(),
            project_id: project_id.map(String::from),
        })
    }

    fn sub_task_ids(store: &DocumentStore, id: &str) -> Vec<String> {
        let doc = store.get_document(id).unwrap().unwrap();
        normalize_document(&doc).unwrap().sub_task_ids().to_vec()
    }

    #[test]
    fn test_insert_links_parent() {
        let store = store();
        let integrity = ReferentialIntegrity::new(&store, 500);

        integrity.insert_linked(&project("PID-001")).unwrap();
        integrity.insert_linked(&task("TID-001", Some("PID-001"))).unwrap();
        integrity.insert_linked(&task("TID-002", Some("PID-001"))).unwrap();

        assert_eq!(sub_task_ids(&store, "PID-001"), vec!["TID-001", "TID-002"]);
    }

    #[test]
    fn test_insert_with_missing_parent_writes_nothing() {
        let store = store();
        let integrity = ReferentialIntegrity::new(&store, 500);

        let err = integrity
            .insert_linked(&task("TID-001", Some("PID-404")))
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
        assert_eq!(store.count_documents().unwrap(), 0);
    }

    #[test]
    fn test_delete_task_unlinks() {
        let store = store();
        let integrity = ReferentialIntegrity::new(&store, 500);
        integrity.insert_linked(&project("PID-001")).unwrap();
        integrity.insert_linked(&task("TID-001", Some("PID-001"))).unwrap();
        integrity.insert_linked(&task("TID-002", Some("PID-001"))).unwrap();

        assert!(integrity.delete_task("TID-001").unwrap());
        assert_eq!(sub_task_ids(&store, "PID-001"), vec!["TID-002"]);
        assert!(!integrity.delete_task("TID-001").unwrap());
    }

    #[test]
    fn test_delete_task_with_missing_parent_succeeds() {
        let store = store();
        // Orphan written without going through the integrity layer
        insert_document(store.conn(), &task("TID-001", Some("PID-009"))).unwrap();

        let integrity = ReferentialIntegrity::new(&store, 500);
        assert!(integrity.delete_task("TID-001").unwrap());
        assert_eq!(store.count_documents().unwrap(), 0);
    }

    #[test]
    fn test_cascade_single_transaction() {
        let store = store();
        let integrity = ReferentialIntegrity::new(&store, 500);
        integrity.insert_linked(&project("PID-001")).unwrap();
        integrity.insert_linked(&project("PID-002")).unwrap();
        for n in 1..=3 {
            integrity
                .insert_linked(&task(&format!("TID-00{n}"), Some("PID-001")))
                .unwrap();
        }
        integrity.insert_linked(&task("TID-004", Some("PID-002"))).unwrap();

        assert!(integrity.delete("PID-001").unwrap());
        assert!(store.get_document("PID-001").unwrap().is_none());
        assert_eq!(store.count_children("PID-001").unwrap(), 0);
        assert_eq!(store.count_documents().unwrap(), 2);
    }

    #[test]
    fn test_cascade_chunked() {
        let store = store();
        let integrity = ReferentialIntegrity::new(&store, 3);
        integrity.insert_linked(&project("PID-001")).unwrap();
        for n in 1..=7 {
            integrity
                .insert_linked(&task(&format!("TID-00{n}"), Some("PID-001")))
                .unwrap();
        }

        assert!(integrity.cascade_delete("PID-001").unwrap());
        assert_eq!(store.count_documents().unwrap(), 0);
        assert!(pending_cascades(store.conn()).unwrap().is_empty());
    }

    #[test]
    fn test_resume_interrupted_cascade() {
        let store = store();
        let integrity = ReferentialIntegrity::new(&store, 2);
        integrity.insert_linked(&project("PID-001")).unwrap();
        integrity.insert_linked(&task("TID-001", Some("PID-001"))).unwrap();
        integrity.insert_linked(&task("TID-002", Some("PID-001"))).unwrap();

        // Simulate a client that wrote the checkpoint and died
        integrity.start_checkpoint("PID-001").unwrap();
        let err = integrity
            .insert_linked(&task("TID-003", Some("PID-001")))
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));

        assert_eq!(integrity.resume_pending_cascades().unwrap(), 1);
        assert_eq!(store.count_documents().unwrap(), 0);
        assert_eq!(integrity.resume_pending_cascades().unwrap(), 0);
    }

    #[test]
    fn test_unlink_preserves_other_fields() {
        let store = store();
        crate::store::import_raw_document(
            store.conn(),
            "PID-001",
            true,
            &serde_json::json!({"name": "Raw", "createdAt": {"_seconds": 1, "_nanoseconds": 0}, "subTaskIds": ["a", "b"]}),
        )
        .unwrap();

        assert!(unlink(store.conn(), "PID-001", &["a".to_string()]).unwrap());
        let body: Value =
            serde_json::from_str(&store.get_document("PID-001").unwrap().unwrap().body).unwrap();
        assert_eq!(body["subTaskIds"], serde_json::json!(["b"]));
        assert_eq!(body["createdAt"]["_seconds"], 1);
    }
}
