//! Entity service for projects and tasks.

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use serde_json::Value;

use crate::allocator::SequenceAllocator;
use crate::ids::EntityKind;
use crate::integrity::ReferentialIntegrity;
use crate::model::{Entity, EntityPatch, ItemFields, NewEntity, Project, Task};
use crate::normalize::{normalize_all, normalize_document, parse_body};
use crate::store::{document_body, replace_body_if_unchanged, DocumentStore};

use super::{CoreError, CoreResult, VaultContext};

/// Service for entity operations.
pub struct EntityService<'a> {
    ctx: &'a VaultContext,
    store: &'a DocumentStore,
}

impl<'a> EntityService<'a> {
    pub(crate) const fn new(ctx: &'a VaultContext, store: &'a DocumentStore) -> Self {
        Self { ctx, store }
    }

    fn allocator(&self) -> SequenceAllocator<'a> {
        SequenceAllocator::new(self.store, self.ctx.config().max_allocation_attempts)
    }

    fn integrity(&self) -> ReferentialIntegrity<'a> {
        ReferentialIntegrity::new(self.store, self.ctx.config().batch_limit)
    }

    /// Allocate a canonical id without creating anything.
    pub fn allocate(&self, kind: EntityKind) -> CoreResult<String> {
        self.allocator().allocate(kind)
    }

    /// Create a project or task and return its new id.
    ///
    /// Validation happens before an id is allocated. A task with a parent is
    /// linked in the same transaction as its insert.
    pub fn create(&self, new: NewEntity, actor: &str) -> CoreResult<String> {
        self.create_on(new, actor, Utc::now().date_naive())
    }

    fn create_on(&self, new: NewEntity, actor: &str, today: NaiveDate) -> CoreResult<String> {
        require_actor(actor)?;
        let title = new.title.trim();
        if title.is_empty() {
            return Err(CoreError::validation(match new.kind {
                EntityKind::Project => "project name is required",
                EntityKind::Task => "task title is required",
            }));
        }
        if let Some(project_id) = new.project_id.as_deref() {
            if new.kind == EntityKind::Project {
                return Err(CoreError::validation("projects cannot belong to a project"));
            }
            match self.store.get_document(project_id)? {
                Some(parent) if parent.is_project => {}
                Some(_) => {
                    return Err(CoreError::validation(format!("{project_id} is not a project")));
                }
                None => {
                    return Err(CoreError::validation(format!(
                        "parent project {project_id} does not exist"
                    )));
                }
            }
        }

        let id = self.allocator().allocate(new.kind)?;
        let now = Utc::now();
        let fields = ItemFields {
            description: new.description.unwrap_or_default(),
            status: new
                .status
                .unwrap_or_default()
                .with_start_rule(new.start_date, today),
            priority: new.priority.unwrap_or_default(),
            assignees: new.assignees,
            start_date: new.start_date,
            due_date: new.due_date,
            created_at: Some(now),
            created_by: Some(actor.to_string()),
            updated_at: Some(now),
            updated_by: Some(actor.to_string()),
            comments: Vec::new(),
            attachments: new.attachments,
        };
        let entity = match new.kind {
            EntityKind::Project => Entity::Project(Project {
                id: id.clone(),
                name: title.to_string(),
                fields,
                sub_task_ids: Vec::new(),
            }),
            EntityKind::Task => Entity::Task(Task {
                id: id.clone(),
                title: title.to_string(),
                fields,
                project_id: new.project_id,
            }),
        };

        self.integrity().insert_linked(&entity)?;
        tracing::info!(id = %id, kind = %new.kind, actor, "created entity");
        Ok(id)
    }

    /// Apply a partial update. `Ok(false)` if `id` does not exist.
    ///
    /// Only the patched keys (plus `updatedAt`/`updatedBy`) are rewritten in
    /// the stored body. Changing a task's parent is rejected; passing the
    /// current parent is fine.
    pub fn update(&self, id: &str, patch: EntityPatch, actor: &str) -> CoreResult<bool> {
        self.update_on(id, patch, actor, Utc::now().date_naive())
    }

    fn update_on(
        &self,
        id: &str,
        patch: EntityPatch,
        actor: &str,
        today: NaiveDate,
    ) -> CoreResult<bool> {
        require_actor(actor)?;
        let Some(doc) = self.store.get_document(id)? else {
            return Ok(false);
        };
        let mut entity = normalize_document(&doc)?;

        if let Some(requested) = &patch.project_id {
            if requested.as_deref() != entity.project_id() {
                return Err(CoreError::validation(match entity.kind() {
                    EntityKind::Project => "projects cannot belong to a project".to_string(),
                    EntityKind::Task => format!("projectId of {id} cannot be changed"),
                }));
            }
        }
        if let Some(title) = &patch.title {
            if title.trim().is_empty() {
                return Err(CoreError::validation("title cannot be blank"));
            }
        }

        let start_date_set = patch.start_date.is_some();
        let touched = patched_keys(&entity, &patch);
        if let Some(title) = patch.title {
            entity.set_title(title.trim().to_string());
        }
        let fields = entity.fields_mut();
        if let Some(description) = patch.description {
            fields.description = description;
        }
        if let Some(status) = patch.status {
            fields.status = status;
        }
        if let Some(priority) = patch.priority {
            fields.priority = priority;
        }
        if let Some(assignees) = patch.assignees {
            fields.assignees = assignees;
        }
        if let Some(start_date) = patch.start_date {
            fields.start_date = start_date;
        }
        if let Some(due_date) = patch.due_date {
            fields.due_date = due_date;
        }
        if let Some(attachments) = patch.attachments {
            fields.attachments = attachments;
        }
        if start_date_set {
            fields.status = fields.status.with_start_rule(fields.start_date, today);
        }
        fields.updated_at = Some(Utc::now());
        fields.updated_by = Some(actor.to_string());

        let canonical: Value = serde_json::from_str(&document_body(&entity)?)
            .context("Failed to re-read encoded document")?;
        let mut body = parse_body(&doc)?;
        for key in touched {
            body.remove(key);
            if let Some(value) = canonical.get(key) {
                body.insert(key.to_string(), value.clone());
            }
        }

        let tx = self
            .store
            .begin_immediate()
            .map_err(|e| CoreError::storage(e, "Failed to begin update"))?;
        if !replace_body_if_unchanged(&tx, id, &doc.body, &Value::Object(body))? {
            // Deleted under us: report not found. Changed under us: fail.
            return match self.store.get_document(id)? {
                None => Ok(false),
                Some(_) => Err(CoreError::Internal(anyhow::anyhow!(
                    "{id} was modified concurrently, retry the update"
                ))),
            };
        }
        tx.commit()
            .map_err(|e| CoreError::storage(e, "Failed to commit update"))?;

        tracing::info!(id, actor, "updated entity");
        Ok(true)
    }

    /// Delete a task, or a project together with all of its tasks.
    pub fn delete(&self, id: &str) -> CoreResult<bool> {
        self.integrity().delete(id)
    }

    pub fn get(&self, id: &str) -> CoreResult<Option<Entity>> {
        match self.store.get_document(id)? {
            Some(doc) => Ok(Some(normalize_document(&doc)?)),
            None => Ok(None),
        }
    }

    /// Every readable entity, projects first.
    pub fn list(&self) -> CoreResult<Vec<Entity>> {
        Ok(normalize_all(&self.store.read_all()?))
    }

    /// List entities of one kind.
    pub fn list_kind(&self, kind: EntityKind) -> CoreResult<Vec<Entity>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|e| e.kind() == kind)
            .collect())
    }

    /// Tasks whose `projectId` is `project_id`, via the indexed column.
    pub fn list_child_tasks(&self, project_id: &str) -> CoreResult<Vec<Task>> {
        let docs = self.store.child_documents(project_id)?;
        Ok(normalize_all(&docs)
            .into_iter()
            .filter_map(Entity::into_task)
            .collect())
    }
}

fn require_actor(actor: &str) -> CoreResult<()> {
    if actor.trim().is_empty() {
        return Err(CoreError::validation("an actor id is required"));
    }
    Ok(())
}

/// Stored keys an update rewrites.
fn patched_keys(entity: &Entity, patch: &EntityPatch) -> Vec<&'static str> {
    let mut keys = vec!["updatedAt", "updatedBy"];
    if patch.title.is_some() {
        keys.push(if entity.is_project() { "name" } else { "title" });
    }
    if patch.description.is_some() {
        keys.push("description");
    }
    // The start rule may move the status.
    if patch.status.is_some() || patch.start_date.is_some() {
        keys.push("status");
    }
    if patch.priority.is_some() {
        keys.push("priority");
    }
    if patch.assignees.is_some() {
        keys.push("assignees");
    }
    if patch.start_date.is_some() {
        keys.push("startDate");
    }
    if patch.due_date.is_some() {
        keys.push("dueDate");
    }
    if patch.attachments.is_some() {
        keys.push("attachments");
    }
    keys
}
