//! One-time rewrite of legacy ids into canonical ones.
//!
//! Runs at most once per store, gated by a versioned marker in the `meta`
//! table and, across processes, by the migration lease. The `old → new` map is
//! checkpointed in `migration_map` before any document moves, so a run that
//! dies halfway reuses the same canonical ids when it is retried.
//!
//! Documents are rewritten as raw JSON: only `id`, `projectId` and
//! `subTaskIds` change, every other key keeps its stored encoding. Project
//! membership is rebuilt from the tasks' parents while the ids move. A legacy
//! document that cannot be read stops the run before anything is written.
//!
//! Writes are grouped into chunks of at most `batch_limit` document writes,
//! one transaction each. Every write is conditional on the stored body still
//! matching what was read; a mismatch aborts the chunk and the run.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::allocator::{highest_stored_suffix, raise_counter, SequenceAllocator};
use crate::config::VaultConfig;
use crate::core::{CoreError, CoreResult};
use crate::ids::{is_canonical_for, EntityKind};
use crate::lease::MigrationLease;
use crate::model::Entity;
use crate::normalize::{normalize_document, parse_body};
use crate::store::{
    delete_document_if_unchanged, import_raw_document, put_meta, replace_body_if_unchanged,
    DocumentStore, RawDocument,
};

/// `meta` key of the completion marker.
pub const MARKER_KEY: &str = "migration.canonical_ids";
/// Current marker version.
pub const MARKER_VERSION: i64 = 1;

/// How a migration run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum MigrationOutcome {
    /// The marker was already set; nothing was read or written.
    AlreadyComplete,
    /// This run set the marker.
    Completed,
    /// Another client holds the lease.
    LeaseHeld,
    /// The run stopped; the marker is not set and callers keep the normalized data.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    #[serde(flatten)]
    pub outcome: MigrationOutcome,
    pub projects_migrated: usize,
    pub tasks_migrated: usize,
    /// Canonical documents whose references were rewritten.
    pub references_rewritten: usize,
    pub documents_written: usize,
    pub chunks: usize,
}

impl MigrationReport {
    const fn empty(outcome: MigrationOutcome) -> Self {
        Self {
            outcome,
            projects_migrated: 0,
            tasks_migrated: 0,
            references_rewritten: 0,
            documents_written: 0,
            chunks: 0,
        }
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(
            self.outcome,
            MigrationOutcome::AlreadyComplete | MigrationOutcome::Completed
        )
    }

    /// Turn a failed run into `CoreError::Migration`.
    pub fn into_result(self) -> CoreResult<Self> {
        match self.outcome {
            MigrationOutcome::Failed { reason } => Err(CoreError::Migration { reason }),
            _ => Ok(self),
        }
    }
}

/// Snapshot of migration state, for `migrate --status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub complete: bool,
    pub marker_version: Option<i64>,
    pub completed_at: Option<String>,
    pub legacy_documents: usize,
    pub checkpointed_ids: usize,
}

/// A planned document write.
enum Rewrite {
    /// Legacy document replaced by its canonical twin.
    Rename {
        old_id: String,
        new_id: String,
        is_project: bool,
        expected_body: String,
        body: Value,
    },
    /// Canonical document whose references moved.
    References {
        id: String,
        expected_body: String,
        body: Value,
    },
}

impl Rewrite {
    const fn cost(&self) -> usize {
        match self {
            Self::Rename { .. } => 2,
            Self::References { .. } => 1,
        }
    }
}

pub struct MigrationEngine<'a> {
    store: &'a DocumentStore,
    max_attempts: u32,
    batch_limit: usize,
    lease_path: Option<PathBuf>,
}

impl<'a> MigrationEngine<'a> {
    #[must_use]
    pub fn new(store: &'a DocumentStore, config: &VaultConfig) -> Self {
        Self {
            store,
            max_attempts: config.max_allocation_attempts,
            batch_limit: config.batch_limit.max(2),
            lease_path: None,
        }
    }

    /// Guard runs with the lease file at `path`.
    #[must_use]
    pub fn with_lease(mut self, path: PathBuf) -> Self {
        self.lease_path = Some(path);
        self
    }

    pub fn is_complete(&self) -> Result<bool> {
        Ok(self
            .store
            .get_meta(MARKER_KEY)?
            .is_some_and(|m| m.version >= MARKER_VERSION))
    }

    pub fn status(&self) -> Result<MigrationStatus> {
        let marker = self.store.get_meta(MARKER_KEY)?;
        let legacy_documents = self
            .store
            .read_all()?
            .iter()
            .filter(|doc| is_legacy(doc))
            .count();
        Ok(MigrationStatus {
            complete: marker.as_ref().is_some_and(|m| m.version >= MARKER_VERSION),
            marker_version: marker.as_ref().map(|m| m.version),
            completed_at: marker.map(|m| m.updated_at),
            legacy_documents,
            checkpointed_ids: load_checkpoint(self.store.conn())?.len(),
        })
    }

    /// Run the migration unless the marker says it already ran.
    ///
    /// Never fails: errors are logged and reported as `MigrationOutcome::Failed`.
    pub fn run_if_needed(&self) -> MigrationReport {
        match self.try_run() {
            Ok(report) => report,
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::error!(error = %reason, "legacy id migration failed");
                MigrationReport::empty(MigrationOutcome::Failed { reason })
            }
        }
    }

    fn try_run(&self) -> Result<MigrationReport> {
        if self.is_complete()? {
            return Ok(MigrationReport::empty(MigrationOutcome::AlreadyComplete));
        }

        let _lease = match &self.lease_path {
            Some(path) => match MigrationLease::try_acquire(path)? {
                Some(lease) => Some(lease),
                None => {
                    tracing::info!("migration lease held by another client, skipping");
                    return Ok(MigrationReport::empty(MigrationOutcome::LeaseHeld));
                }
            },
            None => None,
        };

        // The previous holder may have finished while we waited.
        if self.is_complete()? {
            return Ok(MigrationReport::empty(MigrationOutcome::AlreadyComplete));
        }

        self.migrate()
    }

    fn migrate(&self) -> Result<MigrationReport> {
        let conn = self.store.conn();

        let mut docs: Vec<(RawDocument, Entity)> = Vec::new();
        for doc in self.store.read_all()? {
            match normalize_document(&doc) {
                Ok(entity) => docs.push((doc, entity)),
                Err(err) if is_legacy(&doc) => {
                    return Err(err.context(format!("Legacy document {} is unreadable", doc.id)));
                }
                Err(err) => {
                    tracing::warn!(doc_id = %doc.id, error = %format!("{err:#}"), "skipping unreadable document in migration");
                }
            }
        }

        for kind in [EntityKind::Project, EntityKind::Task] {
            raise_counter(conn, kind, highest_stored_suffix(conn, kind)?)?;
        }

        let map = self.assign_ids(&docs)?;
        let plan = plan_rewrites(&docs, &map)?;

        let mut report = MigrationReport::empty(MigrationOutcome::Completed);
        for rewrite in &plan {
            match rewrite {
                Rewrite::Rename {
                    is_project: true, ..
                } => {
                    report.projects_migrated += 1;
                }
                Rewrite::Rename { .. } => report.tasks_migrated += 1,
                Rewrite::References { .. } => report.references_rewritten += 1,
            }
        }

        for chunk in chunk_plan(plan, self.batch_limit) {
            report.documents_written += self.commit_chunk(&chunk)?;
            report.chunks += 1;
            tracing::debug!(chunk = report.chunks, written = report.documents_written, "migration chunk committed");
        }

        self.finish(&report)?;
        tracing::info!(
            projects = report.projects_migrated,
            tasks = report.tasks_migrated,
            references = report.references_rewritten,
            chunks = report.chunks,
            "legacy id migration complete"
        );
        Ok(report)
    }

    /// Give every legacy document a canonical id, projects first.
    ///
    /// Existing checkpoint entries are reused; new ones are recorded before
    /// any document is touched.
    fn assign_ids(&self, docs: &[(RawDocument, Entity)]) -> Result<HashMap<String, String>> {
        let conn = self.store.conn();
        let allocator = SequenceAllocator::new(self.store, self.max_attempts);
        let mut map = load_checkpoint(conn)?;

        for kind in [EntityKind::Project, EntityKind::Task] {
            let legacy = docs
                .iter()
                .filter(|(doc, entity)| entity.kind() == kind && is_legacy(doc));
            for (doc, _) in legacy {
                if map.contains_key(&doc.id) {
                    continue;
                }
                let new_id = allocator.allocate(kind)?;
                let recorded = record_mapping(conn, &doc.id, &new_id, kind)?;
                tracing::debug!(old_id = %doc.id, new_id = %recorded, "assigned canonical id");
                map.insert(doc.id.clone(), recorded);
            }
        }
        Ok(map)
    }

    /// Apply one chunk in a single transaction. Returns the writes made.
    fn commit_chunk(&self, chunk: &[Rewrite]) -> Result<usize> {
        let tx = self
            .store
            .begin_immediate()
            .context("Failed to begin migration chunk")?;
        let mut written = 0;

        for rewrite in chunk {
            match rewrite {
                Rewrite::Rename {
                    old_id,
                    new_id,
                    is_project,
                    expected_body,
                    body,
                } => {
                    if !delete_document_if_unchanged(&tx, old_id, expected_body)? {
                        bail!("{old_id} changed or vanished during migration");
                    }
                    import_raw_document(&tx, new_id, *is_project, body)?;
                }
                Rewrite::References {
                    id,
                    expected_body,
                    body,
                } => {
                    if !replace_body_if_unchanged(&tx, id, expected_body, body)? {
                        bail!("{id} changed or vanished during migration");
                    }
                }
            }
            written += rewrite.cost();
        }

        tx.commit().context("Failed to commit migration chunk")?;
        Ok(written)
    }

    /// Set the marker and drop the checkpoint.
    fn finish(&self, report: &MigrationReport) -> Result<()> {
        let tx = self
            .store
            .begin_immediate()
            .context("Failed to begin migration finish")?;
        let value = serde_json::json!({
            "completedAt": Utc::now().to_rfc3339(),
            "projectsMigrated": report.projects_migrated,
            "tasksMigrated": report.tasks_migrated,
        });
        put_meta(&tx, MARKER_KEY, MARKER_VERSION, &value.to_string())?;
        tx.execute("DELETE FROM migration_map", [])
            .context("Failed to clear migration checkpoint")?;
        tx.commit().context("Failed to commit migration marker")?;
        Ok(())
    }
}

fn is_legacy(doc: &RawDocument) -> bool {
    !is_canonical_for(&doc.id, EntityKind::from_is_project(doc.is_project))
}

fn load_checkpoint(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut stmt = conn
        .prepare("SELECT old_id, new_id FROM migration_map")
        .context("Failed to prepare checkpoint query")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .context("Failed to query checkpoint")?
        .collect::<rusqlite::Result<HashMap<String, String>>>()
        .context("Failed to read checkpoint")?;
    Ok(rows)
}

/// Record `old → new` unless a mapping exists; returns the mapping that stuck.
fn record_mapping(conn: &Connection, old_id: &str, new_id: &str, kind: EntityKind) -> Result<String> {
    conn.execute(
        "INSERT OR IGNORE INTO migration_map (old_id, new_id, kind, recorded_at) VALUES (?, ?, ?, ?)",
        params![old_id, new_id, kind.as_str(), Utc::now().to_rfc3339()],
    )
    .with_context(|| format!("Failed to checkpoint {old_id}"))?;
    conn.query_row(
        "SELECT new_id FROM migration_map WHERE old_id = ?",
        params![old_id],
        |row| row.get(0),
    )
    .optional()
    .context("Failed to read checkpoint")?
    .with_context(|| format!("Checkpoint for {old_id} vanished"))
}

fn remapped<'m>(id: &'m str, map: &'m HashMap<String, String>) -> &'m str {
    map.get(id).map_or(id, String::as_str)
}

/// Canonical task ids under each canonical project id, sorted.
fn membership(
    docs: &[(RawDocument, Entity)],
    map: &HashMap<String, String>,
) -> BTreeMap<String, Vec<String>> {
    let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (doc, entity) in docs {
        if let Some(parent) = entity.project_id() {
            children
                .entry(remapped(parent, map).to_string())
                .or_default()
                .push(remapped(&doc.id, map).to_string());
        }
    }
    for ids in children.values_mut() {
        ids.sort();
    }
    children
}

/// Work out every write needed so no reference points at a legacy id.
fn plan_rewrites(
    docs: &[(RawDocument, Entity)],
    map: &HashMap<String, String>,
) -> Result<Vec<Rewrite>> {
    let children = membership(docs, map);
    let mut plan = Vec::new();

    for (doc, entity) in docs {
        let mut body = parse_body(doc)?;
        let new_id = map.get(&doc.id);
        let own_id = new_id.map_or(doc.id.as_str(), String::as_str);
        let members = children.get(own_id).map_or(&[][..], Vec::as_slice);
        let references_moved = remap_references(&mut body, entity, members, map);

        if let Some(new_id) = new_id {
            if body.contains_key("id") {
                body.insert("id".to_string(), Value::String(new_id.clone()));
            }
            plan.push(Rewrite::Rename {
                old_id: doc.id.clone(),
                new_id: new_id.clone(),
                is_project: doc.is_project,
                expected_body: doc.body.clone(),
                body: Value::Object(body),
            });
        } else if references_moved {
            plan.push(Rewrite::References {
                id: doc.id.clone(),
                expected_body: doc.body.clone(),
                body: Value::Object(body),
            });
        }
    }
    Ok(plan)
}

/// Rewrite `projectId` / `subTaskIds` in a raw body. Returns whether anything changed.
///
/// A project keeps the listed children that really point at it, in stored
/// order, followed by any missing ones.
fn remap_references(
    body: &mut Map<String, Value>,
    entity: &Entity,
    members: &[String],
    map: &HashMap<String, String>,
) -> bool {
    match entity {
        Entity::Task(task) => {
            let Some(parent) = task.project_id.as_deref() else {
                return false;
            };
            let parent = remapped(parent, map);
            if body.get("projectId").and_then(Value::as_str) == Some(parent) {
                return false;
            }
            body.insert("projectId".to_string(), Value::String(parent.to_string()));
            true
        }
        Entity::Project(project) => {
            let wanted: HashSet<&str> = members.iter().map(String::as_str).collect();
            let mut seen = HashSet::new();
            let mut rebuilt: Vec<String> = project
                .sub_task_ids
                .iter()
                .map(|id| remapped(id, map))
                .filter(|id| wanted.contains(id) && seen.insert(*id))
                .map(String::from)
                .collect();
            rebuilt.extend(
                members
                    .iter()
                    .filter(|id| !seen.contains(id.as_str()))
                    .cloned(),
            );
            if rebuilt == project.sub_task_ids {
                return false;
            }
            body.insert(
                "subTaskIds".to_string(),
                Value::Array(rebuilt.into_iter().map(Value::String).collect()),
            );
            true
        }
    }
}

/// Split the plan into chunks of at most `limit` document writes.
fn chunk_plan(plan: Vec<Rewrite>, limit: usize) -> Vec<Vec<Rewrite>> {
    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut cost = 0;

    for rewrite in plan {
        if cost + rewrite.cost() > limit && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            cost = 0;
        }
        cost += rewrite.cost();
        current.push(rewrite);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
