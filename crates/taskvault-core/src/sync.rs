//! Live sync: re-publish the normalized working set whenever the store changes.
//!
//! Change detection uses SQLite's `PRAGMA data_version`, which moves whenever
//! another connection commits. Each pass reads the whole collection, runs it
//! through the normalizer, runs the migration if the marker is missing, and
//! publishes the full list together with the changes since the previous
//! publication.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::VaultConfig;
use crate::ids::EntityKind;
use crate::migration::{MigrationEngine, MigrationReport};
use crate::model::Entity;
use crate::normalize::normalize_all;
use crate::store::DocumentStore;

/// One difference between two consecutive publications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "lowercase")]
pub enum ChangeEvent {
    Added { entity: Entity },
    Modified { entity: Entity },
    Removed { id: String, kind: EntityKind },
}

impl ChangeEvent {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Added { entity } | Self::Modified { entity } => entity.id(),
            Self::Removed { id, .. } => id,
        }
    }
}

/// A full snapshot. Each one replaces the previous.
#[derive(Debug, Clone, Serialize)]
pub struct Publication {
    pub sequence: u64,
    pub entities: Vec<Entity>,
    pub changes: Vec<ChangeEvent>,
    /// Present when this pass attempted the migration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration: Option<MigrationReport>,
}

pub struct LiveSync {
    store: DocumentStore,
    config: VaultConfig,
    lease_path: Option<PathBuf>,
    last_version: Option<i64>,
    previous: BTreeMap<String, Entity>,
    latest: Option<Arc<Publication>>,
    sequence: u64,
    subscribers: Vec<Sender<Arc<Publication>>>,
}

impl LiveSync {
    /// Open a dedicated connection to the store at `path`.
    pub fn open(path: &Path, config: VaultConfig) -> Result<Self> {
        let store = DocumentStore::open(path, &config)?;
        store.init_schema()?;
        Ok(Self {
            store,
            config,
            lease_path: None,
            last_version: None,
            previous: BTreeMap::new(),
            latest: None,
            sequence: 0,
            subscribers: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_lease(mut self, path: PathBuf) -> Self {
        self.lease_path = Some(path);
        self
    }

    /// Receive every publication from now on.
    pub fn subscribe(&mut self) -> Receiver<Arc<Publication>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Most recent publication, if any pass has run.
    #[must_use]
    pub fn latest(&self) -> Option<Arc<Publication>> {
        self.latest.clone()
    }

    /// Publish if the store changed since the last pass.
    pub fn poll(&mut self) -> Result<Option<Arc<Publication>>> {
        let version = self.store.data_version()?;
        if self.last_version == Some(version) {
            return Ok(None);
        }
        self.refresh().map(Some)
    }

    /// Run a pass unconditionally.
    pub fn refresh(&mut self) -> Result<Arc<Publication>> {
        let mut entities = normalize_all(&self.store.read_all()?);

        let mut engine = MigrationEngine::new(&self.store, &self.config);
        if let Some(path) = &self.lease_path {
            engine = engine.with_lease(path.clone());
        }
        let migration = if engine.is_complete()? {
            None
        } else {
            let report = engine.run_if_needed();
            if report.documents_written > 0 {
                entities = normalize_all(&self.store.read_all()?);
            }
            Some(report)
        };

        let current: BTreeMap<String, Entity> = entities
            .iter()
            .map(|e| (e.id().to_string(), e.clone()))
            .collect();
        let changes = diff(&self.previous, &current);

        self.sequence += 1;
        let publication = Arc::new(Publication {
            sequence: self.sequence,
            entities,
            changes,
            migration,
        });

        self.previous = current;
        self.last_version = Some(self.store.data_version()?);
        self.latest = Some(Arc::clone(&publication));
        self.subscribers
            .retain(|tx| tx.send(Arc::clone(&publication)).is_ok());

        tracing::debug!(
            sequence = publication.sequence,
            entities = publication.entities.len(),
            changes = publication.changes.len(),
            "published snapshot"
        );
        Ok(publication)
    }

    /// Poll until `stop` is set.
    pub fn run(mut self, stop: &AtomicBool) {
        let interval = self.config.poll_interval();
        while !stop.load(Ordering::Relaxed) {
            if let Err(err) = self.poll() {
                tracing::warn!(error = %format!("{err:#}"), "live sync pass failed");
            }
            thread::sleep(interval);
        }
    }

    /// Run the poll loop on a background thread.
    pub fn spawn(self) -> Result<SyncHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("taskvault-sync".to_string())
            .spawn(move || self.run(&flag))
            .context("Failed to spawn live sync thread")?;
        Ok(SyncHandle { stop, join })
    }
}

/// Handle on a background sync loop.
pub struct SyncHandle {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl SyncHandle {
    /// Ask the loop to stop and wait for it.
    pub fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        if self.join.join().is_err() {
            tracing::warn!("live sync thread panicked");
        }
    }
}

fn diff(previous: &BTreeMap<String, Entity>, current: &BTreeMap<String, Entity>) -> Vec<ChangeEvent> {
    let mut changes = Vec::new();
    for (id, entity) in current {
        match previous.get(id) {
            None => changes.push(ChangeEvent::Added {
                entity: entity.clone(),
            }),
            Some(old) if old != entity => changes.push(ChangeEvent::Modified {
                entity: entity.clone(),
            }),
            Some(_) => {}
        }
    }
    for (id, entity) in previous {
        if !current.contains_key(id) {
            changes.push(ChangeEvent::Removed {
                id: id.clone(),
                kind: entity.kind(),
            });
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemFields, Task};
    use crate::store::{delete_document, import_raw_document, insert_document, put_document};
    use tempfile::tempdir;

    fn task(id: &str, title: &str) -> Entity {
        Entity::Task(Task {
            id: id.into(),
            title: title.into(),
            fields: ItemFields::default(),
            project_id: None,
        })
    }

    #[test]
    fn test_diff_classifies_changes() {
        let mut before = BTreeMap::new();
        before.insert("TID-001".to_string(), task("TID-001", "a"));
        before.insert("TID-002".to_string(), task("TID-002", "b"));
        let mut after = BTreeMap::new();
        after.insert("TID-002".to_string(), task("TID-002", "b2"));
        after.insert("TID-003".to_string(), task("TID-003", "c"));

        let changes = diff(&before, &after);
        assert_eq!(changes.len(), 3);
        assert!(matches!(&changes[0], ChangeEvent::Modified { entity } if entity.id() == "TID-002"));
        assert!(matches!(&changes[1], ChangeEvent::Added { entity } if entity.id() == "TID-003"));
        assert!(matches!(&changes[2], ChangeEvent::Removed { id, kind: EntityKind::Task } if id == "TID-001"));
    }

    #[test]
    fn test_poll_publishes_only_on_foreign_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        let config = VaultConfig::default();

        let mut sync = LiveSync::open(&path, config.clone()).unwrap();
        let rx = sync.subscribe();
        let writer = DocumentStore::open(&path, &config).unwrap();

        let first = sync.poll().unwrap().unwrap();
        assert!(first.entities.is_empty());
        assert!(first.migration.is_some());
        assert!(sync.poll().unwrap().is_none());

        insert_document(writer.conn(), &task("TID-001", "one")).unwrap();
        let second = sync.poll().unwrap().unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(second.changes.len(), 1);
        assert!(second.migration.is_none());

        put_document(writer.conn(), &task("TID-001", "renamed")).unwrap();
        delete_document(writer.conn(), "TID-001").unwrap();
        let third = sync.poll().unwrap().unwrap();
        assert!(third.entities.is_empty());
        assert!(matches!(&third.changes[..], [ChangeEvent::Removed { .. }]));

        let received: Vec<u64> = rx.try_iter().map(|p| p.sequence).collect();
        assert_eq!(received, vec![1, 2, 3]);
    }

    #[test]
    fn test_refresh_migrates_legacy_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.db");
        let config = VaultConfig::default();

        let mut sync = LiveSync::open(&path, config.clone()).unwrap();
        let writer = DocumentStore::open(&path, &config).unwrap();
        import_raw_document(
            writer.conn(),
            "legacy-1",
            false,
            &serde_json::json!({"title": "Old task"}),
        )
        .unwrap();

        let publication = sync.refresh().unwrap();
        assert_eq!(publication.entities.len(), 1);
        assert_eq!(publication.entities[0].id(), "TID-001");
        assert_eq!(publication.migration.as_ref().unwrap().tasks_migrated, 1);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let dir = tempdir().unwrap();
        let mut sync = LiveSync::open(&dir.path().join("store.db"), VaultConfig::default()).unwrap();
        drop(sync.subscribe());
        let kept = sync.subscribe();

        sync.refresh().unwrap();
        assert_eq!(sync.subscribers.len(), 1);
        assert_eq!(kept.try_iter().count(), 1);
    }

    #[test]
    fn test_background_loop_stops() {
        let dir = tempdir().unwrap();
        let config = VaultConfig {
            poll_interval_ms: 5,
            ..VaultConfig::default()
        };
        let mut sync = LiveSync::open(&dir.path().join("store.db"), config).unwrap();
        let rx = sync.subscribe();

        let handle = sync.spawn().unwrap();
        let first = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(first.sequence, 1);
        handle.stop();
    }
}
