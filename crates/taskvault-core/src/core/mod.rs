//! Service layer for taskvault-core.
//!
//! Provides typed, high-level APIs for entity, comment, and migration
//! operations. Opening services prepares the store: schema, interrupted
//! cascades, and the one-time legacy id migration.
//!
//! # Usage
//!
//! ```no_run
//! use std::path::Path;
//! use taskvault_core::core::VaultContext;
//! use taskvault_core::model::NewEntity;
//!
//! let ctx = VaultContext::new(Path::new("/repo")).unwrap();
//! let services = ctx.services().unwrap();
//! let id = services.create_entity(NewEntity::project("Launch"), "alice").unwrap();
//! assert_eq!(id, "PID-001");
//! ```

pub mod comments;
pub mod entities;
pub mod errors;
pub mod migration;

pub use errors::{CoreError, CoreResult};

use std::path::{Path, PathBuf};

use crate::config::{self, VaultConfig};
use crate::ids::EntityKind;
use crate::integrity::ReferentialIntegrity;
use crate::migration::MigrationReport;
use crate::model::{Comment, Entity, EntityPatch, NewComment, NewEntity, Task};
use crate::store::DocumentStore;
use crate::sync::LiveSync;

/// Context for taskvault services.
///
/// Holds the workspace root and the loaded config.
#[derive(Debug, Clone)]
pub struct VaultContext {
    root: PathBuf,
    config: VaultConfig,
}

impl VaultContext {
    /// Create a context for an initialized vault.
    pub fn new(root: &Path) -> CoreResult<Self> {
        if !config::vault_dir(root).exists() {
            return Err(CoreError::NotInitialized {
                path: root.display().to_string(),
            });
        }
        let config = VaultConfig::load(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
        })
    }

    /// Create the vault directory, default config, and store schema.
    ///
    /// Safe to call on an existing vault; nothing is overwritten.
    pub fn init(root: &Path) -> CoreResult<Self> {
        if !config::config_path(root).exists() {
            VaultConfig::default().save(root)?;
        }
        let ctx = Self::new(root)?;
        ctx.open_store()?;
        Ok(ctx)
    }

    /// Use a config other than the one on disk.
    #[must_use]
    pub fn with_config(mut self, config: VaultConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub const fn config(&self) -> &VaultConfig {
        &self.config
    }

    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        config::store_path(&self.root)
    }

    #[must_use]
    pub fn lease_path(&self) -> PathBuf {
        config::lease_path(&self.root)
    }

    /// Open a fresh connection with the schema in place.
    pub fn open_store(&self) -> CoreResult<DocumentStore> {
        let store = DocumentStore::open(&self.store_path(), &self.config)?;
        store.init_schema()?;
        Ok(store)
    }

    /// Open the store and bring it up to date.
    ///
    /// Finishes interrupted cascade deletes, then runs the legacy id
    /// migration if it has not completed. A failed migration does not fail
    /// the open; its report is kept on the services.
    pub fn services(&self) -> CoreResult<VaultServices> {
        let store = self.open_store()?;
        ReferentialIntegrity::new(&store, self.config.batch_limit).resume_pending_cascades()?;

        let mut services = VaultServices {
            ctx: self.clone(),
            store,
            startup_migration: None,
        };
        services.startup_migration = Some(services.run_migration_if_needed());
        Ok(services)
    }

    /// A live sync loop on its own connection.
    pub fn live_sync(&self) -> CoreResult<LiveSync> {
        let sync = LiveSync::open(&self.store_path(), self.config.clone())?;
        Ok(sync.with_lease(self.lease_path()))
    }
}

/// Facade providing all taskvault service APIs.
pub struct VaultServices {
    ctx: VaultContext,
    store: DocumentStore,
    startup_migration: Option<MigrationReport>,
}

impl VaultServices {
    /// Access entity operations.
    #[must_use]
    pub const fn entities(&self) -> entities::EntityService<'_> {
        entities::EntityService::new(&self.ctx, &self.store)
    }

    /// Access comment operations.
    #[must_use]
    pub const fn comments(&self) -> comments::CommentService<'_> {
        comments::CommentService::new(&self.store)
    }

    /// Access migration operations.
    #[must_use]
    pub const fn migration(&self) -> migration::MigrationService<'_> {
        migration::MigrationService::new(&self.ctx, &self.store)
    }

    /// Report of the migration attempted when these services opened.
    #[must_use]
    pub const fn startup_migration(&self) -> Option<&MigrationReport> {
        self.startup_migration.as_ref()
    }

    /// Get a reference to the underlying document store.
    #[must_use]
    pub const fn store(&self) -> &DocumentStore {
        &self.store
    }

    #[must_use]
    pub const fn context(&self) -> &VaultContext {
        &self.ctx
    }

    // ------------------------------------------------------------------------
    // Shorthands
    // ------------------------------------------------------------------------

    pub fn allocate(&self, kind: EntityKind) -> CoreResult<String> {
        self.entities().allocate(kind)
    }

    pub fn create_entity(&self, new: NewEntity, actor: &str) -> CoreResult<String> {
        self.entities().create(new, actor)
    }

    pub fn update_entity(&self, id: &str, patch: EntityPatch, actor: &str) -> CoreResult<bool> {
        self.entities().update(id, patch, actor)
    }

    pub fn delete_entity(&self, id: &str) -> CoreResult<bool> {
        self.entities().delete(id)
    }

    pub fn add_comment(&self, id: &str, comment: NewComment) -> CoreResult<bool> {
        self.comments().add(id, comment)
    }

    pub fn remove_comment(&self, id: &str, comment: &Comment) -> CoreResult<bool> {
        self.comments().remove(id, comment)
    }

    pub fn list_child_tasks(&self, project_id: &str) -> CoreResult<Vec<Task>> {
        self.entities().list_child_tasks(project_id)
    }

    pub fn get(&self, id: &str) -> CoreResult<Option<Entity>> {
        self.entities().get(id)
    }

    pub fn list(&self) -> CoreResult<Vec<Entity>> {
        self.entities().list()
    }

    pub fn run_migration_if_needed(&self) -> MigrationReport {
        self.migration().run_if_needed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_requires_init() {
        let dir = tempdir().unwrap();
        let err = VaultContext::new(dir.path()).unwrap_err();
        assert!(matches!(err, CoreError::NotInitialized { .. }));
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempdir().unwrap();
        let custom = VaultConfig {
            batch_limit: 7,
            ..VaultConfig::default()
        };
        VaultContext::init(dir.path()).unwrap();
        custom.save(dir.path()).unwrap();

        let ctx = VaultContext::init(dir.path()).unwrap();
        assert_eq!(ctx.config().batch_limit, 7);
        assert!(ctx.store_path().exists());
    }

    #[test]
    fn test_services_run_startup_migration() {
        let dir = tempdir().unwrap();
        let ctx = VaultContext::init(dir.path()).unwrap();

        let services = ctx.services().unwrap();
        assert!(services.startup_migration().unwrap().is_complete());

        let again = ctx.services().unwrap();
        let report = again.startup_migration().unwrap();
        assert_eq!(report.outcome, crate::migration::MigrationOutcome::AlreadyComplete);
        assert_eq!(report.documents_written, 0);
    }
}
