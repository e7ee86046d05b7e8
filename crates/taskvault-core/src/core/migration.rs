//! Migration service.

use crate::migration::{MigrationEngine, MigrationReport, MigrationStatus};
use crate::store::DocumentStore;

use super::{CoreResult, VaultContext};

pub struct MigrationService<'a> {
    ctx: &'a VaultContext,
    store: &'a DocumentStore,
}

impl<'a> MigrationService<'a> {
    pub(crate) const fn new(ctx: &'a VaultContext, store: &'a DocumentStore) -> Self {
        Self { ctx, store }
    }

    fn engine(&self) -> MigrationEngine<'a> {
        MigrationEngine::new(self.store, self.ctx.config()).with_lease(self.ctx.lease_path())
    }

    /// Run the migration if the marker is absent. Never fails.
    #[must_use]
    pub fn run_if_needed(&self) -> MigrationReport {
        self.engine().run_if_needed()
    }

    /// Like [`Self::run_if_needed`], but a failed run is an error.
    pub fn run(&self) -> CoreResult<MigrationReport> {
        self.engine().run_if_needed().into_result()
    }

    pub fn status(&self) -> CoreResult<MigrationStatus> {
        Ok(self.engine().status()?)
    }
}
