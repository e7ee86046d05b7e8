//! Shared helpers for CLI commands.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::env;
use std::path::Path;

use taskvault_core::access::{Action, Authorizer, DenyList};
use taskvault_core::core::{CoreError, VaultContext, VaultServices};
use taskvault_core::migration::MigrationOutcome;
use taskvault_core::normalize::parse_timestamp_str;

/// Comma-separated list of actions this process may not perform.
pub const DENY_ENV: &str = "TASKVAULT_DENY";

/// Open the context, with a hint when the vault is missing.
pub fn open_context(root: &Path) -> Result<VaultContext> {
    match VaultContext::new(root) {
        Ok(ctx) => Ok(ctx),
        Err(CoreError::NotInitialized { path }) => {
            bail!("Not a taskvault directory: {path}\n  To fix: taskvault init")
        }
        Err(e) => Err(e.into()),
    }
}

/// Open services, surfacing a failed startup migration as a warning.
///
/// Commands keep working against normalized data when the migration fails.
pub fn open_services(root: &Path) -> Result<VaultServices> {
    let services = open_context(root)?.services()?;
    if let Some(report) = services.startup_migration() {
        if let MigrationOutcome::Failed { reason } = &report.outcome {
            tracing::warn!(%reason, "legacy id migration did not complete");
        }
    }
    Ok(services)
}

/// The authorizer configured through `TASKVAULT_DENY`.
#[must_use]
pub fn env_authorizer() -> DenyList {
    env::var(DENY_ENV)
        .map(|list| DenyList::parse(&list))
        .unwrap_or_default()
}

/// Fail unless `authorizer` permits `action`.
pub fn authorize(authorizer: &dyn Authorizer, action: Action) -> Result<()> {
    if !authorizer.allowed(action) {
        bail!("Action not permitted: {action}\n  To fix: remove it from ${DENY_ENV}");
    }
    Ok(())
}

/// Check the environment policy for a mutating command.
pub fn require(action: Action) -> Result<()> {
    authorize(&env_authorizer(), action)
}

/// Parse a user-supplied date.
pub fn parse_date(flag: &str, value: &str) -> Result<DateTime<Utc>> {
    match parse_timestamp_str(value) {
        Some(ts) => Ok(ts),
        None => bail!("Invalid --{flag} value: {value:?} (expected YYYY-MM-DD or RFC 3339)"),
    }
}

pub fn parse_optional_date(flag: &str, value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_date(flag, v)).transpose()
}

/// Actionable "not found" error.
pub fn not_found_error(id: &str) -> anyhow::Error {
    anyhow::anyhow!("Not found: {id}\n  To fix: taskvault tasks list  (or: taskvault projects list)")
}
