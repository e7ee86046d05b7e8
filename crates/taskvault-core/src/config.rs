//! Vault layout and tunables.
//!
//! A vault lives in `.taskvault/` under the workspace root:
//! - `store.db`: the SQLite document store
//! - `config.json`: optional tunables (every field has a default)
//! - `migration.lock`: lease file guarding migration runs

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// The directory name for vault data
pub const VAULT_DIR: &str = ".taskvault";

/// The document store filename
pub const STORE_FILE: &str = "store.db";

/// The config filename
pub const CONFIG_FILE: &str = "config.json";

/// The migration lease filename
pub const LEASE_FILE: &str = "migration.lock";

/// Path to the vault directory.
#[must_use]
pub fn vault_dir(root: &Path) -> PathBuf {
    root.join(VAULT_DIR)
}

/// Path to the document store.
#[must_use]
pub fn store_path(root: &Path) -> PathBuf {
    vault_dir(root).join(STORE_FILE)
}

/// Path to the config file.
#[must_use]
pub fn config_path(root: &Path) -> PathBuf {
    vault_dir(root).join(CONFIG_FILE)
}

/// Path to the migration lease file.
#[must_use]
pub fn lease_path(root: &Path) -> PathBuf {
    vault_dir(root).join(LEASE_FILE)
}

/// Tunables for the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// How many times the allocator retries a contended counter transaction.
    pub max_allocation_attempts: u32,
    /// Largest number of document writes committed in one transaction.
    pub batch_limit: usize,
    /// How long SQLite waits on a locked database before reporting busy.
    pub busy_timeout_ms: u64,
    /// Interval between change checks in live sync.
    pub poll_interval_ms: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            max_allocation_attempts: 10,
            batch_limit: 500,
            busy_timeout_ms: 100,
            poll_interval_ms: 250,
        }
    }
}

impl VaultConfig {
    /// Load config from the vault, falling back to defaults if the file is missing.
    pub fn load(root: &Path) -> Result<Self> {
        let path = config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Write config into the vault.
    pub fn save(&self, root: &Path) -> Result<()> {
        self.validate()?;
        let path = config_path(root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, format!("{content}\n"))
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Reject values the store cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_allocation_attempts == 0 {
            bail!("max_allocation_attempts must be at least 1");
        }
        // A migration rewrite deletes one document and writes another in the
        // same transaction, so a batch must fit two writes.
        if self.batch_limit < 2 {
            bail!("batch_limit must be at least 2, got {}", self.batch_limit);
        }
        Ok(())
    }

    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
