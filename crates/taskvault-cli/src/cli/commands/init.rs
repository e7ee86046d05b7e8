//! Implementation of `taskvault init`.

use anyhow::Result;
use std::path::Path;

use taskvault_core::config;
use taskvault_core::core::VaultContext;

/// Create the vault directory, default config, and store.
pub fn run_init(root: &Path) -> Result<()> {
    let vault_dir = config::vault_dir(root);
    if config::store_path(root).exists() {
        println!("Already initialized: {}", vault_dir.display());
        return Ok(());
    }

    let ctx = VaultContext::init(root)?;
    tracing::info!(root = %root.display(), "initialized vault");

    println!("Initialized taskvault in {}", vault_dir.display());
    println!("  Created: {}", ctx.store_path().display());
    println!("  Config:  {}", config::config_path(root).display());
    Ok(())
}
