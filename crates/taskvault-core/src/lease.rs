//! Exclusive advisory lease guarding a migration run.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;

/// Held lease. The lock is released on drop.
#[derive(Debug)]
pub struct MigrationLease {
    file: File,
    path: PathBuf,
}

impl MigrationLease {
    /// Try to take the lease without blocking.
    ///
    /// Returns `Ok(None)` when another client holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open lease file: {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "migration lease acquired");
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("Failed to lock lease file: {}", path.display())),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MigrationLease {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to release migration lease");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_holder_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".taskvault").join("migration.lock");

        let first = MigrationLease::try_acquire(&path).unwrap();
        assert!(first.is_some());
        assert!(MigrationLease::try_acquire(&path).unwrap().is_none());

        drop(first);
        assert!(MigrationLease::try_acquire(&path).unwrap().is_some());
    }
}
