use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory layout of the scprep state directory.
///
/// Holds the journal document, its archive, the lock file and (unless the
/// settings point elsewhere) the backup root. Subdirectories are created on
/// [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct StateLayout {
    root: PathBuf,
    backup_root: PathBuf,
}

impl StateLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let backup_root = root.join("backup");
        Self { root, backup_root }
    }

    #[must_use]
    pub fn with_backup_root(mut self, backup_root: impl Into<PathBuf>) -> Self {
        self.backup_root = backup_root.into();
        self
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn journal_file(&self) -> PathBuf {
        self.root.join("journal.json")
    }

    #[inline]
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("journal-archive")
    }

    #[inline]
    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(&self.backup_root)?;
        Ok(())
    }
}
