//! Restore journal, backup store, and state directory layout for scprep.
//!
//! This crate provides the persistence layer of the mutation journal: the
//! `Journal` of `RestoreRecord`s kept in a dedicated JSON document with atomic
//! writes, the `BackupStore` that snapshots files and directory trees before
//! they are mutated, and `StateLayout` for the state directory structure.

pub mod backup;
pub mod journal;
pub mod layout;
pub mod record;

pub use backup::{copy_tree, BackupStore};
pub use journal::{Journal, JOURNAL_FORMAT_VERSION};
pub use layout::StateLayout;
pub use record::{RecordKind, RestoreRecord};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee that a rename survives a crash until the parent
/// directory has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("backup of '{}' failed: {reason}", target.display())]
    BackupFailed { target: PathBuf, reason: String },
    #[error("journal write failed: {0}")]
    JournalWriteFailed(String),
    #[error("journal '{}' is corrupt: {reason}", path.display())]
    JournalCorrupt { path: PathBuf, reason: String },
    #[error("journal format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display_backup_failed() {
        let e = StoreError::BackupFailed {
            target: PathBuf::from("/etc/sssd/sssd.conf"),
            reason: "permission denied".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("/etc/sssd/sssd.conf"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn store_error_display_journal_write_failed() {
        let e = StoreError::JournalWriteFailed("disk full".to_owned());
        assert!(e.to_string().contains("disk full"));
    }

    #[test]
    fn store_error_display_journal_corrupt() {
        let e = StoreError::JournalCorrupt {
            path: PathBuf::from("/var/lib/scprep/journal.json"),
            reason: "expected value".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("journal.json"));
        assert!(msg.contains("expected value"));
    }

    #[test]
    fn store_error_display_version_mismatch() {
        let e = StoreError::VersionMismatch {
            expected: 1,
            found: 7,
        };
        let msg = e.to_string();
        assert!(msg.contains('1'));
        assert!(msg.contains('7'));
    }
}
