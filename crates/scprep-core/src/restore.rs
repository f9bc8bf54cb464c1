//! Cleanup engine: reverses journaled mutations.
//!
//! Records are reversed newest first, so a target protected several times
//! ends up with its oldest backup, the state before provisioning touched it.
//! Each reversal is independent; a failure is recorded in the report and the
//! pass moves on to the next record.

use scprep_runtime::{HostBackend, RuntimeError};
use scprep_store::{copy_tree, RecordKind, RestoreRecord};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ReversalError {
    #[error("backup '{}' is missing", .0.display())]
    BackupMissing(PathBuf),
    #[error("failed to {action} '{}': {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    #[error("{0}")]
    Host(#[from] RuntimeError),
}

fn io_err<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> ReversalError + 'a {
    move |source| ReversalError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RecordStatus {
    /// Target was put back from its backup.
    Restored,
    /// Target had no prior state and was deleted.
    Removed,
    /// Target had no prior state and is already gone.
    AlreadyAbsent,
    UserDeleted,
    /// Unknown record kind, kept for a version that understands it.
    Skipped(String),
    Failed(String),
}

impl RecordStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RecordStatus::Restored => "restored",
            RecordStatus::Removed => "removed",
            RecordStatus::AlreadyAbsent => "already_absent",
            RecordStatus::UserDeleted => "user_deleted",
            RecordStatus::Skipped(_) => "skipped",
            RecordStatus::Failed(_) => "failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, RecordStatus::Failed(_))
    }

    /// Whether the record has to stay in the journal after this pass.
    pub fn keeps_record(&self) -> bool {
        matches!(self, RecordStatus::Failed(_) | RecordStatus::Skipped(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordOutcome {
    pub record: RestoreRecord,
    #[serde(flatten)]
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub outcomes: Vec<RecordOutcome>,
}

impl CleanupReport {
    pub fn is_success(&self) -> bool {
        !self.outcomes.iter().any(|o| o.status.is_failure())
    }

    pub fn failures(&self) -> impl Iterator<Item = &RecordOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_failure())
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    pub fn skipped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, RecordStatus::Skipped(_)))
            .count()
    }

    /// Records that must survive this pass, back in journal order.
    pub fn remaining_records(&self) -> Vec<RestoreRecord> {
        self.outcomes
            .iter()
            .rev()
            .filter(|o| o.status.keeps_record())
            .map(|o| o.record.clone())
            .collect()
    }
}

/// Reverse every record, last-appended first. Outcomes are listed in the
/// order the records were processed.
pub fn cleanup(records: &[RestoreRecord], host: &dyn HostBackend) -> CleanupReport {
    let mut outcomes = Vec::with_capacity(records.len());
    for record in records.iter().rev() {
        let status = match reverse(record, host) {
            Ok(status) => {
                debug!("cleanup: {record}: {status:?}");
                status
            }
            Err(e) => {
                warn!("cleanup: could not reverse {record}: {e}");
                RecordStatus::Failed(e.to_string())
            }
        };
        outcomes.push(RecordOutcome {
            record: record.clone(),
            status,
        });
    }
    let report = CleanupReport { outcomes };
    info!(
        "cleanup pass: {} records, {} failed, {} skipped",
        report.outcomes.len(),
        report.failed_count(),
        report.skipped_count()
    );
    report
}

/// What reversing `record` would do, without doing it.
pub fn describe(record: &RestoreRecord) -> String {
    let target = record.target();
    match (record.kind(), record.backup()) {
        (RecordKind::File, Some(b)) => format!("restore file {target} from {}", b.display()),
        (RecordKind::File, None) => format!("delete file {target}"),
        (RecordKind::Directory, Some(b)) => {
            format!("replace directory {target} with {}", b.display())
        }
        (RecordKind::Directory, None) => format!("delete directory {target}"),
        (RecordKind::User, _) => format!("delete user {target} and its home directory"),
        (RecordKind::Unknown(kind), _) => format!("skip {target} (unknown kind '{kind}')"),
    }
}

fn reverse(record: &RestoreRecord, host: &dyn HostBackend) -> Result<RecordStatus, ReversalError> {
    match record.kind() {
        RecordKind::File => reverse_file(record.target_path(), record.backup()),
        RecordKind::Directory => reverse_directory(record.target_path(), record.backup()),
        RecordKind::User => {
            host.delete_user(record.target())?;
            Ok(RecordStatus::UserDeleted)
        }
        RecordKind::Unknown(kind) => {
            warn!(
                "cleanup: skipping {} with unknown record kind '{kind}'",
                record.target()
            );
            Ok(RecordStatus::Skipped(format!("unknown record kind '{kind}'")))
        }
    }
}

fn reverse_file(target: &Path, backup: Option<&Path>) -> Result<RecordStatus, ReversalError> {
    let Some(backup) = backup else {
        return match fs::remove_file(target) {
            Ok(()) => Ok(RecordStatus::Removed),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(RecordStatus::AlreadyAbsent),
            Err(e) => Err(io_err("remove", target)(e)),
        };
    };

    if !backup.is_file() {
        return Err(ReversalError::BackupMissing(backup.to_path_buf()));
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(io_err("create parent of", target))?;
    }
    fs::copy(backup, target).map_err(io_err("restore", target))?;
    Ok(RecordStatus::Restored)
}

fn reverse_directory(target: &Path, backup: Option<&Path>) -> Result<RecordStatus, ReversalError> {
    // Never tear down the current tree unless there is something to put back.
    if let Some(backup) = backup {
        if !backup.is_dir() {
            return Err(ReversalError::BackupMissing(backup.to_path_buf()));
        }
    }

    let existed = remove_tree(target)?;

    match backup {
        Some(backup) => {
            copy_tree(backup, target).map_err(io_err("restore", target))?;
            Ok(RecordStatus::Restored)
        }
        None if existed => Ok(RecordStatus::Removed),
        None => Ok(RecordStatus::AlreadyAbsent),
    }
}

/// Remove whatever is at `target`. Returns whether anything was there.
fn remove_tree(target: &Path) -> Result<bool, ReversalError> {
    let meta = match fs::symlink_metadata(target) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(io_err("inspect", target)(e)),
    };
    if meta.is_dir() {
        fs::remove_dir_all(target).map_err(io_err("remove", target))?;
    } else {
        fs::remove_file(target).map_err(io_err("remove", target))?;
    }
    Ok(true)
}
