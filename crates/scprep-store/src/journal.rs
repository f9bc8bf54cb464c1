use crate::layout::StateLayout;
use crate::record::RestoreRecord;
use crate::{fsync_dir, StoreError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Current journal document version. Incremented on incompatible changes.
pub const JOURNAL_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct JournalDocument {
    format_version: u32,
    #[serde(default)]
    records: Vec<RestoreRecord>,
}

impl Default for JournalDocument {
    fn default() -> Self {
        Self {
            format_version: JOURNAL_FORMAT_VERSION,
            records: Vec::new(),
        }
    }
}

/// Durable, ordered list of restore records.
///
/// Every provisioning step appends a record before it mutates the host; the
/// cleanup pass reads them all back in append order. Each append is a full
/// read-modify-write of one JSON document, replaced atomically, so a crash
/// leaves either the old or the new list on disk and never a torn one.
///
/// Appends are not safe across concurrent processes; callers serialize them
/// with the state lock.
pub struct Journal {
    path: PathBuf,
    archive_dir: PathBuf,
}

impl Journal {
    pub fn new(layout: &StateLayout) -> Self {
        Self {
            path: layout.journal_file(),
            archive_dir: layout.archive_dir(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably append one record. Returns only after the record is on disk.
    pub fn append(&self, record: RestoreRecord) -> Result<(), StoreError> {
        if !record.kind().is_known() {
            warn!(
                "journal: record kind '{}' for {} is not known and cannot be restored by this version",
                record.kind(),
                record.target()
            );
        }
        let mut doc = self.read_document().map_err(|e| match e {
            StoreError::Io(io) => {
                StoreError::JournalWriteFailed(format!("cannot read {}: {io}", self.path.display()))
            }
            other => other,
        })?;
        debug!("journal append: {record}");
        doc.records.push(record);
        self.write_document(&doc)
            .map_err(|e| StoreError::JournalWriteFailed(e.to_string()))
    }

    /// All records in append order. A missing journal is an empty one.
    pub fn load_all(&self) -> Result<Vec<RestoreRecord>, StoreError> {
        Ok(self.read_document()?.records)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.load_all()?.is_empty())
    }

    /// Overwrite the record list. Only the cleanup pass uses this, to keep
    /// the records it could not reverse.
    pub fn replace(&self, records: Vec<RestoreRecord>) -> Result<(), StoreError> {
        let doc = JournalDocument {
            format_version: JOURNAL_FORMAT_VERSION,
            records,
        };
        self.write_document(&doc)
            .map_err(|e| StoreError::JournalWriteFailed(e.to_string()))
    }

    /// Move the current journal into the archive directory. Returns the
    /// archived path, or `None` if there was no journal.
    pub fn archive(&self) -> Result<Option<PathBuf>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        fs::create_dir_all(&self.archive_dir)?;
        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3f").to_string();
        let mut dest = self.archive_dir.join(format!("journal.{stamp}.json"));
        let mut n = 1;
        while dest.exists() {
            dest = self.archive_dir.join(format!("journal.{stamp}.{n}.json"));
            n += 1;
        }
        fs::rename(&self.path, &dest)?;
        fsync_dir(&self.archive_dir)?;
        if let Some(parent) = self.path.parent() {
            fsync_dir(parent)?;
        }
        info!("journal archived to {}", dest.display());
        Ok(Some(dest))
    }

    fn read_document(&self) -> Result<JournalDocument, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(JournalDocument::default()),
            Err(e) => return Err(StoreError::Io(e)),
        };
        let doc: JournalDocument =
            serde_json::from_str(&content).map_err(|e| StoreError::JournalCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if doc.format_version != JOURNAL_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: JOURNAL_FORMAT_VERSION,
                found: doc.format_version,
            });
        }
        Ok(doc)
    }

    fn write_document(&self, doc: &JournalDocument) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        fs::create_dir_all(&dir)?;
        let content = serde_json::to_string_pretty(doc)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordKind;

    fn setup() -> (tempfile::TempDir, Journal) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path());
        layout.initialize().unwrap();
        let journal = Journal::new(&layout);
        (dir, journal)
    }

    #[test]
    fn missing_journal_loads_empty() {
        let (_dir, journal) = setup();
        assert!(journal.load_all().unwrap().is_empty());
        assert!(journal.is_empty().unwrap());
    }

    #[test]
    fn append_preserves_order_without_loss() {
        let (_dir, journal) = setup();
        let records: Vec<RestoreRecord> = (0..25)
            .map(|i| RestoreRecord::file(Path::new(&format!("/etc/f{i}")), None))
            .collect();
        for r in &records {
            journal.append(r.clone()).unwrap();
        }
        assert_eq!(journal.load_all().unwrap(), records);
    }

    #[test]
    fn same_target_may_repeat() {
        let (_dir, journal) = setup();
        let target = Path::new("/etc/sssd/sssd.conf");
        journal
            .append(RestoreRecord::file(target, Some(PathBuf::from("/b/1"))))
            .unwrap();
        journal
            .append(RestoreRecord::file(target, Some(PathBuf::from("/b/2"))))
            .unwrap();
        let loaded = journal.load_all().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].backup(), Some(Path::new("/b/1")));
        assert_eq!(loaded[1].backup(), Some(Path::new("/b/2")));
    }

    #[test]
    fn unknown_kind_is_appended() {
        let (_dir, journal) = setup();
        journal
            .append(RestoreRecord::new(
                RecordKind::Unknown("service".to_owned()),
                "virt_cacard.service",
                None,
            ))
            .unwrap();
        let loaded = journal.load_all().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].kind().as_str(), "service");
    }

    #[test]
    fn corrupt_journal_is_fatal_for_append() {
        let (_dir, journal) = setup();
        fs::write(journal.path(), "NOT JSON{{").unwrap();
        let err = journal.append(RestoreRecord::user("alice")).unwrap_err();
        assert!(matches!(err, StoreError::JournalCorrupt { .. }));
        // The corrupt document is left for inspection, never replaced.
        assert_eq!(fs::read_to_string(journal.path()).unwrap(), "NOT JSON{{");
    }

    #[test]
    fn unwritable_state_dir_is_write_failure() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, journal) = setup();
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o555)).unwrap();
        // Permission bits do not bind root.
        let writable = fs::write(dir.path().join(".canary"), "").is_ok();
        let result = journal.append(RestoreRecord::user("alice"));
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();
        if writable {
            return;
        }

        let err = result.unwrap_err();
        assert!(matches!(err, StoreError::JournalWriteFailed(_)), "{err}");
        assert!(!journal.path().exists());
    }

    #[test]
    fn unreadable_journal_is_write_failure() {
        let (_dir, journal) = setup();
        // A directory where the journal file belongs cannot be read as one.
        fs::create_dir(journal.path()).unwrap();
        let err = journal.append(RestoreRecord::user("alice")).unwrap_err();
        match err {
            StoreError::JournalWriteFailed(reason) => assert!(reason.starts_with("cannot read")),
            other => panic!("expected a write failure, got {other}"),
        }
        assert!(journal.path().is_dir());
    }

    #[test]
    fn version_mismatch_is_reported() {
        let (_dir, journal) = setup();
        fs::write(journal.path(), r#"{"format_version":99,"records":[]}"#).unwrap();
        assert!(matches!(
            journal.load_all(),
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
    }

    #[test]
    fn replace_overwrites_records() {
        let (_dir, journal) = setup();
        journal.append(RestoreRecord::user("a")).unwrap();
        journal.append(RestoreRecord::user("b")).unwrap();
        journal.replace(vec![RestoreRecord::user("b")]).unwrap();
        assert_eq!(journal.load_all().unwrap(), vec![RestoreRecord::user("b")]);
        journal.replace(Vec::new()).unwrap();
        assert!(journal.is_empty().unwrap());
    }

    #[test]
    fn archive_moves_journal_away() {
        let (dir, journal) = setup();
        assert!(journal.archive().unwrap().is_none());

        journal.append(RestoreRecord::user("alice")).unwrap();
        let archived = journal.archive().unwrap().unwrap();
        assert!(archived.starts_with(dir.path().join("journal-archive")));
        assert!(archived.exists());
        assert!(!journal.path().exists());
        assert!(journal.load_all().unwrap().is_empty());
    }

    #[test]
    fn no_temp_files_left_behind() {
        let (dir, journal) = setup();
        for i in 0..5 {
            journal.append(RestoreRecord::user(&format!("u{i}"))).unwrap();
        }
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
