use crate::layout::StateLayout;
use crate::record::RecordKind;
use crate::{fsync_dir, StoreError};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Snapshots resources into the backup root before they are mutated.
///
/// A returned location always holds a complete copy: files are written to a
/// temp file and persisted without clobbering, trees are staged in a temp
/// directory and renamed into place. The target itself is only ever read.
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    pub fn new(layout: &StateLayout) -> Self {
        Self {
            root: layout.backup_root().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy the current state of `target` aside.
    ///
    /// Returns `None` when there is nothing to preserve: the target does not
    /// exist yet, or the kind (`User`, unknown kinds) cannot be snapshotted.
    pub fn backup(&self, kind: &RecordKind, target: &Path) -> Result<Option<PathBuf>, StoreError> {
        match kind {
            RecordKind::File | RecordKind::Directory => {}
            RecordKind::User | RecordKind::Unknown(_) => return Ok(None),
        }

        let meta = match fs::metadata(target) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("backup: {} does not exist, nothing to save", target.display());
                return Ok(None);
            }
            Err(e) => return Err(failed(target, &e)),
        };

        let result = match kind {
            RecordKind::File if meta.is_dir() => {
                return Err(StoreError::BackupFailed {
                    target: target.to_path_buf(),
                    reason: "expected a file, found a directory".to_owned(),
                })
            }
            // Opening a FIFO or device for reading can block or have side effects.
            RecordKind::File if !meta.is_file() => {
                return Err(StoreError::BackupFailed {
                    target: target.to_path_buf(),
                    reason: "expected a regular file".to_owned(),
                })
            }
            RecordKind::Directory if !meta.is_dir() => {
                return Err(StoreError::BackupFailed {
                    target: target.to_path_buf(),
                    reason: "expected a directory".to_owned(),
                })
            }
            RecordKind::File => self.backup_file(target, &meta),
            _ => self.backup_tree(target),
        };

        let location = result.map_err(|e| failed(target, &e))?;
        debug!("backup: {} -> {}", target.display(), location.display());
        Ok(Some(location))
    }

    fn backup_file(&self, target: &Path, meta: &fs::Metadata) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let mut src = fs::File::open(target)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        io::copy(&mut src, tmp.as_file_mut())?;
        tmp.as_file().set_permissions(meta.permissions())?;
        tmp.as_file().sync_all()?;

        let mut dest = self.fresh_path(target);
        loop {
            match tmp.persist_noclobber(&dest) {
                Ok(_) => break,
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    tmp = e.file;
                    dest = self.fresh_path(target);
                }
                Err(e) => return Err(e.error),
            }
        }
        fsync_dir(&self.root)?;
        Ok(dest)
    }

    fn backup_tree(&self, target: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.root)?;
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&self.root)?;
        let copied = copy_tree(target, staging.path())?;

        let dest = self.fresh_path(target);
        fs::rename(staging.path(), &dest)?;
        fsync_dir(&self.root)?;
        debug!("backup: copied {copied} files from {}", target.display());
        Ok(dest)
    }

    /// `<name>.<timestamp>.<blake3(target)[..8]>`, with a counter appended
    /// while the name is taken.
    fn fresh_path(&self, target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map_or_else(|| "root".to_owned(), |n| n.to_string_lossy().into_owned());
        let hash = blake3::hash(target.as_os_str().as_encoded_bytes()).to_hex();
        let base = format!(
            "{name}.{}.{}",
            chrono::Utc::now().format("%Y%m%dT%H%M%S%3f"),
            &hash[..8]
        );
        let mut candidate = self.root.join(&base);
        let mut n = 1;
        while candidate.exists() {
            candidate = self.root.join(format!("{base}.{n}"));
            n += 1;
        }
        candidate
    }
}

fn failed(target: &Path, e: &io::Error) -> StoreError {
    StoreError::BackupFailed {
        target: target.to_path_buf(),
        reason: e.to_string(),
    }
}

/// Recursively copy `src` into `dst`, creating `dst` if needed. Symlinks are
/// recreated as symlinks, not followed. Sockets, FIFOs and device nodes are
/// skipped with a warning. Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<usize> {
    fs::create_dir_all(dst)?;
    fs::set_permissions(dst, fs::metadata(src)?.permissions())?;
    let mut count = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let link = fs::read_link(&src_path)?;
            std::os::unix::fs::symlink(link, &dst_path)?;
        } else if file_type.is_dir() {
            count += copy_tree(&src_path, &dst_path)?;
        } else if !file_type.is_file() {
            warn!("skipping special file {}", src_path.display());
        } else {
            fs::copy(&src_path, &dst_path)?;
            count += 1;
        }
    }
    Ok(count)
}
