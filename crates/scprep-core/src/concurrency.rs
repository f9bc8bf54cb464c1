use crate::CoreError;
use fs2::FileExt;
use scprep_store::StateLayout;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Exclusive advisory lock on `<state_dir>/.lock`.
///
/// Provisioning and cleanup both rewrite the journal and touch the host
/// resources it describes, so only one run may hold this at a time. The
/// holder writes its pid into the file so a refused run can name it. The
/// kernel drops the lock if the holder dies.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

fn open_lock_file(path: &Path) -> Result<File, CoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

impl StateLock {
    pub fn for_layout(layout: &StateLayout) -> Result<Option<Self>, CoreError> {
        Self::try_acquire(&layout.lock_file())
    }

    /// Wait until the lock is free.
    pub fn acquire(path: &Path) -> Result<Self, CoreError> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()?;
        Self::claim(file, path)
    }

    /// `None` while another run holds the lock.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, CoreError> {
        let file = open_lock_file(path)?;
        if file.try_lock_exclusive().is_err() {
            debug!("state lock {} is held", path.display());
            return Ok(None);
        }
        Self::claim(file, path).map(Some)
    }

    fn claim(mut file: File, path: &Path) -> Result<Self, CoreError> {
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.sync_all()?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Pid recorded by the current or most recent holder.
    pub fn holder(path: &Path) -> Option<u32> {
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C lets the current protect-then-mutate step finish and stops
/// before the next one; a second Ctrl-C exits immediately.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("\ninterrupt received; stopping after the current step (again to abort)");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}
