use crate::backend::{CommandSpec, HostBackend};
use crate::RuntimeError;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Filesystem-backed host double.
///
/// Accounts are directories under `<root>/home`; an account exists exactly as
/// long as its home directory does. Every command is appended to
/// `<root>/commands.log` as a JSON line instead of being executed. State lives
/// on disk so a provisioning run and a later cleanup run in a separate process
/// see the same accounts.
pub struct MockHost {
    root: PathBuf,
}

impl MockHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn home_dir(&self, name: &str) -> PathBuf {
        self.root.join("home").join(name)
    }

    fn log_path(&self) -> PathBuf {
        self.root.join("commands.log")
    }

    fn fail_marker(&self, program: &str) -> PathBuf {
        let base = Path::new(program)
            .file_name()
            .map_or_else(|| program.to_owned(), |n| n.to_string_lossy().into_owned());
        self.root.join("fail").join(base)
    }

    /// Make every later command whose program (or first argument, for
    /// `bash script.sh` style calls) has this base name fail with status 1.
    pub fn fail_program(&self, program: &str) -> Result<(), RuntimeError> {
        let marker = self.fail_marker(program);
        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(marker, "")?;
        Ok(())
    }

    /// Commands run so far, oldest first.
    pub fn commands(&self) -> Result<Vec<CommandSpec>, RuntimeError> {
        let path = self.log_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(path)?);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let cmd: CommandSpec = serde_json::from_str(&line).map_err(|e| {
                RuntimeError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })?;
            out.push(cmd);
        }
        Ok(out)
    }

    fn should_fail(&self, command: &CommandSpec) -> bool {
        std::iter::once(&command.program)
            .chain(command.args.first())
            .any(|p| self.fail_marker(p).exists())
    }
}

impl HostBackend for MockHost {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn user_exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.home_dir(name).is_dir())
    }

    fn create_user(&self, name: &str) -> Result<(), RuntimeError> {
        if self.user_exists(name)? {
            return Err(RuntimeError::UserExists(name.to_owned()));
        }
        fs::create_dir_all(self.home_dir(name))?;
        Ok(())
    }

    fn set_password(&self, name: &str, password: &str) -> Result<(), RuntimeError> {
        if !self.user_exists(name)? {
            return Err(RuntimeError::UserNotFound(name.to_owned()));
        }
        fs::write(self.home_dir(name).join(".mock-password"), password)?;
        Ok(())
    }

    fn delete_user(&self, name: &str) -> Result<(), RuntimeError> {
        if !self.user_exists(name)? {
            return Err(RuntimeError::UserNotFound(name.to_owned()));
        }
        fs::remove_dir_all(self.home_dir(name))?;
        Ok(())
    }

    fn run(&self, command: &CommandSpec) -> Result<String, RuntimeError> {
        fs::create_dir_all(&self.root)?;
        let line = serde_json::to_string(command)
            .map_err(|e| RuntimeError::Io(std::io::Error::other(e)))?;
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())?;
        writeln!(log, "{line}")?;

        if self.should_fail(command) {
            return Err(RuntimeError::CommandFailed {
                command: command.to_string(),
                status: 1,
                stderr: "mock failure".to_owned(),
            });
        }
        Ok(format!("mock-run: {command}\n"))
    }
}
