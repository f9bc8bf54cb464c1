use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// An external program invocation. Provisioning scripts, `openssl`, `ipa`
/// and `semodule` calls all go through this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Fed to the child's stdin. Never logged or serialized.
    #[serde(skip)]
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// The host operations provisioning and cleanup need.
///
/// Everything that touches OS accounts or spawns a process goes through this
/// trait so the journal core never depends on how a mutation is carried out.
pub trait HostBackend: Send + Sync {
    fn name(&self) -> &str;

    fn user_exists(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Create a local account with a home directory.
    fn create_user(&self, name: &str) -> Result<(), RuntimeError>;

    fn set_password(&self, name: &str, password: &str) -> Result<(), RuntimeError>;

    /// Delete an account together with its home directory. A missing account
    /// is `RuntimeError::UserNotFound`.
    fn delete_user(&self, name: &str) -> Result<(), RuntimeError>;

    /// Run a command to completion and return its stdout. A non-zero exit is
    /// `RuntimeError::CommandFailed`.
    fn run(&self, command: &CommandSpec) -> Result<String, RuntimeError>;
}

pub fn select_host(name: &str, state_root: &Path) -> Result<Box<dyn HostBackend>, RuntimeError> {
    match name {
        "system" => Ok(Box::new(crate::system::SystemHost::new())),
        "mock" => Ok(Box::new(crate::mock::MockHost::new(
            state_root.join("mock-host"),
        ))),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}
