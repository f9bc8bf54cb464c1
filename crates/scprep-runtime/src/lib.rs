//! Host backends for scprep.
//!
//! This crate implements the execution layer the provisioning core talks to:
//! the pluggable `HostBackend` trait for OS account management and external
//! command invocation, the `SystemHost` implementation that shells out to
//! `useradd`/`userdel`/`chpasswd` and provisioning scripts, a filesystem-backed
//! `MockHost` for tests, and prerequisite checking.

pub mod backend;
pub mod mock;
pub mod prereq;
pub mod system;

pub use backend::{select_host, CommandSpec, HostBackend};
pub use mock::MockHost;
pub use prereq::{check_ipa_prereqs, check_system_prereqs, format_missing, is_root, MissingPrereq};
pub use system::SystemHost;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("host backend '{0}' is not available")]
    BackendUnavailable(String),
    #[error("command '{command}' failed with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("user '{0}' does not exist")]
    UserNotFound(String),
    #[error("user '{0}' already exists")]
    UserExists(String),
}
