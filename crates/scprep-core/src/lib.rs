//! Core engine for scprep host provisioning.
//!
//! This crate ties together the settings schema, the restore journal, and the
//! host backends into the `Engine`: the only way to mutate a host resource is
//! to first obtain a `ProtectToken`, which snapshots the resource and durably
//! journals how to reverse the change. The cleanup engine replays the journal
//! to return the host to its original state. Provisioning steps (identity
//! service, soft HSM, virtual card service, local CA, IPA enrollment) are
//! built on top of that protocol.

pub mod concurrency;
pub mod engine;
pub mod ini;
pub mod protect;
pub mod provision;
pub mod render;
pub mod restore;

pub use concurrency::{install_signal_handler, shutdown_requested, StateLock};
pub use engine::{CleanupOptions, Engine};
pub use protect::{ProtectToken, Resource};
pub use provision::{HostPaths, PrepareOptions, Provisioner, ScriptSet};
pub use restore::{cleanup, describe, CleanupReport, RecordOutcome, RecordStatus, ReversalError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("settings error: {0}")]
    Settings(#[from] scprep_schema::SettingsError),
    #[error("store error: {0}")]
    Store(#[from] scprep_store::StoreError),
    #[error("host error: {0}")]
    Runtime(#[from] scprep_runtime::RuntimeError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protect token for {token} cannot authorize a mutation of {requested}")]
    TokenMismatch { token: String, requested: String },
    #[error("missing setting: {0}")]
    MissingSetting(String),
    #[error("interrupted before {0}")]
    Interrupted(String),
}
