//! Settings document and user entries for scprep.
//!
//! This crate defines the schema layer: the TOML settings document
//! (`Settings`) with typed sections for paths, host backend, directory-service
//! parameters and card users, a dotted-path lookup over the raw document, and
//! a completeness check for the fields a full provisioning run needs.

pub mod settings;
pub mod users;

pub use settings::{
    parse_settings_file, parse_settings_str, HostSection, IpaSection, PathsSection, Settings,
    SettingsError, DEFAULT_SETTINGS_PATH, REQUIRED_FIELDS,
};
pub use users::{validate_user_name, UserEntry};
