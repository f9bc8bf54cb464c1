use scprep_store::{RecordKind, RestoreRecord};
use std::fmt;
use std::path::{Path, PathBuf};

/// A host resource about to be mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    File(PathBuf),
    Directory(PathBuf),
    User(String),
}

impl Resource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Resource::File(path.into())
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Resource::Directory(path.into())
    }

    pub fn user(name: impl Into<String>) -> Self {
        Resource::User(name.into())
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Resource::File(_) => RecordKind::File,
            Resource::Directory(_) => RecordKind::Directory,
            Resource::User(_) => RecordKind::User,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Resource::File(p) | Resource::Directory(p) => Some(p),
            Resource::User(_) => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::File(p) => write!(f, "file {}", p.display()),
            Resource::Directory(p) => write!(f, "dir {}", p.display()),
            Resource::User(name) => write!(f, "user {name}"),
        }
    }
}

/// Proof that a resource has been backed up and its restore record is on
/// disk. Only [`Engine::protect`](crate::Engine::protect) hands these out, and
/// every mutating engine helper demands one for the resource it touches.
#[derive(Debug)]
pub struct ProtectToken {
    resource: Resource,
    record: Option<RestoreRecord>,
}

impl ProtectToken {
    pub(crate) fn new(resource: Resource, record: Option<RestoreRecord>) -> Self {
        Self { resource, record }
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// The journaled record, or `None` for an account that already existed
    /// and therefore must never be removed by cleanup.
    pub fn record(&self) -> Option<&RestoreRecord> {
        self.record.as_ref()
    }

    pub fn is_journaled(&self) -> bool {
        self.record.is_some()
    }

    pub fn backup(&self) -> Option<&Path> {
        self.record.as_ref().and_then(RestoreRecord::backup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_kinds() {
        assert_eq!(Resource::file("/etc/x").kind(), RecordKind::File);
        assert_eq!(Resource::directory("/opt/x").kind(), RecordKind::Directory);
        assert_eq!(Resource::user("alice").kind(), RecordKind::User);
    }

    #[test]
    fn resource_display() {
        assert_eq!(Resource::file("/etc/x").to_string(), "file /etc/x");
        assert_eq!(Resource::user("alice").to_string(), "user alice");
        assert!(Resource::user("alice").path().is_none());
    }
}
