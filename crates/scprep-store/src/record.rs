use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// What kind of host resource a restore record describes.
///
/// Kinds written by a newer release are kept as `Unknown` so they survive a
/// load/append cycle unchanged; cleanup skips them with a warning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RecordKind {
    File,
    Directory,
    User,
    Unknown(String),
}

impl RecordKind {
    pub fn is_known(&self) -> bool {
        !matches!(self, RecordKind::Unknown(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecordKind::File => "file",
            RecordKind::Directory => "dir",
            RecordKind::User => "user",
            RecordKind::Unknown(raw) => raw,
        }
    }
}

impl From<String> for RecordKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "file" => RecordKind::File,
            "dir" | "directory" => RecordKind::Directory,
            "user" => RecordKind::User,
            _ => RecordKind::Unknown(s),
        }
    }
}

impl From<RecordKind> for String {
    fn from(kind: RecordKind) -> Self {
        match kind {
            RecordKind::Unknown(raw) => raw,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the restore journal: enough to reverse a single mutation.
///
/// Records are immutable once built. For `File` and `Directory` the target is
/// the absolute path that was mutated and `backup` points at the saved
/// pre-mutation copy, if there was anything to save. For `User` the target is
/// the account name and there is never a backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreRecord {
    #[serde(rename = "type")]
    kind: RecordKind,
    #[serde(alias = "src", alias = "username")]
    target: String,
    #[serde(
        default,
        alias = "backup_dir",
        skip_serializing_if = "Option::is_none"
    )]
    backup: Option<PathBuf>,
}

impl RestoreRecord {
    pub fn new(kind: RecordKind, target: impl Into<String>, backup: Option<PathBuf>) -> Self {
        Self {
            kind,
            target: target.into(),
            backup,
        }
    }

    pub fn file(target: &Path, backup: Option<PathBuf>) -> Self {
        Self::new(RecordKind::File, target.to_string_lossy(), backup)
    }

    pub fn directory(target: &Path, backup: Option<PathBuf>) -> Self {
        Self::new(RecordKind::Directory, target.to_string_lossy(), backup)
    }

    pub fn user(name: &str) -> Self {
        Self::new(RecordKind::User, name, None)
    }

    #[inline]
    pub fn kind(&self) -> &RecordKind {
        &self.kind
    }

    /// Path for `File`/`Directory`, account name for `User`.
    #[inline]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[inline]
    pub fn target_path(&self) -> &Path {
        Path::new(&self.target)
    }

    #[inline]
    pub fn backup(&self) -> Option<&Path> {
        self.backup.as_deref()
    }
}

impl fmt::Display for RestoreRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.backup {
            Some(backup) => write!(f, "{} {} <- {}", self.kind, self.target, backup.display()),
            None => write!(f, "{} {}", self.kind, self.target),
        }
    }
}
