use crate::SettingsError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A card holder declared in the settings document (`[local_user]` or
/// `[ipa_user]`), or assembled from command-line flags.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct UserEntry {
    pub name: String,
    pub card_dir: PathBuf,
    #[serde(default)]
    pub password: Option<String>,
    /// Local accounts are created on this host and mapped through
    /// `sssd.conf`; directory users live on the IPA server.
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub cert: Option<PathBuf>,
    #[serde(default)]
    pub key: Option<PathBuf>,
}

impl UserEntry {
    pub fn new(name: &str, card_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_owned(),
            card_dir: card_dir.into(),
            password: None,
            local: false,
            cert: None,
            key: None,
        }
    }

    #[inline]
    pub fn conf_dir(&self) -> PathBuf {
        self.card_dir.join("conf")
    }

    /// Both halves of a pre-issued key pair. `None` means the local CA has
    /// to issue a fresh one.
    pub fn key_pair(&self) -> Option<(&Path, &Path)> {
        match (&self.cert, &self.key) {
            (Some(cert), Some(key)) => Some((cert.as_path(), key.as_path())),
            _ => None,
        }
    }
}

/// Account names end up as arguments to `useradd`/`userdel`, so keep them to
/// the portable POSIX subset.
pub fn validate_user_name(name: &str) -> Result<(), SettingsError> {
    if name.is_empty() || name.len() > 32 {
        return Err(SettingsError::Invalid(format!(
            "user name '{name}' must be 1-32 characters"
        )));
    }
    let mut bytes = name.bytes();
    let first_ok = bytes
        .next()
        .is_some_and(|b| b.is_ascii_lowercase() || b == b'_');
    if !first_ok
        || !bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
    {
        return Err(SettingsError::Invalid(format!(
            "user name '{name}' must match [a-z_][a-z0-9_-]*"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_names() {
        for name in ["alice", "local-user", "_svc", "ipa_user2"] {
            assert!(validate_user_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_bad_names() {
        for name in ["", "Alice", "1user", "a b", "x;rm", &"a".repeat(33)] {
            assert!(validate_user_name(name).is_err(), "{name} should be invalid");
        }
    }

    #[test]
    fn key_pair_requires_both_halves() {
        let mut user = UserEntry::new("alice", "/root/alice");
        assert!(user.key_pair().is_none());
        user.cert = Some(PathBuf::from("/root/alice/cert.pem"));
        assert!(user.key_pair().is_none());
        user.key = Some(PathBuf::from("/root/alice/private.key"));
        let (cert, key) = user.key_pair().unwrap();
        assert_eq!(cert, Path::new("/root/alice/cert.pem"));
        assert_eq!(key, Path::new("/root/alice/private.key"));
    }

    #[test]
    fn conf_dir_is_under_card_dir() {
        let user = UserEntry::new("alice", "/root/alice");
        assert_eq!(user.conf_dir(), PathBuf::from("/root/alice/conf"));
    }
}
