use crate::users::{validate_user_name, UserEntry};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/scprep/scprep.toml";

/// Dotted paths a complete provisioning run (local CA, IPA client, both card
/// users) reads from the settings document.
pub const REQUIRED_FIELDS: &[&str] = &[
    "root_password",
    "paths.ca_dir",
    "ipa.server_root_password",
    "ipa.server_ip",
    "ipa.server_hostname",
    "ipa.client_hostname",
    "ipa.domain",
    "ipa.realm",
    "ipa.admin_password",
    "local_user",
    "ipa_user",
];

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PathsSection {
    /// Home of the restore journal and the state lock.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Backup root. Defaults to `<state_dir>/backup`.
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default = "default_ca_dir")]
    pub ca_dir: PathBuf,
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    #[serde(default = "default_sssd_conf")]
    pub sssd_conf: PathBuf,
    /// Where virtual card service units are installed.
    #[serde(default = "default_systemd_dir")]
    pub systemd_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            backup_dir: None,
            ca_dir: default_ca_dir(),
            tmp_dir: default_tmp_dir(),
            scripts_dir: default_scripts_dir(),
            sssd_conf: default_sssd_conf(),
            systemd_dir: default_systemd_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct HostSection {
    #[serde(default = "default_host_backend")]
    pub backend: String,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            backend: default_host_backend(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IpaSection {
    #[serde(default)]
    pub server_ip: Option<String>,
    #[serde(default)]
    pub server_hostname: Option<String>,
    #[serde(default)]
    pub client_hostname: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub realm: Option<String>,
    #[serde(default)]
    pub admin_password: Option<String>,
    #[serde(default)]
    pub server_root_password: Option<String>,
}

/// Typed view of the settings document. Unknown top-level keys are kept in
/// the raw table and stay reachable through [`Settings::lookup`].
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
struct SettingsDoc {
    #[serde(default)]
    root_password: Option<String>,
    #[serde(default)]
    paths: PathsSection,
    #[serde(default)]
    host: HostSection,
    #[serde(default)]
    ipa: IpaSection,
    #[serde(default)]
    local_user: Option<UserEntry>,
    #[serde(default)]
    ipa_user: Option<UserEntry>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    doc: SettingsDoc,
    raw: toml::Table,
    source: Option<PathBuf>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/scprep")
}

fn default_ca_dir() -> PathBuf {
    PathBuf::from("/etc/scprep/ca")
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("/tmp/scprep")
}

fn default_scripts_dir() -> PathBuf {
    PathBuf::from("/usr/share/scprep/scripts")
}

fn default_sssd_conf() -> PathBuf {
    PathBuf::from("/etc/sssd/sssd.conf")
}

fn default_systemd_dir() -> PathBuf {
    PathBuf::from("/etc/systemd/system")
}

fn default_host_backend() -> String {
    "system".to_owned()
}

pub fn parse_settings_str(input: &str) -> Result<Settings, SettingsError> {
    let raw: toml::Table = toml::from_str(input)?;
    let doc: SettingsDoc = toml::from_str(input)?;
    for user in [&doc.local_user, &doc.ipa_user].into_iter().flatten() {
        validate_user_name(&user.name)?;
    }
    Ok(Settings {
        doc,
        raw,
        source: None,
    })
}

pub fn parse_settings_file(path: impl AsRef<Path>) -> Result<Settings, SettingsError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    let mut settings = parse_settings_str(&content)?;
    settings.source = Some(path.to_path_buf());
    Ok(settings)
}

impl Settings {
    /// Settings with every default applied and nothing else.
    pub fn defaults() -> Self {
        Self {
            doc: SettingsDoc::default(),
            raw: toml::Table::new(),
            source: None,
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn paths(&self) -> &PathsSection {
        &self.doc.paths
    }

    pub fn host(&self) -> &HostSection {
        &self.doc.host
    }

    pub fn ipa(&self) -> &IpaSection {
        &self.doc.ipa
    }

    pub fn root_password(&self) -> Option<&str> {
        self.doc.root_password.as_deref()
    }

    pub fn local_user(&self) -> Option<&UserEntry> {
        self.doc.local_user.as_ref()
    }

    pub fn ipa_user(&self) -> Option<&UserEntry> {
        self.doc.ipa_user.as_ref()
    }

    /// Declared card users, local user first.
    pub fn users(&self) -> Vec<&UserEntry> {
        [self.local_user(), self.ipa_user()]
            .into_iter()
            .flatten()
            .collect()
    }

    pub fn user(&self, name: &str) -> Option<&UserEntry> {
        self.users().into_iter().find(|u| u.name == name)
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.doc
            .paths
            .backup_dir
            .clone()
            .unwrap_or_else(|| self.doc.paths.state_dir.join("backup"))
    }

    /// Look up a value by dotted path (`"ipa.server_ip"`) in the raw
    /// document. Only keys present in the file are visible; defaults are not.
    pub fn lookup(&self, dotted: &str) -> Option<&toml::Value> {
        let mut parts = dotted.split('.');
        let first = parts.next()?;
        let mut value = self.raw.get(first)?;
        for part in parts {
            match value.get(part) {
                Some(next) => value = next,
                None => {
                    debug!("key '{part}' of '{dotted}' not present in settings");
                    return None;
                }
            }
        }
        Some(value)
    }

    pub fn lookup_str(&self, dotted: &str) -> Option<&str> {
        self.lookup(dotted).and_then(toml::Value::as_str)
    }

    /// Required fields missing from the document, in declaration order.
    pub fn check(&self) -> Vec<&'static str> {
        REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| self.lookup(field).is_none())
            .collect()
    }
}
