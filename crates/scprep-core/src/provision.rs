//! Provisioning steps for a smart-card test host.
//!
//! Every step that changes a file, directory or account on the host goes
//! through [`Engine::with_protection`], so `scprep cleanup` can undo it.
//! External scripts are opaque: their own side effects are not journaled.

use crate::concurrency::shutdown_requested;
use crate::engine::Engine;
use crate::ini::IniDocument;
use crate::protect::Resource;
use crate::render;
use crate::CoreError;
use scprep_runtime::{CommandSpec, RuntimeError};
use scprep_schema::{Settings, UserEntry};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The bundled provisioning scripts, run with `bash`.
#[derive(Debug, Clone)]
pub struct ScriptSet {
    dir: PathBuf,
}

impl ScriptSet {
    pub const GENERAL_SETUP: &'static str = "general-setup.sh";
    pub const SETUP_CA: &'static str = "setup-ca.sh";
    pub const CLEANUP_CA: &'static str = "cleanup-ca.sh";
    pub const SETUP_VIRT_CARD: &'static str = "setup-virt-card.sh";
    pub const INSTALL_IPA_CLIENT: &'static str = "install-ipa-client.sh";
    pub const SETUP_IPA_SERVER: &'static str = "setup-ipa-server.sh";

    pub const ALL: [&'static str; 6] = [
        Self::GENERAL_SETUP,
        Self::SETUP_CA,
        Self::CLEANUP_CA,
        Self::SETUP_VIRT_CARD,
        Self::INSTALL_IPA_CLIENT,
        Self::SETUP_IPA_SERVER,
    ];

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, script: &str) -> PathBuf {
        self.dir.join(script)
    }

    pub fn command(&self, script: &str) -> CommandSpec {
        CommandSpec::new("bash").path_arg(&self.path(script))
    }

    /// Scripts that are not present in the scripts directory.
    pub fn missing(&self) -> Vec<PathBuf> {
        Self::ALL
            .iter()
            .map(|s| self.path(s))
            .filter(|p| !p.is_file())
            .collect()
    }
}

/// System locations the provisioner writes to, from `[paths]`.
#[derive(Debug, Clone)]
pub struct HostPaths {
    pub sssd_conf: PathBuf,
    pub systemd_dir: PathBuf,
}

impl HostPaths {
    pub fn from_settings(settings: &Settings) -> Self {
        let paths = settings.paths();
        Self {
            sssd_conf: paths.sssd_conf.clone(),
            systemd_dir: paths.systemd_dir.clone(),
        }
    }

    /// Both locations under `root`, mirroring the real layout.
    pub fn under(root: &Path) -> Self {
        Self {
            sssd_conf: root.join("etc/sssd/sssd.conf"),
            systemd_dir: root.join("etc/systemd/system"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PrepareOptions {
    /// Bootstrap virtual cards for every configured user.
    pub cards: bool,
    /// Enroll this host with the IPA server and add the IPA user.
    pub ipa: bool,
    /// IPA server address, overriding `ipa.server_ip`.
    pub ip: Option<String>,
    /// Bootstrap the local CA.
    pub ca: bool,
}

pub struct Provisioner<'a> {
    engine: &'a Engine,
    settings: &'a Settings,
    host_paths: HostPaths,
    scripts: ScriptSet,
}

impl<'a> Provisioner<'a> {
    pub fn new(engine: &'a Engine, settings: &'a Settings) -> Self {
        Self {
            engine,
            settings,
            host_paths: HostPaths::from_settings(settings),
            scripts: ScriptSet::new(&settings.paths().scripts_dir),
        }
    }

    #[must_use]
    pub fn with_host_paths(mut self, host_paths: HostPaths) -> Self {
        self.host_paths = host_paths;
        self
    }

    pub fn host_paths(&self) -> &HostPaths {
        &self.host_paths
    }

    pub fn scripts(&self) -> &ScriptSet {
        &self.scripts
    }

    fn checkpoint(step: &str) -> Result<(), CoreError> {
        if shutdown_requested() {
            return Err(CoreError::Interrupted(step.to_owned()));
        }
        Ok(())
    }

    /// Create `path` and any missing parents. The topmost directory that did
    /// not exist is journaled, so cleanup removes the whole new subtree.
    pub fn ensure_dir(&self, path: &Path) -> Result<(), CoreError> {
        if path.is_dir() {
            return Ok(());
        }
        let top = path
            .ancestors()
            .take_while(|a| !a.as_os_str().is_empty() && !a.exists())
            .last()
            .unwrap_or(path)
            .to_path_buf();
        self.engine
            .with_protection(Resource::directory(&top), |e, t| e.create_dir(t))?;
        // Everything below `top` is covered by its record.
        fs::create_dir_all(path)?;
        debug!("directory {} is ready", path.display());
        Ok(())
    }

    /// CA, temp and CA config directories.
    pub fn prepare_dirs(&self) -> Result<(), CoreError> {
        let paths = self.settings.paths();
        self.ensure_dir(&paths.ca_dir)?;
        self.ensure_dir(&paths.ca_dir.join("conf"))?;
        self.ensure_dir(&paths.tmp_dir)?;
        Ok(())
    }

    fn ensure_parent(&self, path: &Path) -> Result<(), CoreError> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => self.ensure_dir(parent),
            _ => Ok(()),
        }
    }

    fn write_protected(&self, path: &Path, contents: &str, mode: Option<u32>) -> Result<(), CoreError> {
        self.ensure_parent(path)?;
        self.engine
            .with_protection(Resource::file(path), |e, t| e.write_file(t, contents, mode))?;
        debug!("wrote {}", path.display());
        Ok(())
    }

    /// Replace `sssd.conf` with the certificate-auth baseline.
    pub fn write_sssd_config(&self) -> Result<(), CoreError> {
        let contents = render::sssd_conf().to_string();
        self.write_protected(&self.host_paths.sssd_conf, &contents, Some(0o600))?;
        info!("sssd configuration written to {}", self.host_paths.sssd_conf.display());
        Ok(())
    }

    pub fn add_certmap_rule(&self, user: &str) -> Result<(), CoreError> {
        let path = &self.host_paths.sssd_conf;
        self.ensure_parent(path)?;
        self.engine.with_protection(Resource::file(path), |e, t| {
            e.edit_file(t, |current| {
                let mut doc = current.as_deref().map(IniDocument::parse).unwrap_or_default();
                render::add_certmap_rule(&mut doc, user);
                doc.to_string()
            })
        })?;
        debug!("certificate match rule for {user} added to {}", path.display());
        Ok(())
    }

    pub fn write_softhsm2_config(&self, user: &UserEntry) -> Result<(), CoreError> {
        let path = user.conf_dir().join("softhsm2.conf");
        self.write_protected(&path, &render::softhsm2_conf(&user.card_dir), None)
    }

    pub fn write_virt_card_service(&self, user: &UserEntry) -> Result<(), CoreError> {
        let path = render::virt_card_service_path(&self.host_paths.systemd_dir, &user.name);
        self.write_protected(&path, &render::virt_card_service(&user.name, &user.card_dir), None)?;
        debug!("service unit for {} written to {}", user.name, path.display());
        Ok(())
    }

    pub fn write_ca_cnf(&self) -> Result<(), CoreError> {
        let ca_dir = &self.settings.paths().ca_dir;
        self.write_protected(&ca_dir.join("conf").join("ca.cnf"), &render::ca_cnf(ca_dir), None)
    }

    pub fn write_user_cnf(&self, user: &UserEntry) -> Result<(), CoreError> {
        let ipa = self.settings.ipa();
        let realm = ipa.realm.as_deref().unwrap_or("EXAMPLE.COM");
        let domain = ipa.domain.as_deref().unwrap_or("example.com");
        let path = user.conf_dir().join(format!("req_{}.cnf", user.name));
        self.write_protected(&path, &render::user_req_cnf(&user.name, realm, domain), None)
    }

    /// Create the local account for `user` unless it already exists.
    pub fn ensure_local_user(&self, user: &UserEntry) -> Result<(), CoreError> {
        self.engine.with_protection(Resource::user(&user.name), |e, t| {
            e.create_user(t, user.password.as_deref())
        })
    }

    /// Install the virtual card SELinux module if it is not loaded yet.
    pub fn check_semodule(&self) -> Result<(), CoreError> {
        let loaded = self.engine.run(&CommandSpec::new("semodule").arg("-l"))?;
        if loaded.lines().any(|l| l.trim_start().starts_with("virtcacard")) {
            debug!("SELinux module virtcacard already installed");
            return Ok(());
        }
        let cil = self.settings.paths().ca_dir.join("conf").join("virtcacard.cil");
        self.write_protected(&cil, render::VIRTCACARD_CIL, None)?;
        self.engine
            .run(&CommandSpec::new("semodule").arg("-i").path_arg(&cil))?;
        self.engine
            .run(&CommandSpec::new("systemctl").args(["restart", "pcscd"]))?;
        info!("SELinux module virtcacard installed");
        Ok(())
    }

    pub fn general_setup(&self) -> Result<(), CoreError> {
        self.check_semodule()?;
        self.engine
            .run(&self.scripts.command(ScriptSet::GENERAL_SETUP))?;
        Ok(())
    }

    pub fn setup_ca(&self) -> Result<(), CoreError> {
        self.prepare_dirs()?;
        self.write_ca_cnf()?;
        let ca_dir = &self.settings.paths().ca_dir;
        self.engine.run(
            &self
                .scripts
                .command(ScriptSet::SETUP_CA)
                .arg("--dir")
                .path_arg(ca_dir),
        )?;
        info!("local CA ready in {}", ca_dir.display());
        Ok(())
    }

    /// Run the CA cleanup script for the local user. It undoes what
    /// `setup-ca.sh` did outside of the journal.
    pub fn cleanup_ca(&self) -> Result<(), CoreError> {
        let user = self
            .settings
            .local_user()
            .ok_or_else(|| CoreError::MissingSetting("local_user".to_owned()))?;
        self.engine.run(
            &self
                .scripts
                .command(ScriptSet::CLEANUP_CA)
                .arg("--username")
                .arg(user.name.as_str()),
        )?;
        info!("local CA material for {} cleaned up", user.name);
        Ok(())
    }

    /// Card directory, soft HSM config and service unit for `user`.
    pub fn create_card(&self, user: &UserEntry) -> Result<(), CoreError> {
        self.ensure_dir(&user.conf_dir())?;
        self.write_softhsm2_config(user)?;
        self.write_virt_card_service(user)?;
        Ok(())
    }

    /// Bootstrap the virtual card. Local users also get an account, a CSR
    /// config and an sssd match rule.
    pub fn setup_virt_card(&self, user: &UserEntry) -> Result<(), CoreError> {
        if user.local {
            self.ensure_local_user(user)?;
            self.write_user_cnf(user)?;
            self.add_certmap_rule(&user.name)?;
        }

        let mut cmd = self
            .scripts
            .command(ScriptSet::SETUP_VIRT_CARD)
            .arg("--dir")
            .path_arg(&user.card_dir)
            .arg("--username")
            .arg(user.name.as_str());
        if let Some((cert, key)) = user.key_pair() {
            cmd = cmd.arg("--cert").path_arg(cert).arg("--key").path_arg(key);
        } else {
            let ca_dir = &self.settings.paths().ca_dir;
            debug!(
                "no key pair for {}; the local CA in {} issues one",
                user.name,
                ca_dir.display()
            );
            cmd = cmd.arg("--ca").path_arg(ca_dir);
        }
        self.engine.run(&cmd)?;
        info!("virtual card for {} is set up in {}", user.name, user.card_dir.display());
        Ok(())
    }

    pub fn install_ipa_client(&self, ip: Option<&str>) -> Result<(), CoreError> {
        let ipa = self.settings.ipa();
        let ip = ip
            .or(ipa.server_ip.as_deref())
            .ok_or_else(|| CoreError::MissingSetting("ipa.server_ip".to_owned()))?;
        let root = ipa
            .server_root_password
            .as_deref()
            .ok_or_else(|| CoreError::MissingSetting("ipa.server_root_password".to_owned()))?;
        self.engine.run(
            &self
                .scripts
                .command(ScriptSet::INSTALL_IPA_CLIENT)
                .args(["--ip", ip, "--root", root]),
        )?;
        info!("IPA client configured against {ip}");
        Ok(())
    }

    pub fn setup_ipa_server(&self) -> Result<(), CoreError> {
        self.engine
            .run(&self.scripts.command(ScriptSet::SETUP_IPA_SERVER))?;
        Ok(())
    }

    /// Register `user` on the IPA server and have it issue a certificate for
    /// a freshly generated key.
    pub fn add_ipa_user(&self, user: &UserEntry) -> Result<(), CoreError> {
        let admin = self
            .settings
            .ipa()
            .admin_password
            .as_deref()
            .ok_or_else(|| CoreError::MissingSetting("ipa.admin_password".to_owned()))?;
        let name = user.name.as_str();

        self.engine
            .run(&CommandSpec::new("kinit").arg("admin").stdin(admin))?;
        let add = CommandSpec::new("ipa")
            .args(["user-add", name, "--first", name, "--last", name]);
        match self.engine.run(&add) {
            Ok(_) => info!("user {name} added to IPA"),
            Err(CoreError::Runtime(RuntimeError::CommandFailed { stderr, .. }))
                if stderr.contains("already exists") =>
            {
                warn!("user {name} already exists on the IPA server");
            }
            Err(e) => return Err(e),
        }

        self.ensure_dir(&user.conf_dir())?;
        let key = user.card_dir.join("private.key");
        let csr = user.card_dir.join("cert.csr");
        let cert = user.card_dir.join("cert.pem");

        self.engine.with_protection(Resource::file(&key), |e, _| {
            e.run(
                &CommandSpec::new("openssl")
                    .args(["genrsa", "-out"])
                    .path_arg(&key)
                    .arg("2048"),
            )
        })?;
        self.engine.with_protection(Resource::file(&csr), |e, _| {
            e.run(
                &CommandSpec::new("openssl")
                    .args(["req", "-new", "-days", "365", "-nodes", "-key"])
                    .path_arg(&key)
                    .arg("-out")
                    .path_arg(&csr)
                    .arg("-subj")
                    .arg(format!("/CN={name}")),
            )
        })?;
        self.engine.with_protection(Resource::file(&cert), |e, _| {
            e.run(
                &CommandSpec::new("ipa")
                    .arg("cert-request")
                    .path_arg(&csr)
                    .args(["--principal", name, "--certificate-out"])
                    .path_arg(&cert),
            )
        })?;
        info!("certificate for {name} stored in {}", user.card_dir.display());
        Ok(())
    }

    /// Full host preparation: directories, per-user card configuration,
    /// general setup, then the optional IPA, CA and card bootstrap.
    pub fn prepare(&self, options: &PrepareOptions) -> Result<(), CoreError> {
        Self::checkpoint("directory setup")?;
        self.prepare_dirs()?;

        let users = self.settings.users();
        if users.iter().any(|u| u.local) {
            Self::checkpoint("sssd configuration")?;
            self.write_sssd_config()?;
        }
        for user in &users {
            Self::checkpoint(&format!("card configuration for {}", user.name))?;
            self.create_card(user)?;
        }

        Self::checkpoint("general setup")?;
        self.general_setup()?;

        if options.ipa {
            Self::checkpoint("IPA client installation")?;
            self.install_ipa_client(options.ip.as_deref())?;
            let ipa_user = self
                .settings
                .ipa_user()
                .ok_or_else(|| CoreError::MissingSetting("ipa_user".to_owned()))?;
            Self::checkpoint("IPA user enrollment")?;
            self.add_ipa_user(ipa_user)?;
        }

        if options.ca {
            Self::checkpoint("local CA setup")?;
            self.setup_ca()?;
        }

        if options.cards {
            for user in &users {
                Self::checkpoint(&format!("virtual card setup for {}", user.name))?;
                self.setup_virt_card(user)?;
            }
        }
        info!("host prepared");
        Ok(())
    }
}
