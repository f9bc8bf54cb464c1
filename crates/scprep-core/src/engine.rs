use crate::protect::{ProtectToken, Resource};
use crate::restore::{self, CleanupReport};
use crate::CoreError;
use scprep_runtime::{select_host, CommandSpec, HostBackend};
use scprep_schema::Settings;
use scprep_store::{BackupStore, Journal, RestoreRecord, StateLayout};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use tracing::{debug, info};

/// Host mutation engine.
///
/// Owns the restore journal, the backup store and the host backend. Every
/// change to a host resource goes through [`Engine::protect`] first, which
/// snapshots the resource and durably journals how to reverse the change
/// before any mutation is allowed. [`Engine::cleanup`] replays the journal.
pub struct Engine {
    layout: StateLayout,
    journal: Journal,
    backups: BackupStore,
    host: Box<dyn HostBackend>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupOptions {
    /// Leave the journal untouched after the pass.
    pub keep_journal: bool,
}

impl Engine {
    pub fn new(layout: StateLayout, host: Box<dyn HostBackend>) -> Self {
        let journal = Journal::new(&layout);
        let backups = BackupStore::new(&layout);
        Self {
            layout,
            journal,
            backups,
            host,
        }
    }

    /// Build an engine from the `[paths]` and `[host]` settings tables.
    pub fn from_settings(settings: &Settings) -> Result<Self, CoreError> {
        let layout = StateLayout::new(&settings.paths().state_dir)
            .with_backup_root(settings.backup_dir());
        let host = select_host(&settings.host().backend, layout.root())?;
        debug!(
            "engine: state {} backups {} host {}",
            layout.root().display(),
            layout.backup_root().display(),
            host.name()
        );
        Ok(Self::new(layout, host))
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn host(&self) -> &dyn HostBackend {
        self.host.as_ref()
    }

    pub fn records(&self) -> Result<Vec<RestoreRecord>, CoreError> {
        Ok(self.journal.load_all()?)
    }

    /// Back up `resource` and durably journal its restore record.
    ///
    /// The returned token is the only way to call the mutating helpers on
    /// this engine. If either the backup or the append fails, no token is
    /// issued and the caller must not mutate the resource.
    pub fn protect(&self, resource: Resource) -> Result<ProtectToken, CoreError> {
        let record = match &resource {
            Resource::File(path) | Resource::Directory(path) => {
                let backup = self.backups.backup(&resource.kind(), path)?;
                let target = path.to_string_lossy().into_owned();
                Some(RestoreRecord::new(resource.kind(), target, backup))
            }
            Resource::User(name) => {
                if self.host.user_exists(name)? {
                    info!("user {name} already exists; it will be left in place on cleanup");
                    None
                } else {
                    Some(RestoreRecord::user(name))
                }
            }
        };

        if let Some(record) = &record {
            self.journal.append(record.clone())?;
        }
        debug!("protected {resource}");
        Ok(ProtectToken::new(resource, record))
    }

    /// Run `mutate` behind the protect protocol. `mutate` is only called once
    /// the restore record is on disk.
    pub fn with_protection<T, F>(&self, resource: Resource, mutate: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Self, &ProtectToken) -> Result<T, CoreError>,
    {
        let token = self.protect(resource)?;
        mutate(self, &token)
    }

    /// Replace the contents of the file behind `token`. `mode`, when given,
    /// is applied to the file after writing.
    pub fn write_file(
        &self,
        token: &ProtectToken,
        contents: &str,
        mode: Option<u32>,
    ) -> Result<(), CoreError> {
        let Resource::File(path) = token.resource() else {
            return Err(mismatch(token, "file write"));
        };
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        if let Some(mode) = mode {
            options.mode(mode);
        }
        let mut file = options.open(path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        if let Some(mode) = mode {
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }
        debug!("wrote {} ({} bytes)", path.display(), contents.len());
        Ok(())
    }

    /// Read-modify-write the file behind `token`. `edit` receives the current
    /// contents, or `None` if the file does not exist yet.
    pub fn edit_file<F>(&self, token: &ProtectToken, edit: F) -> Result<(), CoreError>
    where
        F: FnOnce(Option<String>) -> String,
    {
        let Resource::File(path) = token.resource() else {
            return Err(mismatch(token, "file edit"));
        };
        let current = match fs::read_to_string(path) {
            Ok(c) => Some(c),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let mode = fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o7777);
        self.write_file(token, &edit(current), mode)
    }

    /// Create the directory behind `token`, along with any missing parents.
    pub fn create_dir(&self, token: &ProtectToken) -> Result<(), CoreError> {
        let Resource::Directory(path) = token.resource() else {
            return Err(mismatch(token, "directory creation"));
        };
        fs::create_dir_all(path)?;
        debug!("created directory {}", path.display());
        Ok(())
    }

    /// Create the account behind `token` and set its password. An account
    /// that already existed when it was protected is left untouched.
    pub fn create_user(&self, token: &ProtectToken, password: Option<&str>) -> Result<(), CoreError> {
        let Resource::User(name) = token.resource() else {
            return Err(mismatch(token, "user creation"));
        };
        if !token.is_journaled() {
            debug!("user {name} pre-existed; not modifying it");
            return Ok(());
        }
        self.host.create_user(name)?;
        if let Some(password) = password {
            self.host.set_password(name, password)?;
        }
        info!("created user {name}");
        Ok(())
    }

    /// Run an external command on the host.
    pub fn run(&self, command: &CommandSpec) -> Result<String, CoreError> {
        debug!("running {command}");
        Ok(self.host.run(command)?)
    }

    /// What a cleanup pass would do, record by record, in execution order.
    pub fn cleanup_plan(&self) -> Result<Vec<(RestoreRecord, String)>, CoreError> {
        Ok(self
            .journal
            .load_all()?
            .into_iter()
            .rev()
            .map(|r| {
                let action = restore::describe(&r);
                (r, action)
            })
            .collect())
    }

    /// Reverse every journaled mutation.
    ///
    /// Records that failed or were skipped stay in the journal so a later run
    /// retries them; once nothing is left the journal is archived. A corrupt
    /// or unreadable journal is an error and nothing is attempted.
    pub fn cleanup(&self, options: CleanupOptions) -> Result<CleanupReport, CoreError> {
        let records = self.journal.load_all()?;
        if records.is_empty() {
            info!("journal is empty; nothing to clean up");
            return Ok(CleanupReport::default());
        }

        let report = restore::cleanup(&records, self.host.as_ref());

        if options.keep_journal {
            debug!("keeping journal {}", self.journal.path().display());
            return Ok(report);
        }
        let remaining = report.remaining_records();
        if remaining.is_empty() {
            self.journal.archive()?;
        } else {
            info!("{} record(s) kept in the journal for a later run", remaining.len());
            self.journal.replace(remaining)?;
        }
        Ok(report)
    }
}

fn mismatch(token: &ProtectToken, requested: &str) -> CoreError {
    CoreError::TokenMismatch {
        token: token.resource().to_string(),
        requested: requested.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordStatus;
    use scprep_runtime::MockHost;
    use scprep_store::RecordKind;

    fn setup() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StateLayout::new(dir.path().join("state"));
        let host = MockHost::new(dir.path().join("host"));
        let engine = Engine::new(layout, Box::new(host));
        (dir, engine)
    }

    #[test]
    fn protect_existing_file_records_backup() {
        let (dir, engine) = setup();
        let target = dir.path().join("svc.conf");
        fs::write(&target, "A=1\n").unwrap();

        let token = engine.protect(Resource::file(&target)).unwrap();
        let backup = token.backup().unwrap().to_path_buf();
        assert_eq!(fs::read_to_string(&backup).unwrap(), "A=1\n");

        let records = engine.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), &RecordKind::File);
        assert_eq!(records[0].backup(), Some(backup.as_path()));
    }

    #[test]
    fn protect_missing_file_records_no_backup() {
        let (dir, engine) = setup();
        let token = engine.protect(Resource::file(dir.path().join("new"))).unwrap();
        assert!(token.is_journaled());
        assert!(token.backup().is_none());
    }

    #[test]
    fn failed_backup_appends_nothing() {
        let (dir, engine) = setup();
        let target = dir.path().join("actually-a-dir");
        fs::create_dir(&target).unwrap();

        let mut mutated = false;
        let result = engine.with_protection(Resource::file(&target), |_, _| {
            mutated = true;
            Ok(())
        });
        assert!(matches!(result, Err(CoreError::Store(_))));
        assert!(!mutated);
        assert!(engine.records().unwrap().is_empty());
    }

    #[test]
    fn preexisting_user_is_not_journaled() {
        let (_dir, engine) = setup();
        engine.host().create_user("bob").unwrap();

        let token = engine.protect(Resource::user("bob")).unwrap();
        assert!(!token.is_journaled());
        engine.create_user(&token, Some("pw")).unwrap();
        assert!(engine.records().unwrap().is_empty());
    }

    #[test]
    fn new_user_is_journaled_and_created() {
        let (_dir, engine) = setup();
        let token = engine.protect(Resource::user("alice")).unwrap();
        engine.create_user(&token, Some("654321")).unwrap();
        assert!(engine.host().user_exists("alice").unwrap());
        assert_eq!(engine.records().unwrap(), vec![RestoreRecord::user("alice")]);
    }

    #[test]
    fn token_kind_must_match_helper() {
        let (dir, engine) = setup();
        let token = engine.protect(Resource::directory(dir.path().join("d"))).unwrap();
        let err = engine.write_file(&token, "x", None).unwrap_err();
        assert!(matches!(err, CoreError::TokenMismatch { .. }));
        assert!(engine.create_user(&token, None).is_err());
    }

    #[test]
    fn write_file_applies_mode() {
        let (dir, engine) = setup();
        let target = dir.path().join("sssd.conf");
        let token = engine.protect(Resource::file(&target)).unwrap();
        engine.write_file(&token, "[sssd]\n", Some(0o600)).unwrap();
        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn edit_file_sees_current_contents() {
        let (dir, engine) = setup();
        let target = dir.path().join("conf");
        fs::write(&target, "A=1\n").unwrap();
        let token = engine.protect(Resource::file(&target)).unwrap();
        engine
            .edit_file(&token, |cur| format!("{}B=2\n", cur.unwrap_or_default()))
            .unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "A=1\nB=2\n");
    }

    #[test]
    fn cleanup_restores_and_archives() {
        let (dir, engine) = setup();
        let target = dir.path().join("conf");
        fs::write(&target, "A=1\n").unwrap();
        engine
            .with_protection(Resource::file(&target), |e, t| e.write_file(t, "A=2\n", None))
            .unwrap();

        let report = engine.cleanup(CleanupOptions::default()).unwrap();
        assert!(report.is_success());
        assert_eq!(fs::read_to_string(&target).unwrap(), "A=1\n");
        assert!(!engine.journal().path().exists());
        assert!(engine.layout().archive_dir().is_dir());
    }

    #[test]
    fn cleanup_keeps_failed_records() {
        let (dir, engine) = setup();
        let created = dir.path().join("created");
        engine.journal().append(RestoreRecord::user("ghost")).unwrap();
        engine
            .with_protection(Resource::file(&created), |e, t| e.write_file(t, "x", None))
            .unwrap();

        let report = engine.cleanup(CleanupOptions::default()).unwrap();
        assert_eq!(report.failed_count(), 1);
        assert!(!created.exists());
        assert_eq!(engine.records().unwrap(), vec![RestoreRecord::user("ghost")]);
    }

    #[test]
    fn keep_journal_leaves_records() {
        let (dir, engine) = setup();
        let created = dir.path().join("created");
        engine
            .with_protection(Resource::file(&created), |e, t| e.write_file(t, "x", None))
            .unwrap();

        engine
            .cleanup(CleanupOptions { keep_journal: true })
            .unwrap();
        assert_eq!(engine.records().unwrap().len(), 1);

        let again = engine
            .cleanup(CleanupOptions { keep_journal: true })
            .unwrap();
        assert_eq!(again.outcomes[0].status, RecordStatus::AlreadyAbsent);
    }

    #[test]
    fn cleanup_plan_does_not_mutate() {
        let (dir, engine) = setup();
        let created = dir.path().join("created");
        engine
            .with_protection(Resource::file(&created), |e, t| e.write_file(t, "x", None))
            .unwrap();
        let plan = engine.cleanup_plan().unwrap();
        assert_eq!(plan.len(), 1);
        assert!(plan[0].1.starts_with("delete file"));
        assert!(created.exists());
    }

    #[test]
    fn cleanup_on_missing_journal_succeeds() {
        let (_dir, engine) = setup();
        let report = engine.cleanup(CleanupOptions::default()).unwrap();
        assert!(report.is_success());
        assert!(report.outcomes.is_empty());
    }
}
