use scprep_core::{
    CleanupOptions, CoreError, Engine, HostPaths, PrepareOptions, Provisioner, RecordStatus,
    Resource, StateLock,
};
use scprep_runtime::{HostBackend, MockHost};
use scprep_schema::parse_settings_str;
use scprep_store::{RecordKind, RestoreRecord, StateLayout};
use std::fs;
use std::path::Path;

fn engine_in(root: &Path) -> Engine {
    Engine::new(
        StateLayout::new(root.join("state")),
        Box::new(MockHost::new(root.join("host"))),
    )
}

fn mock_in(root: &Path) -> MockHost {
    MockHost::new(root.join("host"))
}

fn mock_settings(root: &Path) -> String {
    let root = root.display();
    format!(
        r#"
root_password = "redhat"

[paths]
state_dir = "{root}/state"
ca_dir = "{root}/ca"
tmp_dir = "{root}/tmp"
scripts_dir = "{root}/scripts"

[host]
backend = "mock"

[ipa]
server_ip = "10.0.0.2"
server_root_password = "redhat"
admin_password = "SECret.123"

[local_user]
name = "alice"
card_dir = "{root}/cards/alice"
password = "654321"
local = true

[ipa_user]
name = "ipa-bob"
card_dir = "{root}/cards/ipa-bob"
"#
    )
}

fn snapshot(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        for entry in fs::read_dir(&d).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let rel = path.strip_prefix(dir).unwrap().display().to_string();
                out.push((rel, fs::read(&path).unwrap()));
            }
        }
    }
    out.sort();
    out
}

#[test]
fn existing_file_is_byte_identical_after_cleanup() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    let target = root.path().join("blob");
    let original: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    fs::write(&target, &original).unwrap();

    engine
        .with_protection(Resource::file(&target), |e, t| {
            e.write_file(t, "overwritten", None)
        })
        .unwrap();
    assert_ne!(fs::read(&target).unwrap(), original);

    assert!(engine.cleanup(CleanupOptions::default()).unwrap().is_success());
    assert_eq!(fs::read(&target).unwrap(), original);
}

#[test]
fn existing_directory_is_identical_after_cleanup() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    let target = root.path().join("ca");
    fs::create_dir_all(target.join("private")).unwrap();
    fs::write(target.join("serial"), "01\n").unwrap();
    fs::write(target.join("private/rootCA.key"), "KEY").unwrap();
    let before = snapshot(&target);

    engine
        .with_protection(Resource::directory(&target), |_, _| {
            fs::write(target.join("serial"), "02\n")?;
            fs::write(target.join("index.txt"), "V\t...")?;
            fs::remove_file(target.join("private/rootCA.key"))?;
            Ok(())
        })
        .unwrap();

    engine.cleanup(CleanupOptions::default()).unwrap();
    assert_eq!(snapshot(&target), before);
}

#[test]
fn new_targets_do_not_exist_after_cleanup() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    let file = root.path().join("virt_cacard_alice.service");
    let dir = root.path().join("card");

    engine
        .with_protection(Resource::file(&file), |e, t| e.write_file(t, "[Unit]\n", None))
        .unwrap();
    engine
        .with_protection(Resource::directory(&dir), |e, t| {
            e.create_dir(t)?;
            fs::write(dir.join("softhsm2.conf"), "x")?;
            Ok(())
        })
        .unwrap();

    assert!(engine.cleanup(CleanupOptions::default()).unwrap().is_success());
    assert!(!file.exists());
    assert!(!dir.exists());
}

#[test]
fn n_appends_load_back_in_order() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    let n = 40;
    for i in 0..n {
        engine
            .protect(Resource::file(root.path().join(format!("f{i}"))))
            .unwrap();
    }
    let records = engine.records().unwrap();
    assert_eq!(records.len(), n);
    for (i, r) in records.iter().enumerate() {
        assert!(r.target().ends_with(&format!("f{i}")));
    }
}

#[test]
fn second_cleanup_pass_is_clean_for_absent_targets() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    let file = root.path().join("new.conf");
    let dir = root.path().join("tokens");
    engine
        .with_protection(Resource::file(&file), |e, t| e.write_file(t, "x", None))
        .unwrap();
    engine
        .with_protection(Resource::directory(&dir), |e, t| e.create_dir(t))
        .unwrap();

    let keep = CleanupOptions { keep_journal: true };
    assert!(engine.cleanup(keep).unwrap().is_success());
    let second = engine.cleanup(keep).unwrap();
    assert!(second.is_success());
    assert!(second
        .outcomes
        .iter()
        .all(|o| o.status == RecordStatus::AlreadyAbsent));
}

#[test]
fn missing_user_does_not_block_later_records() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    let file = root.path().join("after-user");

    engine.journal().append(RestoreRecord::user("nobody-here")).unwrap();
    engine
        .with_protection(Resource::file(&file), |e, t| e.write_file(t, "x", None))
        .unwrap();

    let report = engine.cleanup(CleanupOptions::default()).unwrap();
    assert!(!report.is_success());
    assert_eq!(report.failed_count(), 1);
    assert!(!file.exists());
}

#[test]
fn scenario_file_restored_from_backup() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    let target = root.path().join("etc/svc/conf");
    let backup = root.path().join("backup/svc/conf.orig");
    fs::create_dir_all(target.parent().unwrap()).unwrap();
    fs::create_dir_all(backup.parent().unwrap()).unwrap();
    fs::write(&backup, "A=1\n").unwrap();
    fs::write(&target, "A=2\n").unwrap();

    engine
        .journal()
        .append(RestoreRecord::file(&target, Some(backup)))
        .unwrap();
    engine.cleanup(CleanupOptions::default()).unwrap();
    assert_eq!(fs::read_to_string(&target).unwrap(), "A=1\n");
}

#[test]
fn scenario_directory_without_backup_removed() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    let target = root.path().join("opt/card/tokens");
    fs::create_dir_all(target.join("slot0")).unwrap();
    fs::write(target.join("slot0/token.object"), "data").unwrap();

    engine
        .journal()
        .append(RestoreRecord::directory(&target, None))
        .unwrap();
    engine.cleanup(CleanupOptions::default()).unwrap();
    assert!(!target.exists());
}

#[test]
fn scenario_user_and_home_removed() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    let mock = mock_in(root.path());
    mock.create_user("alice").unwrap();
    assert!(mock.home_dir("alice").is_dir());

    engine.journal().append(RestoreRecord::user("alice")).unwrap();
    let report = engine.cleanup(CleanupOptions::default()).unwrap();
    assert!(report.is_success());
    assert!(!mock.user_exists("alice").unwrap());
    assert!(!mock.home_dir("alice").exists());
}

#[test]
fn corrupt_journal_blocks_mutation() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    fs::create_dir_all(engine.layout().root()).unwrap();
    fs::write(engine.journal().path(), "{ not json").unwrap();

    let target = root.path().join("conf");
    fs::write(&target, "A=1\n").unwrap();
    let mut ran = false;
    let err = engine
        .with_protection(Resource::file(&target), |_, _| {
            ran = true;
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, CoreError::Store(_)));
    assert!(!ran);
    assert_eq!(fs::read_to_string(&target).unwrap(), "A=1\n");
    assert!(engine.cleanup(CleanupOptions::default()).is_err());
}

#[test]
fn unknown_records_survive_cleanup() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    engine
        .journal()
        .append(RestoreRecord::new(
            RecordKind::Unknown("selinux-module".to_owned()),
            "virtcacard",
            None,
        ))
        .unwrap();

    let report = engine.cleanup(CleanupOptions::default()).unwrap();
    assert!(report.is_success());
    assert_eq!(report.skipped_count(), 1);
    let left = engine.records().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].kind().as_str(), "selinux-module");
}

#[test]
fn journal_survives_engine_restart() {
    let root = tempfile::tempdir().unwrap();
    let target = root.path().join("created");
    {
        let engine = engine_in(root.path());
        engine
            .with_protection(Resource::file(&target), |e, t| e.write_file(t, "x", None))
            .unwrap();
    }
    let engine = engine_in(root.path());
    engine.cleanup(CleanupOptions::default()).unwrap();
    assert!(!target.exists());
}

#[test]
fn prepare_then_cleanup_restores_host() {
    let root = tempfile::tempdir().unwrap();
    let settings = parse_settings_str(&mock_settings(root.path())).unwrap();
    let engine = Engine::from_settings(&settings).unwrap();
    let host_root = root.path().join("hostfs");
    let host_paths = HostPaths::under(&host_root);

    fs::create_dir_all(host_paths.sssd_conf.parent().unwrap()).unwrap();
    fs::write(&host_paths.sssd_conf, "[sssd]\ndomains = corp\n").unwrap();

    Provisioner::new(&engine, &settings)
        .with_host_paths(host_paths.clone())
        .prepare(&PrepareOptions {
            cards: true,
            ca: true,
            ..PrepareOptions::default()
        })
        .unwrap();

    let mock = MockHost::new(root.path().join("state/mock-host"));
    assert!(mock.user_exists("alice").unwrap());
    assert!(root.path().join("cards/alice/conf/softhsm2.conf").is_file());
    assert!(host_paths
        .systemd_dir
        .join("virt_cacard_alice.service")
        .is_file());

    let report = engine.cleanup(CleanupOptions::default()).unwrap();
    assert!(report.is_success(), "{:?}", report.failures().collect::<Vec<_>>());
    assert!(!mock.user_exists("alice").unwrap());
    assert!(!root.path().join("cards").exists());
    assert!(!root.path().join("ca").exists());
    assert!(!host_paths.systemd_dir.exists());
    assert_eq!(
        fs::read_to_string(&host_paths.sssd_conf).unwrap(),
        "[sssd]\ndomains = corp\n"
    );
}

#[test]
fn state_lock_is_exclusive() {
    let root = tempfile::tempdir().unwrap();
    let engine = engine_in(root.path());
    let lock_path = engine.layout().lock_file();
    let held = StateLock::acquire(&lock_path).unwrap();
    assert!(StateLock::try_acquire(&lock_path).unwrap().is_none());
    drop(held);
    assert!(StateLock::try_acquire(&lock_path).unwrap().is_some());
}
