use super::run_step;
use scprep_core::{Engine, Provisioner};
use scprep_schema::{validate_user_name, Settings, UserEntry};
use std::path::Path;

/// Both flags describe an ad-hoc user; otherwise `[ipa_user]` is used.
fn resolve_user(
    settings: &Settings,
    username: Option<&str>,
    user_dir: Option<&Path>,
) -> Result<UserEntry, String> {
    match (username, user_dir) {
        (Some(name), Some(dir)) => {
            validate_user_name(name).map_err(|e| e.to_string())?;
            Ok(UserEntry::new(name, dir))
        }
        _ => settings
            .ipa_user()
            .cloned()
            .ok_or_else(|| "missing setting: ipa_user (or pass --username and --user-dir)".to_owned()),
    }
}

pub fn run(
    engine: &Engine,
    settings: &Settings,
    username: Option<&str>,
    user_dir: Option<&Path>,
    json: bool,
) -> Result<u8, String> {
    let user = resolve_user(settings, username, user_dir)?;
    let done = format!("user {} enrolled", user.name);
    run_step(engine, "adding IPA user...", &done, json, || {
        Provisioner::new(engine, settings).add_ipa_user(&user)
    })
}
