use super::run_step;
use scprep_core::{Engine, Provisioner};
use scprep_schema::{validate_user_name, Settings, UserEntry};
use std::path::PathBuf;
use tracing::debug;

pub struct CardArgs {
    pub username: String,
    pub key: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub card_dir: Option<PathBuf>,
    pub password: Option<String>,
    pub local: bool,
}

/// A user named in the settings file wins; otherwise the flags describe one.
fn resolve_user(settings: &Settings, args: &CardArgs) -> Result<UserEntry, String> {
    if let Some(user) = settings.user(&args.username) {
        return Ok(user.clone());
    }
    debug!(
        "user {} is not in the settings file; using command-line values",
        args.username
    );
    validate_user_name(&args.username).map_err(|e| e.to_string())?;
    let card_dir = args.card_dir.clone().ok_or_else(|| {
        format!(
            "user '{}' is not in the settings file and --card-dir was not given",
            args.username
        )
    })?;
    let mut user = UserEntry::new(&args.username, card_dir);
    user.key.clone_from(&args.key);
    user.cert.clone_from(&args.cert);
    user.password.clone_from(&args.password);
    user.local = args.local;
    Ok(user)
}

pub fn run(engine: &Engine, settings: &Settings, args: &CardArgs, json: bool) -> Result<u8, String> {
    let user = resolve_user(settings, args)?;
    let done = format!("virtual card ready for {}", user.name);
    run_step(engine, "setting up virtual card...", &done, json, || {
        let p = Provisioner::new(engine, settings);
        p.general_setup()?;
        p.prepare_dirs()?;
        p.create_card(&user)?;
        p.setup_virt_card(&user)
    })
}
