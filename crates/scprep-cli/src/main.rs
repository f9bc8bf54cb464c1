mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_SETTINGS_ERROR, EXIT_STORE_ERROR};
use scprep_core::{install_signal_handler, Engine, PrepareOptions};
use scprep_schema::{parse_settings_file, Settings, DEFAULT_SETTINGS_PATH};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::debug;

#[derive(Debug, Parser)]
#[command(
    name = "scprep",
    version,
    about = "Prepare a host for smart-card testing and restore it afterwards"
)]
struct Cli {
    /// Path to the settings file (default: $SCPREP_CONF, then /etc/scprep/scprep.toml).
    #[arg(short, long, global = true)]
    conf: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Prepare the test environment: directories, sssd, soft HSM and card services.
    Prepare {
        /// Also bootstrap virtual cards for local_user and ipa_user.
        #[arg(short = 'C', long, default_value_t = false)]
        cards: bool,
        /// Also enroll with the IPA server and add the IPA user.
        #[arg(short, long, default_value_t = false)]
        ipa: bool,
        /// IPA server address (overrides ipa.server_ip).
        #[arg(long)]
        ip: Option<String>,
        /// Also bootstrap the local CA.
        #[arg(long, default_value_t = false)]
        ca: bool,
    },
    /// Set up the local CA.
    SetupCa,
    /// Run the CA cleanup script for local_user.
    CleanupCa,
    /// Set up a virtual smart card. Run after the local CA is ready.
    SetupVirtCard {
        /// User from the settings file, or a new one described by the flags below.
        username: String,
        /// Private key for the card (requires --cert).
        #[arg(short, long)]
        key: Option<PathBuf>,
        /// Certificate for the card (requires --key).
        #[arg(short = 'C', long)]
        cert: Option<PathBuf>,
        /// Card directory.
        #[arg(short = 'd', long)]
        card_dir: Option<PathBuf>,
        /// Password for a local account.
        #[arg(short, long)]
        password: Option<String>,
        /// Create a local account mapped through sssd.
        #[arg(short, long, default_value_t = false)]
        local: bool,
    },
    /// Run the IPA server setup script.
    SetupIpaServer,
    /// Install and enroll the IPA client on this host.
    InstallIpaClient {
        /// IPA server address (overrides ipa.server_ip).
        #[arg(short, long)]
        ip: Option<String>,
    },
    /// Add a user to the IPA server and request a certificate for it.
    AddIpaUser {
        /// User name (defaults to ipa_user from the settings file).
        #[arg(short, long)]
        username: Option<String>,
        /// Directory for the user's key and certificate.
        #[arg(short = 'd', long)]
        user_dir: Option<PathBuf>,
    },
    /// Undo every journaled host change.
    Cleanup {
        /// Only report what would be done.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Leave the journal in place after the pass.
        #[arg(long, default_value_t = false)]
        keep_journal: bool,
    },
    /// List journaled restore records.
    Journal,
    /// Report required settings that are missing.
    CheckConfig,
    /// Run diagnostic checks on the host and the state directory.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

#[allow(clippy::too_many_lines)]
fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("SCPREP_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let json_output = cli.json;
    let result = match cli.command {
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
        command => load_settings(cli.conf.as_deref())
            .and_then(|settings| dispatch(command, &settings, json_output)),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("settings error:")
                || msg.starts_with("failed to parse settings")
                || msg.starts_with("invalid settings")
                || msg.starts_with("missing setting")
            {
                EXIT_SETTINGS_ERROR
            } else if msg.starts_with("store error:") || msg.starts_with("state lock:") {
                EXIT_STORE_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn dispatch(command: Commands, settings: &Settings, json: bool) -> Result<u8, String> {
    check_prereqs(&command, settings)?;
    let engine = || Engine::from_settings(settings).map_err(|e| e.to_string());

    match command {
        Commands::Prepare { cards, ipa, ip, ca } => commands::prepare::run(
            &engine()?,
            settings,
            &PrepareOptions { cards, ipa, ip, ca },
            json,
        ),
        Commands::SetupCa => commands::setup_ca::run(&engine()?, settings, json),
        Commands::CleanupCa => commands::cleanup_ca::run(&engine()?, settings, json),
        Commands::SetupVirtCard {
            username,
            key,
            cert,
            card_dir,
            password,
            local,
        } => commands::setup_virt_card::run(
            &engine()?,
            settings,
            &commands::setup_virt_card::CardArgs {
                username,
                key,
                cert,
                card_dir,
                password,
                local,
            },
            json,
        ),
        Commands::SetupIpaServer => commands::setup_ipa_server::run(&engine()?, settings, json),
        Commands::InstallIpaClient { ip } => {
            commands::install_ipa_client::run(&engine()?, settings, ip.as_deref(), json)
        }
        Commands::AddIpaUser { username, user_dir } => commands::add_ipa_user::run(
            &engine()?,
            settings,
            username.as_deref(),
            user_dir.as_deref(),
            json,
        ),
        Commands::Cleanup {
            dry_run,
            keep_journal,
        } => commands::cleanup::run(&engine()?, dry_run, keep_journal, json),
        Commands::Journal => commands::journal::run(&engine()?, json),
        Commands::CheckConfig => commands::check_config::run(settings, json),
        Commands::Doctor => commands::doctor::run(settings, json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    }
}

/// Provisioning commands need the host tools present. Cleanup is never
/// gated: a record whose reversal needs a missing tool fails on its own and
/// the rest of the journal is still reversed.
fn check_prereqs(command: &Commands, settings: &Settings) -> Result<(), String> {
    let needs_host = matches!(
        command,
        Commands::Prepare { .. }
            | Commands::SetupCa
            | Commands::CleanupCa
            | Commands::SetupVirtCard { .. }
            | Commands::SetupIpaServer
            | Commands::InstallIpaClient { .. }
            | Commands::AddIpaUser { .. }
    );
    if !needs_host
        || settings.host().backend != "system"
        || std::env::var("SCPREP_SKIP_PREREQS").as_deref() == Ok("1")
    {
        return Ok(());
    }
    let mut missing = scprep_runtime::check_system_prereqs();
    if matches!(
        command,
        Commands::AddIpaUser { .. } | Commands::Prepare { ipa: true, .. }
    ) {
        missing.extend(scprep_runtime::check_ipa_prereqs());
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(scprep_runtime::format_missing(&missing))
    }
}

/// `--conf`, then `$SCPREP_CONF`, then the default path. A missing default
/// file falls back to built-in defaults; an explicitly named one must exist.
fn load_settings(explicit: Option<&Path>) -> Result<Settings, String> {
    let from_env = std::env::var_os("SCPREP_CONF").map(PathBuf::from);
    let chosen = explicit.map(Path::to_path_buf).or(from_env);
    let path = match chosen {
        Some(p) => p,
        None => {
            let default = PathBuf::from(DEFAULT_SETTINGS_PATH);
            if !default.exists() {
                debug!("{DEFAULT_SETTINGS_PATH} not found; using built-in settings");
                return Ok(Settings::defaults());
            }
            default
        }
    };
    parse_settings_file(&path).map_err(|e| format!("settings error: {}: {e}", path.display()))
}
