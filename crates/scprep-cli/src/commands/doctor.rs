use super::{EXIT_FAILURE, EXIT_SUCCESS};
use scprep_core::{Engine, ScriptSet, StateLock};
use scprep_schema::Settings;

pub fn run(settings: &Settings, json_output: bool) -> Result<u8, String> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_settings(settings, &mut checks);

    match Engine::from_settings(settings) {
        Ok(engine) => {
            checks.push(Check::pass(
                "host_backend",
                &format!("Host backend '{}' available", engine.host().name()),
            ));
            if engine.host().name() == "system" {
                check_privileges(&mut checks);
                check_prereqs(&mut checks, &mut all_pass);
            }
            check_state(&engine, &mut checks, &mut all_pass);
        }
        Err(e) => {
            all_pass = false;
            checks.push(Check::fail("host_backend", &e.to_string()));
        }
    }

    check_scripts(settings, &mut checks);

    print_results(&checks, all_pass, json_output)
}

fn check_settings(settings: &Settings, checks: &mut Vec<Check>) {
    let missing = settings.check();
    if missing.is_empty() {
        checks.push(Check::pass("settings", "All required settings present"));
    } else {
        checks.push(Check::warn(
            "settings",
            &format!("Missing settings: {}", missing.join(", ")),
        ));
    }
}

fn check_privileges(checks: &mut Vec<Check>) {
    if scprep_runtime::is_root() {
        checks.push(Check::pass("privileges", "Running as root"));
    } else {
        checks.push(Check::warn(
            "privileges",
            "Not running as root; provisioning and cleanup need root",
        ));
    }
}

fn check_prereqs(checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = scprep_runtime::check_system_prereqs();
    if missing.is_empty() {
        checks.push(Check::pass("host_prereqs", "Host tools present"));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "host_prereqs",
            &scprep_runtime::format_missing(&missing),
        ));
    }
    if scprep_runtime::check_ipa_prereqs().is_empty() {
        checks.push(Check::pass("ipa_prereqs", "IPA client tools present"));
    } else {
        checks.push(Check::info(
            "ipa_prereqs",
            "IPA client tools not installed (only needed for IPA enrollment)",
        ));
    }
}

fn check_state(engine: &Engine, checks: &mut Vec<Check>, all_pass: &mut bool) {
    // Journal
    match engine.records() {
        Ok(records) if records.is_empty() => {
            checks.push(Check::pass("journal", "Journal is empty (host is clean)"));
        }
        Ok(records) => {
            let unknown = records.iter().filter(|r| !r.kind().is_known()).count();
            let mut msg = format!(
                "Journal holds {} restore record(s); run 'scprep cleanup' to restore the host",
                records.len()
            );
            if unknown > 0 {
                msg.push_str(&format!(" ({unknown} of an unknown kind)"));
            }
            checks.push(Check::info("journal", &msg));
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail("journal", &format!("Journal unreadable: {e}")));
        }
    }

    // Backups
    let backup_root = engine.layout().backup_root();
    if backup_root.is_dir() {
        checks.push(Check::pass(
            "backup_root",
            &format!("Backup root {} exists", backup_root.display()),
        ));
    } else {
        checks.push(Check::info(
            "backup_root",
            &format!(
                "Backup root {} will be created on first use",
                backup_root.display()
            ),
        ));
    }

    // Lock
    match StateLock::for_layout(engine.layout()) {
        Ok(Some(_)) => checks.push(Check::pass("state_lock", "State lock is free")),
        Ok(None) => {
            let msg = match StateLock::holder(&engine.layout().lock_file()) {
                Some(pid) => format!("State lock is held by pid {pid}"),
                None => "State lock is held by another process".to_owned(),
            };
            checks.push(Check::warn("state_lock", &msg));
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "state_lock",
                &format!("Cannot check state lock: {e}"),
            ));
        }
    }
}

fn check_scripts(settings: &Settings, checks: &mut Vec<Check>) {
    let missing = ScriptSet::new(&settings.paths().scripts_dir).missing();
    if missing.is_empty() {
        checks.push(Check::pass("scripts", "Provisioning scripts present"));
    } else {
        let names: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
        checks.push(Check::warn(
            "scripts",
            &format!("Missing scripts: {}", names.join(", ")),
        ));
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, String> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).map_err(|e| e.to_string())?
        );
    } else {
        println!("scprep doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
