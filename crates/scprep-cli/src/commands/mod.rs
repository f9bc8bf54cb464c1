pub mod add_ipa_user;
pub mod check_config;
pub mod cleanup;
pub mod cleanup_ca;
pub mod completions;
pub mod doctor;
pub mod install_ipa_client;
pub mod journal;
pub mod man_pages;
pub mod prepare;
pub mod setup_ca;
pub mod setup_ipa_server;
pub mod setup_virt_card;

use indicatif::{ProgressBar, ProgressStyle};
use scprep_core::{CoreError, Engine, StateLock};
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_SETTINGS_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "restored" | "removed" | "user_deleted" => {
            Style::new().green().apply_to(status).to_string()
        }
        "already_absent" => Style::new().dim().apply_to(status).to_string(),
        "skipped" => Style::new().yellow().apply_to(status).to_string(),
        "failed" => Style::new().red().bold().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

/// Hold the state lock for the rest of a mutating command. A concurrent run
/// is reported instead of waited for.
pub fn lock_state(engine: &Engine) -> Result<StateLock, String> {
    match StateLock::for_layout(engine.layout()) {
        Ok(Some(lock)) => Ok(lock),
        Ok(None) => {
            let path = engine.layout().lock_file();
            let holder = StateLock::holder(&path)
                .map_or_else(String::new, |pid| format!(" (pid {pid})"));
            Err(format!(
                "state lock: another scprep run{holder} holds {}",
                path.display()
            ))
        }
        Err(e) => Err(format!("state lock: {e}")),
    }
}

/// Run one provisioning step under the state lock with a spinner, then
/// report how many restore records the journal holds.
pub fn run_step<F>(engine: &Engine, label: &str, done: &str, json: bool, step: F) -> Result<u8, String>
where
    F: FnOnce() -> Result<(), CoreError>,
{
    let _lock = lock_state(engine)?;
    let before = engine.records().map_err(|e| e.to_string())?.len();

    let pb = if json { None } else { Some(spinner(label)) };
    let outcome = step();
    // Count what was journaled even when the step failed part-way.
    let after = engine.records().map_err(|e| e.to_string())?.len();

    match outcome {
        Ok(()) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, done);
            }
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, &format!("{label} failed"));
            }
            if after > before && !json {
                eprintln!("{} change(s) journaled; run 'scprep cleanup' to undo them", after - before);
            }
            return Err(e.to_string());
        }
    }

    if json {
        let payload = serde_json::json!({
            "status": "ok",
            "step": done,
            "journaled": after - before,
            "journal_records": after,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{} restore record(s) added, {after} in the journal", after - before);
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scprep_runtime::MockHost;
    use scprep_store::StateLayout;

    fn engine_in(dir: &std::path::Path) -> Engine {
        Engine::new(
            StateLayout::new(dir.join("state")),
            Box::new(MockHost::new(dir.join("host"))),
        )
    }

    #[test]
    fn json_pretty_serializes_string() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
        assert!(result.contains("\"value\""));
    }

    #[test]
    fn colorize_status_keeps_text() {
        for s in ["restored", "removed", "already_absent", "user_deleted", "skipped", "failed"] {
            assert!(colorize_status(s).contains(s));
        }
        assert_eq!(colorize_status("other"), "other");
    }

    #[test]
    fn exit_codes_are_distinct() {
        assert_ne!(EXIT_SUCCESS, EXIT_FAILURE);
        assert_ne!(EXIT_FAILURE, EXIT_SETTINGS_ERROR);
        assert_ne!(EXIT_SETTINGS_ERROR, EXIT_STORE_ERROR);
    }

    #[test]
    fn second_lock_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());
        let _held = lock_state(&engine).unwrap();
        let err = lock_state(&engine).unwrap_err();
        assert!(err.starts_with("state lock:"));
        assert!(err.contains(&format!("pid {}", std::process::id())));
    }

    #[test]
    fn failed_step_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());
        let err = run_step(&engine, "testing", "tested", true, || {
            Err(CoreError::MissingSetting("ipa.server_ip".to_owned()))
        })
        .unwrap_err();
        assert_eq!(err, "missing setting: ipa.server_ip");
    }

    #[test]
    fn spinner_creates_progress_bar() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
    }
}
