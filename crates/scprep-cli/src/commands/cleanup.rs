use super::{colorize_status, json_pretty, lock_state, spin_fail, spin_ok, spinner, EXIT_FAILURE, EXIT_SUCCESS};
use scprep_core::{CleanupOptions, Engine, RecordStatus};

pub fn run(engine: &Engine, dry_run: bool, keep_journal: bool, json: bool) -> Result<u8, String> {
    let _lock = lock_state(engine)?;

    if dry_run {
        return print_plan(engine, json);
    }

    let pb = if json {
        None
    } else {
        Some(spinner("restoring host..."))
    };
    let report = match engine.cleanup(CleanupOptions { keep_journal }) {
        Ok(r) => r,
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, "cleanup aborted");
            }
            return Err(e.to_string());
        }
    };
    if let Some(ref pb) = pb {
        if report.is_success() {
            spin_ok(pb, "host restored");
        } else {
            spin_fail(pb, "cleanup finished with failures");
        }
    }

    if json {
        let payload = serde_json::json!({
            "dry_run": false,
            "success": report.is_success(),
            "failed": report.failed_count(),
            "skipped": report.skipped_count(),
            "outcomes": report.outcomes,
        });
        println!("{}", json_pretty(&payload)?);
    } else if report.outcomes.is_empty() {
        println!("journal is empty; nothing to restore");
    } else {
        for outcome in &report.outcomes {
            let detail = match &outcome.status {
                RecordStatus::Failed(reason) | RecordStatus::Skipped(reason) => {
                    format!(": {reason}")
                }
                _ => String::new(),
            };
            println!(
                "  {:<16} {}{detail}",
                colorize_status(outcome.status.label()),
                outcome.record
            );
        }
        println!(
            "\n{} record(s) processed, {} failed, {} skipped",
            report.outcomes.len(),
            report.failed_count(),
            report.skipped_count()
        );
        if !report.is_success() {
            println!("failed records are kept in the journal; rerun 'scprep cleanup' to retry them");
        }
    }

    Ok(if report.is_success() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}

fn print_plan(engine: &Engine, json: bool) -> Result<u8, String> {
    let plan = engine.cleanup_plan().map_err(|e| e.to_string())?;
    if json {
        let steps: Vec<_> = plan
            .iter()
            .map(|(record, action)| serde_json::json!({ "record": record, "action": action }))
            .collect();
        let payload = serde_json::json!({ "dry_run": true, "plan": steps });
        println!("{}", json_pretty(&payload)?);
    } else if plan.is_empty() {
        println!("journal is empty; nothing to restore");
    } else {
        println!("cleanup would, in order:");
        for (i, (_, action)) in plan.iter().enumerate() {
            println!("  {:>3}. {action}", i + 1);
        }
    }
    Ok(EXIT_SUCCESS)
}
