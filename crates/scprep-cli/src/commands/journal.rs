use super::{json_pretty, EXIT_SUCCESS};
use scprep_core::Engine;
use scprep_store::RestoreRecord;

fn format_record(index: usize, record: &RestoreRecord) -> String {
    let mut line = format!("{:>3}. {:<5} {}", index + 1, record.kind().as_str(), record.target());
    if let Some(backup) = record.backup() {
        line.push_str(&format!("  (backup: {})", backup.display()));
    }
    if !record.kind().is_known() {
        line.push_str("  [unknown kind]");
    }
    line
}

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let records = engine.records().map_err(|e| e.to_string())?;
    if json {
        let payload = serde_json::json!({
            "path": engine.journal().path(),
            "records": records,
        });
        println!("{}", json_pretty(&payload)?);
    } else if records.is_empty() {
        println!("journal is empty");
    } else {
        println!("{}:", engine.journal().path().display());
        for (i, record) in records.iter().enumerate() {
            println!("{}", format_record(i, record));
        }
    }
    Ok(EXIT_SUCCESS)
}
