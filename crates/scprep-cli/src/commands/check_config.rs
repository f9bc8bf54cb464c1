use super::{json_pretty, EXIT_FAILURE, EXIT_SUCCESS};
use scprep_schema::Settings;

pub fn run(settings: &Settings, json: bool) -> Result<u8, String> {
    let missing = settings.check();
    let source = settings
        .source()
        .map_or_else(|| "built-in defaults".to_owned(), |p| p.display().to_string());

    if json {
        let payload = serde_json::json!({
            "source": source,
            "ok": missing.is_empty(),
            "missing": missing,
        });
        println!("{}", json_pretty(&payload)?);
    } else if missing.is_empty() {
        println!("{source}: all required settings are present");
    } else {
        println!("{source}: {} required setting(s) missing", missing.len());
        for field in &missing {
            println!("  - {field}");
        }
    }
    Ok(if missing.is_empty() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
