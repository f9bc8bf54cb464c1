use super::run_step;
use scprep_core::{Engine, PrepareOptions, Provisioner};
use scprep_schema::Settings;

pub fn run(
    engine: &Engine,
    settings: &Settings,
    options: &PrepareOptions,
    json: bool,
) -> Result<u8, String> {
    run_step(engine, "preparing host...", "host prepared", json, || {
        Provisioner::new(engine, settings).prepare(options)
    })
}
