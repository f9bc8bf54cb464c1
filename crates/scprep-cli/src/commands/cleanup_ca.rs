use super::run_step;
use scprep_core::{Engine, Provisioner};
use scprep_schema::Settings;

pub fn run(engine: &Engine, settings: &Settings, json: bool) -> Result<u8, String> {
    run_step(engine, "cleaning up local CA...", "local CA cleaned up", json, || {
        Provisioner::new(engine, settings).cleanup_ca()
    })
}
