use super::run_step;
use scprep_core::{Engine, Provisioner};
use scprep_schema::Settings;

pub fn run(engine: &Engine, settings: &Settings, json: bool) -> Result<u8, String> {
    run_step(engine, "setting up IPA server...", "IPA server set up", json, || {
        Provisioner::new(engine, settings).setup_ipa_server()
    })
}
