use super::run_step;
use scprep_core::{Engine, Provisioner};
use scprep_schema::Settings;

pub fn run(engine: &Engine, settings: &Settings, json: bool) -> Result<u8, String> {
    run_step(engine, "setting up local CA...", "local CA ready", json, || {
        let p = Provisioner::new(engine, settings);
        p.general_setup()?;
        p.setup_ca()
    })
}
