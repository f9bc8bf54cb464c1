use super::run_step;
use scprep_core::{Engine, Provisioner};
use scprep_schema::Settings;

pub fn run(engine: &Engine, settings: &Settings, ip: Option<&str>, json: bool) -> Result<u8, String> {
    run_step(
        engine,
        "installing IPA client...",
        "IPA client installed; add the IPA user with 'scprep add-ipa-user'",
        json,
        || Provisioner::new(engine, settings).install_ipa_client(ip),
    )
}
