//! `agentloop config`: Print the effective configuration.

use agentloop_config::AppConfig;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    let mut shown = config.clone();
    if shown.provider.api_key.is_some() {
        shown.provider.api_key = Some("***".into());
    }
    print!("{}", shown.to_toml()?);
    Ok(())
}
