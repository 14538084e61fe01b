//! `opshound config` — Show the resolved configuration.

use opshound_config::AppConfig;

pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("config file: {}", AppConfig::config_dir().join("config.toml").display());
    println!("{config:#?}");
    Ok(())
}
