//! Init and Config commands.

use anyhow::{Context, Result, anyhow};

use crate::config::Settings;

/// Create `.workspace-watch/settings.toml` in the current directory.
pub fn run_init(force: bool) -> Result<()> {
    let root = std::env::current_dir().context("Cannot determine current directory")?;
    let path = Settings::init_config_file(&root, force).map_err(|e| anyhow!("{e}"))?;

    if force {
        println!("Wrote configuration file at: {}", path.display());
    } else {
        println!("Created configuration file at: {}", path.display());
    }
    println!("Edit this file to customize your settings.");
    Ok(())
}

/// Print the effective configuration as TOML.
pub fn run_config(settings: &Settings) -> Result<()> {
    let toml_str = toml::to_string_pretty(settings).context("Cannot render configuration")?;
    println!("{toml_str}");
    Ok(())
}
