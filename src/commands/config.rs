// src/commands/config.rs

//! The `config` command

use anyhow::Result;
use modweave::Config;
use std::path::Path;

/// Print the effective configuration as TOML
pub fn cmd_config(config: &Config, path: &Path) -> Result<()> {
    if path.exists() {
        println!("# Loaded from {}", path.display());
    } else {
        println!("# {} not found, showing defaults", path.display());
    }
    print!("{}", config.to_toml_string()?);
    Ok(())
}
