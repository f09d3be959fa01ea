//! Configuration view and validation commands for `taskboard config`.

use anyhow::{Result, bail};
use std::path::Path;

use taskboard::config::{BoardConfig, DEFAULT_CONFIG_FILE};

use super::super::ConfigCommands;

pub fn cmd_config(explicit: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let mut config = BoardConfig::load_or_default(explicit)?;
            config.apply_env_overrides()?;
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let mut config = BoardConfig::load_or_default(explicit)?;
            config.apply_env_overrides()?;
            config.validate()?;
            println!("Configuration is valid.");
        }
        Some(ConfigCommands::Init { force }) => {
            let path = explicit.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
            if path.exists() && !force {
                bail!(
                    "{} already exists. Use --force to overwrite.",
                    path.display()
                );
            }
            BoardConfig::default().save(path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}
