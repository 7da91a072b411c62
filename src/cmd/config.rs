//! Configuration view and validation commands — `refinery config`.

use anyhow::{Context, Result, bail};
use refinery::config::{Config, DEFAULT_CONFIG_FILE};
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(config: &Config, explicit: Option<&Path>, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = explicit.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("# Config file: {}", config_path.display());
            } else {
                println!("# No {} found, showing defaults", config_path.display());
            }
            println!("# Effective values (with env overrides):");
            println!();
            print!("{}", config.to_toml()?);
            println!();
            println!(
                "# ${} is {}",
                config.generator.api_key_env,
                if config.generator_api_key().is_some() { "set" } else { "not set" }
            );
            println!(
                "# ${} is {}",
                config.enrichment.search_api_key_env,
                if config.search_api_key().is_some() { "set" } else { "not set" }
            );
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            config.ensure_valid()?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                bail!("{} already exists", config_path.display());
            }
            let content = Config::default().to_toml()?;
            std::fs::write(config_path, content)
                .with_context(|| format!("Failed to write {}", config_path.display()))?;
            println!("Created {}", config_path.display());
        }
    }
    Ok(())
}
