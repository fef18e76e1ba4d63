//! Configuration view and validation commands (`research-tracker config`).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use research_tracker::config::{CliOverrides, Config};
use research_tracker::tracker_config::TrackerToml;

use super::super::ConfigCommands;

fn print_settings(toml: &TrackerToml) {
    println!("[server]");
    println!("  url = \"{}\"", toml.server.url);
    println!();
    println!("[reconnect]");
    println!("  delay_ms = {}", toml.reconnect.delay_ms);
    println!("  max_delay_ms = {}", toml.reconnect.max_delay_ms);
    println!("  max_attempts = {}", toml.reconnect.max_attempts);
    println!("  connect_timeout_ms = {}", toml.reconnect.connect_timeout_ms);
    println!();
    println!("[ui]");
    println!("  mode = \"{}\"", toml.ui.mode);
    println!("  show_reasoning = {}", toml.ui.show_reasoning);
    println!();
}

pub fn cmd_config(
    project_dir: &Path,
    config_file: Option<&Path>,
    cli: CliOverrides,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = config_file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| Config::default_config_path(project_dir));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Research Tracker Configuration");
            println!("==============================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No tracker.toml found at {}", config_path.display());
                println!("Run 'research-tracker config init' to create one.");
            }
            println!();

            let config = Config::load(project_dir, config_file, cli)?;
            println!("Effective values (with env/CLI overrides):");
            println!();
            print_settings(config.settings());

            let policy = config.connection().backoff;
            println!(
                "Reconnect schedule: {:?} doubling to {:?}, {} attempt(s)",
                policy.initial_delay, policy.max_delay, policy.max_attempts
            );
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let mut toml = if config_path.exists() {
                TrackerToml::load(&config_path)?
            } else if config_file.is_some() {
                anyhow::bail!("Config file not found: {}", config_path.display());
            } else {
                println!("No tracker.toml found. Checking defaults and environment.");
                TrackerToml::default()
            };
            toml.apply_env(|key| std::env::var(key).ok());
            let warnings = toml.validate();

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
        Some(ConfigCommands::Init { force }) => {
            if config_path.exists() && !force {
                println!("tracker.toml already exists at {}", config_path.display());
                println!("Use 'research-tracker config show' to view it, or pass --force to overwrite.");
                return Ok(());
            }

            let dir: PathBuf = config_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| project_dir.to_path_buf());
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;

            TrackerToml::default().save(&config_path)?;
            println!("Created {}", config_path.display());
        }
    }

    Ok(())
}
