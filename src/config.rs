use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use url::Url;

use crate::connection::ConnectionConfig;
use crate::tracker_config::{CONFIG_DIR, CONFIG_FILE, TrackerToml};
use crate::ui::UiMode;

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub server_url: Option<String>,
    pub ui_mode: Option<String>,
    pub max_attempts: Option<u32>,
    pub show_reasoning: bool,
    pub verbose: bool,
}

/// Runtime configuration for the tracker.
///
/// This struct bridges `tracker.toml` with the runtime needs of a session:
/// the parsed server url, the connection settings and the UI mode.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    /// File the settings were read from, if one existed.
    pub config_file: Option<PathBuf>,
    pub server_url: Url,
    pub ui_mode: UiMode,
    pub show_reasoning: bool,
    pub verbose: bool,
    /// The layered file + environment + CLI settings
    toml: TrackerToml,
}

impl Config {
    /// Load configuration for `project_dir` (file → environment → CLI).
    ///
    /// An explicit `config_file` must exist; the default
    /// `.research/tracker.toml` is optional.
    pub fn load(project_dir: &Path, config_file: Option<&Path>, cli: CliOverrides) -> Result<Self> {
        let default_path = Self::default_config_path(project_dir);
        let (mut toml, config_file) = match config_file {
            Some(path) => (TrackerToml::load(path)?, Some(path.to_path_buf())),
            None if default_path.exists() => (TrackerToml::load(&default_path)?, Some(default_path)),
            None => (TrackerToml::default(), None),
        };
        toml.apply_env(|key| std::env::var(key).ok());
        Self::from_toml(project_dir.to_path_buf(), config_file, toml, cli)
    }

    /// Apply CLI overrides to already layered settings.
    pub fn from_toml(
        project_dir: PathBuf,
        config_file: Option<PathBuf>,
        mut toml: TrackerToml,
        cli: CliOverrides,
    ) -> Result<Self> {
        if let Some(url) = cli.server_url {
            toml.server.url = url;
        }
        if let Some(mode) = cli.ui_mode {
            toml.ui.mode = mode;
        }
        if let Some(attempts) = cli.max_attempts {
            toml.reconnect.max_attempts = attempts;
        }
        if cli.show_reasoning {
            toml.ui.show_reasoning = true;
        }

        let server_url = ConnectionConfig::parse_url(&toml.server.url)
            .with_context(|| format!("Invalid server url in configuration: {}", toml.server.url))?;

        Ok(Self {
            project_dir,
            config_file,
            server_url,
            ui_mode: toml.ui_mode(),
            show_reasoning: toml.ui.show_reasoning,
            verbose: cli.verbose,
            toml,
        })
    }

    pub fn default_config_path(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Connection settings for a session.
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig {
            server_url: self.server_url.clone(),
            connect_timeout: self.toml.reconnect.connect_timeout(),
            backoff: self.toml.reconnect.backoff_policy(),
        }
    }

    /// The effective layered settings.
    pub fn settings(&self) -> &TrackerToml {
        &self.toml
    }

    /// Validate configuration and return warnings.
    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
