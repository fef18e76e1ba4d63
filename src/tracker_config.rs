//! File configuration for the research tracker.
//!
//! Read from `.research/tracker.toml` (or an explicit `--config` path), then
//! overlaid with environment variables and finally CLI flags.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! url = "ws://127.0.0.1:8000"
//!
//! [reconnect]
//! delay_ms = 1000
//! max_delay_ms = 8000
//! max_attempts = 5
//! connect_timeout_ms = 10000
//!
//! [ui]
//! mode = "full"
//! show_reasoning = false
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::connection::{BackoffPolicy, MIN_RECONNECT_DELAY};
use crate::ui::UiMode;

/// Directory holding the tracker configuration.
pub const CONFIG_DIR: &str = ".research";
/// Configuration file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "tracker.toml";

pub const ENV_SERVER_URL: &str = "RESEARCH_SERVER_URL";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "RESEARCH_MAX_RECONNECT_ATTEMPTS";
pub const ENV_UI_MODE: &str = "RESEARCH_UI_MODE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    /// Base WebSocket url of the research server
    #[serde(default = "default_server_url")]
    pub url: String,
}

fn default_server_url() -> String {
    "ws://127.0.0.1:8000".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            url: default_server_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSection {
    /// Delay before the first reconnect attempt
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Upper bound for the doubling delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Attempts before the run is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Timeout for a single connect attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    8000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            delay_ms: default_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ReconnectSection {
    /// Backoff policy with the delay floor and minimum attempt count applied.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiSection {
    /// Output mode: full, minimal or json
    #[serde(default = "default_ui_mode")]
    pub mode: String,
    /// Print the latest reasoning when a run finishes
    #[serde(default)]
    pub show_reasoning: bool,
}

fn default_ui_mode() -> String {
    "full".to_string()
}

impl Default for UiSection {
    fn default() -> Self {
        Self {
            mode: default_ui_mode(),
            show_reasoning: false,
        }
    }
}

/// Contents of `tracker.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub ui: UiSection,
}

impl TrackerToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse tracker.toml")
    }

    /// Load `tracker.toml` from `config_dir`, or defaults if it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize tracker.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Overlay values from the environment. `lookup` is normally
    /// `std::env::var(..).ok()`; unparsable numbers are left as they were.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_SERVER_URL).filter(|v| !v.trim().is_empty()) {
            self.server.url = url.trim().to_string();
        }
        if let Some(attempts) = lookup(ENV_MAX_RECONNECT_ATTEMPTS).and_then(|v| v.trim().parse().ok()) {
            self.reconnect.max_attempts = attempts;
        }
        if let Some(mode) = lookup(ENV_UI_MODE).filter(|v| !v.trim().is_empty()) {
            self.ui.mode = mode.trim().to_string();
        }
    }

    pub fn ui_mode(&self) -> UiMode {
        UiMode::parse(&self.ui.mode)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Err(e) = url::Url::parse(&self.server.url) {
            warnings.push(format!("Invalid server url '{}': {}", self.server.url, e));
        } else if !(self.server.url.starts_with("ws://") || self.server.url.starts_with("wss://")) {
            warnings.push(format!(
                "Server url '{}' should use the ws:// or wss:// scheme",
                self.server.url
            ));
        }

        let floor = MIN_RECONNECT_DELAY.as_millis() as u64;
        if self.reconnect.delay_ms < floor {
            warnings.push(format!(
                "reconnect.delay_ms = {} is below the {} ms floor and will be raised",
                self.reconnect.delay_ms, floor
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.delay_ms {
            warnings.push(format!(
                "reconnect.max_delay_ms = {} is below delay_ms = {}",
                self.reconnect.max_delay_ms, self.reconnect.delay_ms
            ));
        }
        if self.reconnect.max_attempts == 0 {
            warnings.push("reconnect.max_attempts = 0; at least one attempt is always made".to_string());
        }
        if self.reconnect.connect_timeout_ms == 0 {
            warnings.push("reconnect.connect_timeout_ms must be greater than 0".to_string());
        }

        if !UiMode::is_known(&self.ui.mode) {
            warnings.push(format!(
                "Invalid ui.mode '{}': expected full, minimal or json (falling back to full)",
                self.ui.mode
            ));
        }

        warnings
    }
}
