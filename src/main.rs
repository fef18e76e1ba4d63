use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use research_tracker::config::{CliOverrides, Config};
use research_tracker::logging::{self, LogOptions};

mod cmd;

#[derive(Parser)]
#[command(name = "research-tracker")]
#[command(version, about = "Follow a multi-stage research pipeline as it runs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to tracker.toml. Defaults to .research/tracker.toml in the project dir
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Research server WebSocket url (e.g. ws://127.0.0.1:8000). Overrides tracker.toml
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Output mode: full, minimal or json
    #[arg(long, global = true)]
    pub ui: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Research a topic and follow the pipeline until the report arrives
    Research {
        /// Topic to research
        topic: String,

        /// Print the latest reasoning when the run finishes
        #[arg(long)]
        reasoning: bool,

        /// Reconnect attempts before the run is marked failed
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Read topics from stdin, one run per line
    Interactive {
        /// Print the latest reasoning whenever a run finishes
        #[arg(long)]
        reasoning: bool,

        /// Reconnect attempts before a run is marked failed
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Serve a scripted pipeline transcript over WebSocket
    Replay {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to serve on (0 picks a free port)
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// JSON Lines transcript; the built-in two-cycle run when omitted
        #[arg(short, long)]
        transcript: Option<PathBuf>,

        /// Delay between frames that do not set their own
        #[arg(long, default_value = "250")]
        delay_ms: u64,

        /// Drop each client once after this many frames
        #[arg(long)]
        disconnect_after: Option<usize>,
    },
    /// List the known pipeline stages
    Stages {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate tracker.toml and report warnings
    Validate,
    /// Create a default tracker.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

impl Cli {
    fn overrides(&self, show_reasoning: bool, max_attempts: Option<u32>) -> CliOverrides {
        CliOverrides {
            server_url: self.server.clone(),
            ui_mode: self.ui.clone(),
            max_attempts,
            show_reasoning,
            verbose: self.verbose,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _log_guard = logging::init(&LogOptions {
        verbose: cli.verbose,
        json: cli.log_json,
        file: cli.log_file.clone(),
    })?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Research {
            topic,
            reasoning,
            max_attempts,
        } => {
            let config = Config::load(
                &project_dir,
                cli.config.as_deref(),
                cli.overrides(*reasoning, *max_attempts),
            )?;
            cmd::cmd_research(&config, topic).await?;
        }
        Commands::Interactive {
            reasoning,
            max_attempts,
        } => {
            let config = Config::load(
                &project_dir,
                cli.config.as_deref(),
                cli.overrides(*reasoning, *max_attempts),
            )?;
            cmd::cmd_interactive(&config).await?;
        }
        Commands::Replay {
            host,
            port,
            transcript,
            delay_ms,
            disconnect_after,
        } => {
            cmd::cmd_replay(cmd::replay::ReplayArgs {
                host,
                port: *port,
                transcript: transcript.as_deref(),
                delay_ms: *delay_ms,
                disconnect_after: *disconnect_after,
            })
            .await?;
        }
        Commands::Stages { json } => cmd::cmd_stages(*json)?,
        Commands::Config { command } => cmd::cmd_config(
            &project_dir,
            cli.config.as_deref(),
            cli.overrides(false, None),
            command.clone(),
        )?,
    }

    Ok(())
}
