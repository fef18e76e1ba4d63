//! Scripted pipeline server (`research-tracker replay`).

use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use research_tracker::replay::{ReplayOptions, ReplayServer, Transcript};

/// Settings for the `replay` command.
#[derive(Debug, Clone)]
pub struct ReplayArgs<'a> {
    pub host: &'a str,
    pub port: u16,
    pub transcript: Option<&'a Path>,
    pub delay_ms: u64,
    pub disconnect_after: Option<usize>,
}

fn bind_addr(host: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = host
        .parse()
        .with_context(|| format!("Invalid bind address: {}", host))?;
    Ok(SocketAddr::new(ip, port))
}

pub async fn cmd_replay(args: ReplayArgs<'_>) -> Result<()> {
    let transcript = match args.transcript {
        Some(path) => Transcript::load(path)?,
        None => Transcript::builtin()?,
    };
    let options = ReplayOptions {
        bind: bind_addr(args.host, args.port)?,
        default_delay: Duration::from_millis(args.delay_ms),
        disconnect_after: args.disconnect_after,
    };

    let frames = transcript.len();
    let mut server = ReplayServer::new(transcript, options);
    let url = server.start().await?;

    println!();
    println!("Replay server listening on {}", url);
    println!("  frames per run: {}", frames);
    if let Some(n) = args.disconnect_after {
        println!("  drops each client once after {} frame(s)", n);
    }
    println!();
    println!("Point the tracker at it with: research-tracker --server {} research <topic>", url);
    println!("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Stopping replay server");
    server.stop();
    Ok(())
}
