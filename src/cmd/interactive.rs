//! Prompt-driven session (`research-tracker interactive`).
//!
//! Each line read from stdin is a new topic. Submitting while a run is in
//! progress abandons that run. `?` prints the latest reasoning and `quit`
//! leaves.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use research_tracker::config::Config;
use research_tracker::errors::TrackerError;
use research_tracker::session::ResearchSession;
use research_tracker::ui::ResearchUI;

use super::research::{redraw, show_update};

/// A line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Blank,
    Reasoning,
    Quit,
    Topic(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Blank,
        "?" => Input::Reasoning,
        "quit" | "exit" | ":q" => Input::Quit,
        topic => Input::Topic(topic),
    }
}

pub async fn cmd_interactive(config: &Config) -> Result<()> {
    let mut ui = ResearchUI::new(config.ui_mode, config.verbose);
    let mut session = ResearchSession::new(config.connection());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    ui.banner("Enter a research topic. '?' shows the latest reasoning, 'quit' exits.");
    if let Err(e) = session.connect().await {
        // Not fatal: the first submission retries with backoff.
        warn!(error = %e, "Initial connect failed");
        ui.connection_notice(&format!("{}; will retry on submit", e));
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    break;
                };
                match parse_input(&line) {
                    Input::Blank => {}
                    Input::Quit => break,
                    Input::Reasoning => ui.show_reasoning(session.peek_reasoning()),
                    Input::Topic(topic) => {
                        info!(%topic, "Topic submitted");
                        match session.submit(topic).await {
                            Ok(_) => redraw(&mut ui, &session),
                            Err(TrackerError::EmptyTopic) => {}
                            Err(e) => {
                                redraw(&mut ui, &session);
                                ui.error(&e.to_string());
                            }
                        }
                    }
                }
            }
            update = session.next_update() => {
                let Some(update) = update else {
                    break;
                };
                show_update(&mut ui, &session, &update);
                if update.changed() && session.tracker().run().status.is_terminal() && config.show_reasoning {
                    ui.show_reasoning(session.peek_reasoning());
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    Ok(())
}
