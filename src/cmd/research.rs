//! One-shot research run (`research-tracker research <topic>`).

use anyhow::{Result, bail};
use tracing::{debug, info};

use research_tracker::config::Config;
use research_tracker::errors::TrackerError;
use research_tracker::projection::{HtmlMarkup, MarkupRenderer, TerminalMarkup, project};
use research_tracker::session::{ResearchSession, SessionUpdate};
use research_tracker::tracker::RunStatus;
use research_tracker::ui::{ResearchUI, UiMode};

/// Report markup for a UI mode: HTML for machine consumers, styled text otherwise.
pub(crate) fn renderer_for(mode: UiMode) -> &'static dyn MarkupRenderer {
    match mode {
        UiMode::Json => &HtmlMarkup,
        UiMode::Full | UiMode::Minimal => &TerminalMarkup,
    }
}

/// Project the current run and hand it to the UI.
pub(crate) fn redraw(ui: &mut ResearchUI, session: &ResearchSession) {
    let projection = project(session.tracker().run(), renderer_for(ui.mode()));
    ui.render(&projection);
}

/// Reflect one session update on screen.
pub(crate) fn show_update(ui: &mut ResearchUI, session: &ResearchSession, update: &SessionUpdate) {
    match update {
        SessionUpdate::Reconnected { attempts } => {
            ui.connection_notice(&format!("Connection restored after {} attempt(s)", attempts));
        }
        SessionUpdate::Disconnected => {
            ui.connection_notice("Server closed the connection");
        }
        SessionUpdate::Failed(e) => {
            debug!(error = %e, "Run failed after connection loss");
        }
        SessionUpdate::Applied(_) | SessionUpdate::ChannelRetired => {}
    }
    if update.changed() {
        redraw(ui, session);
    }
}

pub async fn cmd_research(config: &Config, topic: &str) -> Result<()> {
    let mut ui = ResearchUI::new(config.ui_mode, config.verbose);
    let mut session = ResearchSession::new(config.connection());
    info!(client = %session.client_id(), server = %config.server_url, "Starting research run");

    match session.submit(topic).await {
        Ok(_) => redraw(&mut ui, &session),
        Err(TrackerError::EmptyTopic) => bail!("Research topic must not be empty"),
        Err(e) => {
            redraw(&mut ui, &session);
            session.shutdown().await;
            return Err(e.into());
        }
    }

    while session.tracker().is_running() {
        tokio::select! {
            update = session.next_update() => {
                let Some(update) = update else {
                    break;
                };
                show_update(&mut ui, &session, &update);
            }
            _ = tokio::signal::ctrl_c() => {
                ui.error("Interrupted");
                session.shutdown().await;
                bail!("Research interrupted");
            }
        }
    }

    if config.show_reasoning {
        ui.show_reasoning(session.peek_reasoning());
    }
    session.shutdown().await;

    let run = session.tracker().run();
    match run.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Failed => bail!(
            "Research failed: {}",
            run.failure_reason.as_deref().unwrap_or("unknown error")
        ),
        RunStatus::Idle | RunStatus::Running => bail!("Research ended before the report was received"),
    }
}
