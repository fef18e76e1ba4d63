use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::protocol::StagePayload;

/// Monotonic tag distinguishing the current run from abandoned ones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Lifecycle of a research run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Active,
    Complete,
}

/// One occurrence of a stage within a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageInstance {
    pub stage_id: String,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<StagePayload>,
    /// How many times the stage has been (re)activated in this run.
    pub activations: u32,
}

impl StageInstance {
    pub(crate) fn activated(stage_id: &str) -> Self {
        Self {
            stage_id: stage_id.to_string(),
            status: StageStatus::Active,
            payload: None,
            activations: 1,
        }
    }

    pub(crate) fn record(&mut self, payload: StagePayload) {
        match self.payload.as_mut() {
            Some(existing) => existing.merge(payload),
            None => self.payload = Some(payload),
        }
    }
}

/// Aggregate state of one research run.
///
/// Owned by [`super::ProgressTracker`]; everything else only sees clones.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Run {
    pub generation: Generation,
    pub topic: String,
    pub status: RunStatus,
    /// Stages in first-seen order, each id at most once.
    pub stage_sequence: Vec<StageInstance>,
    pub current_stage_id: Option<String>,
    pub side_channel_text: String,
    pub final_result: Option<String>,
    pub failure_reason: Option<String>,
    /// Last research cycle reported by a routing decision.
    pub loop_count: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn stage(&self, stage_id: &str) -> Option<&StageInstance> {
        self.stage_sequence.iter().find(|s| s.stage_id == stage_id)
    }

    pub(crate) fn stage_mut(&mut self, stage_id: &str) -> Option<&mut StageInstance> {
        self.stage_sequence.iter_mut().find(|s| s.stage_id == stage_id)
    }

    /// The active stage instance, if any.
    pub fn active_stage(&self) -> Option<&StageInstance> {
        self.stage_sequence
            .iter()
            .find(|s| s.status == StageStatus::Active)
    }

    pub fn completed_count(&self) -> usize {
        self.stage_sequence
            .iter()
            .filter(|s| s.status == StageStatus::Complete)
            .count()
    }

    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }
}
