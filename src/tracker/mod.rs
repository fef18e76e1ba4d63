//! Progress state machine for a research run.
//!
//! [`ProgressTracker`] consumes decoded pipeline events in transport order and
//! keeps the [`Run`] consistent:
//! - stages are recorded in first-seen order, each id once
//! - starting a new stage completes the previous one
//! - a `continue` routing decision re-arms query generation
//! - `finalize` is idempotent, and every input tagged with a stale
//!   [`Generation`] is discarded
//!
//! The tracker never touches a display surface. Projections are pulled from
//! [`ProgressTracker::snapshot`].

mod reasoning;
mod run;

pub use reasoning::{ReasoningBuffer, strip_markers};
pub use run::{Generation, Run, RunStatus, StageInstance, StageStatus};

use chrono::Utc;
use tracing::debug;

use crate::errors::TrackerError;
use crate::protocol::{CONTINUE_DECISION, PipelineEvent, StagePayload};
use crate::stage;

/// Outcome of feeding one input to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The run changed.
    Changed,
    /// The input was valid but left the run as it was.
    Unchanged,
    /// The input belongs to an abandoned run.
    Stale {
        event: Generation,
        current: Generation,
    },
    /// The run is not accepting events in its current status.
    Ignored { status: RunStatus },
}

impl Applied {
    pub fn changed(self) -> bool {
        self == Applied::Changed
    }

    fn and(self, next: Applied) -> Applied {
        match (self, next) {
            (Applied::Changed, _) | (_, Applied::Changed) => Applied::Changed,
            (Applied::Unchanged, other) => other,
            (first, _) => first,
        }
    }
}

/// Owner of the current [`Run`].
#[derive(Debug, Default)]
pub struct ProgressTracker {
    run: Run,
    reasoning: ReasoningBuffer,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation of the current (or last) run.
    pub fn generation(&self) -> Generation {
        self.run.generation
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    /// Read-only copy of the run for projection.
    pub fn snapshot(&self) -> Run {
        self.run.clone()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_running()
    }

    /// Latest reasoning text, empty if none has arrived.
    pub fn peek(&self) -> &str {
        self.reasoning.peek()
    }

    /// Start a fresh run for `topic`, abandoning whatever was in progress.
    ///
    /// The query generation stage is shown as active immediately, before the
    /// pipeline acknowledges anything.
    pub fn start_run(&mut self, topic: &str) -> Result<Generation, TrackerError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(TrackerError::EmptyTopic);
        }

        let generation = self.run.generation.next();
        if self.run.is_running() {
            debug!(
                abandoned = %self.run.generation,
                "abandoning in-progress run for a new topic"
            );
        }

        self.reasoning.clear();
        self.run = Run {
            generation,
            topic: topic.to_string(),
            status: RunStatus::Running,
            started_at: Some(Utc::now()),
            ..Run::default()
        };
        self.activate(stage::GENERATE_QUERY, None);

        debug!(%generation, topic, "run started");
        Ok(generation)
    }

    /// Record that the pipeline entered `stage_id`.
    pub fn on_stage_event(
        &mut self,
        generation: Generation,
        stage_id: &str,
        payload: Option<StagePayload>,
    ) -> Applied {
        if let Some(rejected) = self.admit(generation) {
            return rejected;
        }
        self.activate(stage_id, payload);
        Applied::Changed
    }

    /// Record a routing decision. `continue` loops back to query generation.
    ///
    /// `loop_count` is kept for display only; no cycle limit is enforced here.
    pub fn on_routing_decision(
        &mut self,
        generation: Generation,
        decision: &str,
        loop_count: u32,
    ) -> Applied {
        if let Some(rejected) = self.admit(generation) {
            return rejected;
        }
        self.run.loop_count = Some(loop_count);
        if decision == CONTINUE_DECISION {
            debug!(loop_count, "research cycle continues");
            self.activate(stage::GENERATE_QUERY, None);
        }
        Applied::Changed
    }

    /// Offer reasoning text. Blank text (after marker stripping) is dropped.
    pub fn on_side_channel_text(&mut self, generation: Generation, raw: &str) -> Applied {
        if let Some(rejected) = self.admit(generation) {
            return rejected;
        }
        if self.reasoning.offer(raw) {
            self.run.side_channel_text = self.reasoning.peek().to_string();
            Applied::Changed
        } else {
            Applied::Unchanged
        }
    }

    /// Complete the run with its final report.
    ///
    /// A second call on a completed run is a no-op.
    pub fn finalize(&mut self, generation: Generation, result: &str) -> Applied {
        if let Some(rejected) = self.admit(generation) {
            return rejected;
        }
        self.complete_current();
        self.run.status = RunStatus::Completed;
        self.run.final_result = Some(result.to_string());
        self.run.finished_at = Some(Utc::now());
        debug!(%generation, stages = self.run.stage_sequence.len(), "run completed");
        Applied::Changed
    }

    /// Mark the run failed, e.g. when the transport cannot be reestablished.
    pub fn fail(&mut self, generation: Generation, reason: &str) -> Applied {
        if let Some(rejected) = self.admit(generation) {
            return rejected;
        }
        self.run.status = RunStatus::Failed;
        self.run.failure_reason = Some(reason.to_string());
        self.run.finished_at = Some(Utc::now());
        debug!(%generation, reason, "run failed");
        Applied::Changed
    }

    /// Dispatch one decoded pipeline event.
    pub fn apply(&mut self, generation: Generation, event: PipelineEvent) -> Applied {
        match event {
            PipelineEvent::Thinking { thoughts } => self.on_side_channel_text(generation, &thoughts),
            PipelineEvent::Stage { stage_id, payload } => {
                let thoughts = payload.thoughts().map(str::to_owned);
                let terminal = match &payload {
                    StagePayload::Routing(data) => {
                        Some(Followup::Routing(data.decision.clone(), data.loop_count))
                    }
                    StagePayload::Finalize(data) => Some(Followup::Finalize(data.summary.clone())),
                    _ => None,
                };

                let mut outcome = self.on_stage_event(generation, &stage_id, Some(payload));
                if let Some(thoughts) = thoughts {
                    outcome = outcome.and(self.on_side_channel_text(generation, &thoughts));
                }
                match terminal {
                    Some(Followup::Routing(decision, loop_count)) => {
                        outcome.and(self.on_routing_decision(generation, &decision, loop_count))
                    }
                    Some(Followup::Finalize(summary)) => {
                        outcome.and(self.finalize(generation, &summary))
                    }
                    None => outcome,
                }
            }
        }
    }

    fn admit(&self, generation: Generation) -> Option<Applied> {
        if generation != self.run.generation {
            debug!(event = %generation, current = %self.run.generation, "discarding stale event");
            return Some(Applied::Stale {
                event: generation,
                current: self.run.generation,
            });
        }
        if !self.run.is_running() {
            return Some(Applied::Ignored {
                status: self.run.status,
            });
        }
        None
    }

    fn complete_current(&mut self) {
        let Some(current) = self.run.current_stage_id.clone() else {
            return;
        };
        if let Some(instance) = self.run.stage_mut(&current) {
            instance.status = StageStatus::Complete;
        }
    }

    fn activate(&mut self, stage_id: &str, payload: Option<StagePayload>) {
        if self.run.current_stage_id.as_deref() != Some(stage_id) {
            self.complete_current();
        }
        self.run.current_stage_id = Some(stage_id.to_string());

        let idx = match self
            .run
            .stage_sequence
            .iter()
            .position(|s| s.stage_id == stage_id)
        {
            Some(idx) => {
                let existing = &mut self.run.stage_sequence[idx];
                if existing.status != StageStatus::Active {
                    // Payloads only merge within one activation.
                    existing.activations += 1;
                    existing.payload = None;
                }
                existing.status = StageStatus::Active;
                idx
            }
            None => {
                self.run.stage_sequence.push(StageInstance::activated(stage_id));
                self.run.stage_sequence.len() - 1
            }
        };

        if let Some(payload) = payload {
            self.run.stage_sequence[idx].record(payload);
        }
    }
}

enum Followup {
    Routing(String, u32),
    Finalize(String),
}
