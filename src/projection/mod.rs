//! Pure projection of a [`Run`] into display structure.
//!
//! [`project`] reads a snapshot and never mutates it. The same snapshot and
//! renderer always produce the same [`Projection`], so a surface can redraw
//! from scratch on every change.

mod markdown;

pub use markdown::{Block, HtmlMarkup, MarkupRenderer, TerminalMarkup, parse_blocks};

use serde::Serialize;

use crate::protocol::{CONTINUE_DECISION, StagePayload};
use crate::stage;
use crate::tracker::{Generation, Run, RunStatus, StageInstance, StageStatus};

/// One stage as it should be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageView {
    pub id: String,
    pub name: String,
    pub description: String,
    pub icon: &'static str,
    pub status: StageStatus,
    pub activations: u32,
    pub details: Vec<String>,
}

/// Everything a surface needs to draw a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Projection {
    pub generation: Generation,
    pub topic: String,
    pub status: RunStatus,
    pub status_line: String,
    pub stages: Vec<StageView>,
    pub completed: usize,
    /// Research cycle from the last routing decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<u32>,
    /// Final report markup; only present once the run completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_markup: Option<String>,
}

pub fn project(run: &Run, renderer: &dyn MarkupRenderer) -> Projection {
    let result_markup = match (&run.status, &run.final_result) {
        (RunStatus::Completed, Some(result)) => Some(renderer.render(result)),
        _ => None,
    };

    Projection {
        generation: run.generation,
        topic: run.topic.clone(),
        status: run.status,
        status_line: status_line(run),
        stages: run.stage_sequence.iter().map(stage_view).collect(),
        completed: run.completed_count(),
        cycle: run.loop_count,
        result_markup,
    }
}

fn stage_view(instance: &StageInstance) -> StageView {
    let descriptor = stage::lookup(&instance.stage_id);
    StageView {
        id: descriptor.id,
        name: descriptor.display_name,
        description: descriptor.description,
        icon: descriptor.icon,
        status: instance.status,
        activations: instance.activations,
        details: instance
            .payload
            .as_ref()
            .map(stage_details)
            .unwrap_or_default(),
    }
}

/// The one-line summary shown next to the spinner.
pub fn status_line(run: &Run) -> String {
    match run.status {
        RunStatus::Idle => "Ready".to_string(),
        RunStatus::Running => match &run.current_stage_id {
            Some(id) => format!("{} in progress...", stage::lookup(id).display_name),
            None => "Initializing...".to_string(),
        },
        RunStatus::Completed => "Research completed!".to_string(),
        RunStatus::Failed => {
            let reason = run.failure_reason.as_deref().unwrap_or("").trim();
            if reason.is_empty() {
                "Unable to connect.".to_string()
            } else {
                format!("Unable to connect. {}", reason)
            }
        }
    }
}

/// Detail lines for a stage payload.
pub fn stage_details(payload: &StagePayload) -> Vec<String> {
    match payload {
        StagePayload::GenerateQuery(data) => query_lines(&data.query, &data.rationale),
        StagePayload::WebResearch(data) => {
            let sources = data.sources.as_deref().unwrap_or_default();
            let mut lines = vec![format!("Found {} sources", sources.len())];
            lines.extend(sources.iter().map(|s| s.label().to_string()));
            lines
        }
        StagePayload::Summarize(_) => vec!["Building comprehensive summary...".to_string()],
        StagePayload::Reflection(data) => {
            let gap = format!("Identified gap: {}", data.knowledge_gap);
            query_lines(&data.query, &gap)
        }
        StagePayload::Routing(data) => {
            if data.decision == CONTINUE_DECISION {
                vec![format!(
                    "Research cycle {} - continuing research...",
                    data.loop_count
                )]
            } else {
                vec!["Research cycles complete - finalizing report...".to_string()]
            }
        }
        StagePayload::Finalize(_) | StagePayload::Opaque(_) => Vec::new(),
    }
}

fn query_lines(query: &str, second: &str) -> Vec<String> {
    let mut lines = vec![format!("\"{}\"", query)];
    if !second.trim().is_empty() {
        lines.push(second.to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_frame;
    use crate::tracker::ProgressTracker;

    fn feed(tracker: &mut ProgressTracker, frames: &[&str]) {
        let generation = tracker.generation();
        for json in frames {
            let frame = decode_frame(json).unwrap();
            tracker.apply(generation, frame.event);
        }
    }

    fn quantum_run() -> Run {
        let mut tracker = ProgressTracker::new();
        tracker.start_run("quantum computing").unwrap();
        feed(
            &mut tracker,
            &[
                r#"{"type":"generate_query","data":{"query":"quantum computing basics","rationale":"start broad"}}"#,
                r#"{"type":"web_research","data":{"sources":["https://a.example","https://b.example"]}}"#,
                r#"{"type":"summarize","data":{"summary":"..."}}"#,
                r#"{"type":"reflection","data":{"query":"error correction","knowledge_gap":"fault tolerance"}}"#,
                r#"{"type":"routing","data":{"decision":"continue","loop_count":1}}"#,
                r#"{"type":"generate_query","data":{"query":"quantum error correction","rationale":"fill gap"}}"#,
                r##"{"type":"finalize","data":{"summary":"# Report\n..."}}"##,
            ],
        );
        tracker.snapshot()
    }

    #[test]
    fn test_idle_projection() {
        let projection = project(&Run::default(), &HtmlMarkup);
        assert_eq!(projection.status_line, "Ready");
        assert!(projection.stages.is_empty());
        assert!(projection.result_markup.is_none());
    }

    #[test]
    fn test_running_projection_shows_active_stage() {
        let mut tracker = ProgressTracker::new();
        tracker.start_run("topic").unwrap();
        let projection = project(tracker.run(), &HtmlMarkup);
        assert_eq!(projection.status_line, "Generate Query in progress...");
        assert_eq!(projection.stages.len(), 1);
        assert_eq!(projection.stages[0].status, StageStatus::Active);
        assert!(projection.stages[0].details.is_empty());
    }

    #[test]
    fn test_running_without_stage_is_initializing() {
        let run = Run {
            status: RunStatus::Running,
            ..Run::default()
        };
        assert_eq!(status_line(&run), "Initializing...");
    }

    #[test]
    fn test_quantum_scenario_projection() {
        let run = quantum_run();
        let projection = project(&run, &HtmlMarkup);

        assert_eq!(projection.status, RunStatus::Completed);
        assert_eq!(projection.status_line, "Research completed!");
        let ids: Vec<&str> = projection.stages.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "generate_query",
                "web_research",
                "summarize",
                "reflection",
                "routing",
                "finalize"
            ]
        );
        assert!(projection.stages.iter().all(|s| s.status == StageStatus::Complete));
        assert_eq!(projection.cycle, Some(1));

        let query = &projection.stages[0];
        assert_eq!(query.activations, 2);
        assert_eq!(
            query.details,
            vec!["\"quantum error correction\"".to_string(), "fill gap".to_string()]
        );

        let result = projection.result_markup.unwrap();
        assert!(result.contains("<h1>Report</h1>"));
    }

    #[test]
    fn test_projection_is_deterministic() {
        let run = quantum_run();
        let first = serde_json::to_string(&project(&run, &HtmlMarkup)).unwrap();
        let second = serde_json::to_string(&project(&run, &HtmlMarkup)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_web_research_details() {
        let frame = decode_frame(
            r#"{"type":"web_research","data":{"sources":["a.com",{"title":"B paper","url":"https://b.org"}]}}"#,
        )
        .unwrap();
        let crate::protocol::PipelineEvent::Stage { payload, .. } = frame.event else {
            panic!("Expected stage event");
        };
        assert_eq!(
            stage_details(&payload),
            vec!["Found 2 sources", "a.com", "B paper"]
        );
    }

    #[test]
    fn test_web_research_without_sources() {
        let payload = StagePayload::WebResearch(Default::default());
        assert_eq!(stage_details(&payload), vec!["Found 0 sources"]);
    }

    #[test]
    fn test_reflection_details() {
        let payload = StagePayload::Reflection(crate::protocol::ReflectionData {
            query: "error correction".to_string(),
            knowledge_gap: "fault tolerance".to_string(),
            thoughts: None,
        });
        assert_eq!(
            stage_details(&payload),
            vec!["\"error correction\"", "Identified gap: fault tolerance"]
        );
    }

    #[test]
    fn test_routing_details_follow_decision() {
        let routing = |decision: &str, loop_count| {
            StagePayload::Routing(crate::protocol::RoutingData {
                decision: decision.to_string(),
                loop_count,
            })
        };
        assert_eq!(
            stage_details(&routing("continue", 2)),
            vec!["Research cycle 2 - continuing research..."]
        );
        assert_eq!(
            stage_details(&routing("finalize", 4)),
            vec!["Research cycles complete - finalizing report..."]
        );
    }

    #[test]
    fn test_failed_status_line() {
        let run = Run {
            status: RunStatus::Failed,
            failure_reason: Some("Unable to connect to the research server after 5 attempts".into()),
            ..Run::default()
        };
        assert_eq!(
            status_line(&run),
            "Unable to connect. Unable to connect to the research server after 5 attempts"
        );
    }

    #[test]
    fn test_unknown_stage_uses_fallback_descriptor() {
        let mut tracker = ProgressTracker::new();
        tracker.start_run("topic").unwrap();
        feed(&mut tracker, &[r#"{"type":"fact_check","data":{"claims":2}}"#]);
        let projection = project(tracker.run(), &HtmlMarkup);
        let view = projection.stages.last().unwrap();
        assert_eq!(view.name, "fact_check");
        assert_eq!(view.description, "Processing");
        assert!(view.details.is_empty());
        assert_eq!(projection.status_line, "fact_check in progress...");
    }

    #[test]
    fn test_result_markup_absent_until_completed() {
        let run = Run {
            status: RunStatus::Running,
            final_result: Some("# Draft".into()),
            ..Run::default()
        };
        assert!(project(&run, &HtmlMarkup).result_markup.is_none());
    }
}
