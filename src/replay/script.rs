//! Replay transcripts: JSON Lines of frames with optional delays.
//!
//! Each non-blank line is either `{"delay_ms": N, "frame": {...}}` or a bare
//! frame object. Every string inside a frame may contain `{topic}`, which is
//! replaced with the topic the client asked about.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

const BUILTIN: &str = include_str!("builtin.jsonl");

/// Placeholder substituted with the research topic.
pub const TOPIC_PLACEHOLDER: &str = "{topic}";

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayStep {
    /// Delay before the frame is sent; `None` uses the server default.
    pub delay: Option<Duration>,
    pub frame: Value,
}

#[derive(Deserialize)]
struct StepLine {
    delay_ms: Option<u64>,
    frame: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    steps: Vec<ReplayStep>,
}

impl Transcript {
    /// Parse a JSON Lines transcript.
    pub fn parse(text: &str) -> Result<Self> {
        let mut steps = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(line)
                .with_context(|| format!("Transcript line {} is not valid JSON", idx + 1))?;
            let step = if value.get("frame").is_some() {
                let StepLine { delay_ms, frame } = serde_json::from_value(value)
                    .with_context(|| format!("Transcript line {} is not a valid step", idx + 1))?;
                ReplayStep {
                    delay: delay_ms.map(Duration::from_millis),
                    frame,
                }
            } else {
                ReplayStep {
                    delay: None,
                    frame: value,
                }
            };
            if !step.frame.get("type").is_some_and(Value::is_string) {
                bail!("Transcript line {} has no string \"type\"", idx + 1);
            }
            steps.push(step);
        }
        if steps.is_empty() {
            bail!("Transcript contains no frames");
        }
        Ok(Self { steps })
    }

    /// Load a transcript file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read transcript {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Invalid transcript {}", path.display()))
    }

    /// Two research cycles followed by a final report.
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN).context("Built-in transcript is invalid")
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[ReplayStep] {
        &self.steps
    }

    /// Serialized frames for `topic`, each paired with its delay.
    pub fn render(&self, topic: &str, default_delay: Duration) -> Vec<(Duration, String)> {
        self.steps
            .iter()
            .map(|step| {
                let mut frame = step.frame.clone();
                substitute_topic(&mut frame, topic);
                (step.delay.unwrap_or(default_delay), frame.to_string())
            })
            .collect()
    }
}

fn substitute_topic(value: &mut Value, topic: &str) {
    match value {
        Value::String(s) if s.contains(TOPIC_PLACEHOLDER) => {
            *s = s.replace(TOPIC_PLACEHOLDER, topic);
        }
        Value::Array(items) => items.iter_mut().for_each(|v| substitute_topic(v, topic)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute_topic(v, topic)),
        _ => {}
    }
}
