//! Wire format between the research pipeline and the tracker.
//!
//! Inbound frames are JSON objects shaped `{"type": ..., "data": {...}}`.
//! [`decode_frame`] turns one text frame into a typed [`InboundFrame`] or a
//! `MalformedMessage` error; nothing malformed ever reaches the tracker.

mod payload;

pub use payload::{
    FinalizeData, GenerateQueryData, ReflectionData, RoutingData, Source, StagePayload,
    SummarizeData, ThinkingData, WebResearchData,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::TrackerError;
use crate::stage;

/// Frame type carrying free-form reasoning text.
pub const THINKING: &str = "thinking";

/// Routing decision that loops the pipeline back to query generation.
pub const CONTINUE_DECISION: &str = "continue";

/// A decoded pipeline event.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// A stage transition with its structured payload.
    Stage {
        stage_id: String,
        payload: StagePayload,
    },
    /// Out-of-band reasoning text, not tied to a stage.
    Thinking { thoughts: String },
}

impl PipelineEvent {
    /// The frame `type` this event was decoded from.
    pub fn kind(&self) -> &str {
        match self {
            PipelineEvent::Stage { stage_id, .. } => stage_id,
            PipelineEvent::Thinking { .. } => THINKING,
        }
    }
}

/// One inbound frame after decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    /// Run generation echoed by the server, if it sent one.
    pub generation: Option<u64>,
    pub event: PipelineEvent,
}

/// Messages the tracker sends to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Research { topic: String },
}

impl ClientMessage {
    pub fn research(topic: impl Into<String>) -> Self {
        ClientMessage::Research {
            topic: topic.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, TrackerError> {
        serde_json::to_string(self)
            .map_err(|e| TrackerError::Other(anyhow::anyhow!("Failed to encode message: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    generation: Option<u64>,
}

/// Decode one text frame from the pipeline.
pub fn decode_frame(text: &str) -> Result<InboundFrame, TrackerError> {
    let raw: RawFrame = serde_json::from_str(text).map_err(|e| TrackerError::malformed(e.to_string()))?;

    let kind = raw.kind.trim();
    if kind.is_empty() {
        return Err(TrackerError::malformed("frame type is empty"));
    }

    let data = match raw.data {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        other => {
            return Err(TrackerError::malformed(format!(
                "data for '{}' must be an object, got {}",
                kind,
                json_type_name(&other)
            )));
        }
    };

    let event = decode_event(kind, data)?;
    Ok(InboundFrame {
        generation: raw.generation,
        event,
    })
}

fn decode_event(kind: &str, data: Map<String, Value>) -> Result<PipelineEvent, TrackerError> {
    if !is_schema_kind(kind) {
        return Ok(PipelineEvent::Stage {
            stage_id: kind.to_string(),
            payload: StagePayload::Opaque(data),
        });
    }

    let value = Value::Object(data);
    let payload = match kind {
        THINKING => {
            let ThinkingData { thoughts } = parse_data(kind, value)?;
            return Ok(PipelineEvent::Thinking { thoughts });
        }
        stage::GENERATE_QUERY => StagePayload::GenerateQuery(parse_data(kind, value)?),
        stage::WEB_RESEARCH => StagePayload::WebResearch(parse_data(kind, value)?),
        stage::SUMMARIZE => StagePayload::Summarize(parse_data(kind, value)?),
        stage::REFLECTION => StagePayload::Reflection(parse_data(kind, value)?),
        stage::ROUTING => StagePayload::Routing(parse_data(kind, value)?),
        _ => StagePayload::Finalize(parse_data(kind, value)?),
    };
    Ok(PipelineEvent::Stage {
        stage_id: kind.to_string(),
        payload,
    })
}

fn is_schema_kind(kind: &str) -> bool {
    matches!(
        kind,
        THINKING
            | stage::GENERATE_QUERY
            | stage::WEB_RESEARCH
            | stage::SUMMARIZE
            | stage::REFLECTION
            | stage::ROUTING
            | stage::FINALIZE
    )
}

fn parse_data<T: serde::de::DeserializeOwned>(kind: &str, value: Value) -> Result<T, TrackerError> {
    serde_json::from_value(value)
        .map_err(|e| TrackerError::malformed(format!("invalid '{}' data: {}", kind, e)))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage_payload(frame: InboundFrame) -> (String, StagePayload) {
        match frame.event {
            PipelineEvent::Stage { stage_id, payload } => (stage_id, payload),
            other => panic!("Expected stage event, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_generate_query() {
        let json = r#"{"type":"generate_query","data":{"query":"quantum computing basics","rationale":"broad sweep"}}"#;
        let (id, payload) = stage_payload(decode_frame(json).unwrap());
        assert_eq!(id, "generate_query");
        match payload {
            StagePayload::GenerateQuery(data) => {
                assert_eq!(data.query, "quantum computing basics");
                assert_eq!(data.rationale, "broad sweep");
                assert!(data.thoughts.is_none());
            }
            other => panic!("Expected GenerateQuery, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_web_research_string_and_object_sources() {
        let json = r#"{"type":"web_research","data":{"sources":["a.com",{"title":"B","url":"https://b.com","score":0.9}],"images":null}}"#;
        let (_, payload) = stage_payload(decode_frame(json).unwrap());
        let StagePayload::WebResearch(data) = payload else {
            panic!("Expected WebResearch");
        };
        let sources = data.sources.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].label(), "a.com");
        assert_eq!(sources[1].label(), "B");
        assert!(data.images.is_none());
    }

    #[test]
    fn test_decode_routing() {
        let json = r#"{"type":"routing","data":{"decision":"continue","loop_count":2}}"#;
        let (_, payload) = stage_payload(decode_frame(json).unwrap());
        assert_eq!(
            payload,
            StagePayload::Routing(RoutingData {
                decision: "continue".to_string(),
                loop_count: 2,
            })
        );
    }

    #[test]
    fn test_decode_thinking() {
        let frame = decode_frame(r#"{"type":"thinking","data":{"thoughts":"<think>hmm</think>"}}"#).unwrap();
        assert_eq!(
            frame.event,
            PipelineEvent::Thinking {
                thoughts: "<think>hmm</think>".to_string()
            }
        );
        assert_eq!(frame.event.kind(), THINKING);
    }

    #[test]
    fn test_decode_unknown_type_is_opaque_stage() {
        let frame = decode_frame(r#"{"type":"fact_check","data":{"claims":3}}"#).unwrap();
        let (id, payload) = stage_payload(frame);
        assert_eq!(id, "fact_check");
        let StagePayload::Opaque(map) = payload else {
            panic!("Expected Opaque");
        };
        assert_eq!(map["claims"], 3);
    }

    #[test]
    fn test_decode_keeps_generation_tag() {
        let frame = decode_frame(r#"{"type":"finalize","data":{"summary":"done"},"generation":7}"#).unwrap();
        assert_eq!(frame.generation, Some(7));
    }

    #[test]
    fn test_missing_data_defaults_to_empty_object() {
        let (_, payload) = stage_payload(decode_frame(r#"{"type":"summarize"}"#).unwrap());
        assert_eq!(payload, StagePayload::Summarize(SummarizeData::default()));
    }

    #[test]
    fn test_unparsable_text_is_malformed() {
        let err = decode_frame("{not json").unwrap_err();
        assert!(matches!(err, TrackerError::MalformedMessage { .. }));
    }

    #[test]
    fn test_missing_type_is_malformed() {
        let err = decode_frame(r#"{"data":{}}"#).unwrap_err();
        assert!(matches!(err, TrackerError::MalformedMessage { .. }));
        let err = decode_frame(r#"{"type":"  ","data":{}}"#).unwrap_err();
        assert!(matches!(err, TrackerError::MalformedMessage { .. }));
    }

    #[test]
    fn test_non_object_data_is_malformed() {
        let err = decode_frame(r#"{"type":"web_research","data":[1,2]}"#).unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_wrong_field_type_is_malformed() {
        let err = decode_frame(r#"{"type":"routing","data":{"decision":"continue","loop_count":"two"}}"#)
            .unwrap_err();
        assert!(matches!(err, TrackerError::MalformedMessage { .. }));
    }

    #[test]
    fn test_client_message_shape() {
        let json = ClientMessage::research("quantum computing").to_json().unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["type"], "research");
        assert_eq!(parsed["topic"], "quantum computing");
        assert_eq!(parsed.as_object().unwrap().len(), 2);
    }
}
