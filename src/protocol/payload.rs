use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A web source reported by the research stage.
///
/// The pipeline sends either preformatted strings or search-result objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Source {
    Text(String),
    Entry {
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
}

impl Source {
    /// Title if present, else the url.
    pub fn label(&self) -> &str {
        match self {
            Source::Text(text) => text,
            Source::Entry { title, url } => title
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .or(url.as_deref())
                .unwrap_or("(untitled source)"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateQueryData {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebResearchData {
    #[serde(default)]
    pub sources: Option<Vec<Source>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummarizeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectionData {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub knowledge_gap: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingData {
    #[serde(default)]
    pub decision: String,
    #[serde(default)]
    pub loop_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalizeData {
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinkingData {
    #[serde(default)]
    pub thoughts: String,
}

/// Structured data recorded against a stage instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StagePayload {
    GenerateQuery(GenerateQueryData),
    WebResearch(WebResearchData),
    Summarize(SummarizeData),
    Reflection(ReflectionData),
    Routing(RoutingData),
    Finalize(FinalizeData),
    /// Data of a stage type the tracker has no schema for.
    Opaque(Map<String, Value>),
}

impl StagePayload {
    /// Reasoning text riding along with the stage data, if any.
    pub fn thoughts(&self) -> Option<&str> {
        match self {
            StagePayload::GenerateQuery(d) => d.thoughts.as_deref(),
            StagePayload::Summarize(d) => d.thoughts.as_deref(),
            StagePayload::Reflection(d) => d.thoughts.as_deref(),
            _ => None,
        }
    }

    /// Merge a newer payload for the same stage into this one.
    ///
    /// Non-empty fields of `newer` win; fields it leaves empty keep their
    /// previous value. Payloads of different kinds are replaced outright.
    pub fn merge(&mut self, newer: StagePayload) {
        match (self, newer) {
            (StagePayload::GenerateQuery(old), StagePayload::GenerateQuery(new)) => {
                merge_string(&mut old.query, new.query);
                merge_string(&mut old.rationale, new.rationale);
                merge_option(&mut old.thoughts, new.thoughts);
            }
            (StagePayload::WebResearch(old), StagePayload::WebResearch(new)) => {
                merge_option(&mut old.sources, new.sources);
                merge_option(&mut old.images, new.images);
            }
            (StagePayload::Summarize(old), StagePayload::Summarize(new)) => {
                merge_option(&mut old.summary, new.summary);
                merge_option(&mut old.thoughts, new.thoughts);
            }
            (StagePayload::Reflection(old), StagePayload::Reflection(new)) => {
                merge_string(&mut old.query, new.query);
                merge_string(&mut old.knowledge_gap, new.knowledge_gap);
                merge_option(&mut old.thoughts, new.thoughts);
            }
            (StagePayload::Routing(old), StagePayload::Routing(new)) => {
                merge_string(&mut old.decision, new.decision);
                old.loop_count = new.loop_count;
            }
            (StagePayload::Finalize(old), StagePayload::Finalize(new)) => {
                merge_string(&mut old.summary, new.summary);
            }
            (StagePayload::Opaque(old), StagePayload::Opaque(new)) => {
                old.extend(new);
            }
            (slot, new) => *slot = new,
        }
    }
}

fn merge_string(old: &mut String, new: String) {
    if !new.is_empty() {
        *old = new;
    }
}

fn merge_option<T>(old: &mut Option<T>, new: Option<T>) {
    if new.is_some() {
        *old = new;
    }
}
