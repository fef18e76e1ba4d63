//! Stage registry for the research pipeline.
//!
//! This module provides:
//! - `StageDescriptor` with the display metadata of a pipeline stage
//! - A process-wide, read-only registry of the built-in stages
//! - `lookup`, which falls back to a generic descriptor for unknown ids

use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;

pub const GENERATE_QUERY: &str = "generate_query";
pub const WEB_RESEARCH: &str = "web_research";
pub const SUMMARIZE: &str = "summarize";
pub const REFLECTION: &str = "reflection";
pub const ROUTING: &str = "routing";
pub const FINALIZE: &str = "finalize";

/// Icon used for stages the registry does not know about.
pub const DEFAULT_ICON: &str = "\u{2699}\u{FE0F}"; // ⚙️

/// Display metadata for one stage of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDescriptor {
    pub id: String,
    pub display_name: String,
    pub description: String,
    pub icon: &'static str,
}

impl StageDescriptor {
    fn new(id: &str, display_name: &str, description: &str, icon: &'static str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            description: description.to_string(),
            icon,
        }
    }

    /// Generic descriptor for a stage id outside the registry.
    pub fn fallback(id: &str) -> Self {
        Self::new(id, id, "Processing", DEFAULT_ICON)
    }
}

/// Read-only table of stage descriptors keyed by id.
#[derive(Debug)]
pub struct StageRegistry {
    ordered: Vec<StageDescriptor>,
    by_id: HashMap<String, usize>,
}

impl StageRegistry {
    fn builtin() -> Self {
        let ordered = vec![
            StageDescriptor::new(
                GENERATE_QUERY,
                "Generate Query",
                "Creating optimal search queries for your topic",
                "\u{1F50D}", // 🔍
            ),
            StageDescriptor::new(
                WEB_RESEARCH,
                "Web Research",
                "Searching the internet for relevant information",
                "\u{1F310}", // 🌐
            ),
            StageDescriptor::new(
                SUMMARIZE,
                "Summarize",
                "Summarizing and analyzing findings",
                "\u{1F4DD}", // 📝
            ),
            StageDescriptor::new(
                REFLECTION,
                "Reflection",
                "Finding knowledge gaps for deeper research",
                "\u{1F4AD}", // 💭
            ),
            StageDescriptor::new(
                ROUTING,
                "Routing",
                "Routing research for further exploration",
                DEFAULT_ICON,
            ),
            StageDescriptor::new(
                FINALIZE,
                "Finalize Report",
                "Compiling comprehensive research results",
                "\u{1F4CA}", // 📊
            ),
        ];
        let by_id = ordered
            .iter()
            .enumerate()
            .map(|(idx, d)| (d.id.clone(), idx))
            .collect();
        Self { ordered, by_id }
    }

    /// Descriptor for `id`, or `None` if it is not a built-in stage.
    pub fn get(&self, id: &str) -> Option<&StageDescriptor> {
        self.by_id.get(id).map(|&idx| &self.ordered[idx])
    }

    /// Descriptor for `id`; unknown ids get [`StageDescriptor::fallback`].
    pub fn lookup(&self, id: &str) -> StageDescriptor {
        self.get(id)
            .cloned()
            .unwrap_or_else(|| StageDescriptor::fallback(id))
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Built-in stages in pipeline order.
    pub fn all(&self) -> &[StageDescriptor] {
        &self.ordered
    }
}

static REGISTRY: LazyLock<StageRegistry> = LazyLock::new(StageRegistry::builtin);

/// The process-wide stage registry.
pub fn registry() -> &'static StageRegistry {
    &REGISTRY
}

/// Shorthand for `registry().lookup(id)`.
pub fn lookup(id: &str) -> StageDescriptor {
    registry().lookup(id)
}
