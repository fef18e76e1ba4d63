//! Side-channel buffer for model reasoning text.
//!
//! Reasoning arrives wrapped in `<think>` / `</think>` markers. Only the most
//! recent non-blank thought is kept; it is read on demand through
//! [`ReasoningBuffer::peek`], never pushed anywhere.

use regex::Regex;
use std::sync::LazyLock;

static THINK_MARKER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?think>").expect("marker regex is a valid static pattern"));

/// Remove reasoning markers, leaving the enclosed text in place.
pub fn strip_markers(raw: &str) -> String {
    THINK_MARKER_REGEX.replace_all(raw, "").into_owned()
}

/// Latest-wins store for reasoning text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReasoningBuffer {
    latest: String,
}

impl ReasoningBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer raw reasoning text. Returns `true` if it replaced the stored text.
    pub fn offer(&mut self, raw: &str) -> bool {
        let cleaned = strip_markers(raw);
        if cleaned.trim().is_empty() {
            return false;
        }
        self.latest = cleaned;
        true
    }

    /// The latest reasoning, or an empty string if none has arrived.
    pub fn peek(&self) -> &str {
        &self.latest
    }

    pub fn clear(&mut self) {
        self.latest.clear();
    }
}
