pub mod icons;
pub mod progress;

pub use progress::{ResearchUI, terminal_width};

/// Output mode for the research UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// Spinner, stage blocks and the rendered report
    #[default]
    Full,
    /// Single-line status updates
    Minimal,
    /// JSON projections for machine consumption
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    /// Parse UI mode from string; unknown values fall back to `full`.
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }

    /// Whether `s` names a mode rather than falling back.
    pub fn is_known(s: &str) -> bool {
        matches!(s.to_lowercase().as_str(), "full" | "minimal" | "json")
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UiMode::Full => "full",
            UiMode::Minimal => "minimal",
            UiMode::Json => "json",
        }
    }
}

impl std::fmt::Display for UiMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
