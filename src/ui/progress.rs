use crate::projection::{Projection, StageView};
use crate::tracker::{Generation, RunStatus, StageStatus};
use crate::ui::UiMode;
use crate::ui::icons::{CHECK, CROSS, CYCLE, PLUG, SEARCH, SPARKLE, THINKING};
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;

/// Terminal surface for research runs.
///
/// The UI never reads the tracker. It is handed [`Projection`]s and redraws
/// from them, remembering only what it has already printed:
/// - `full`: a spinner carrying the status line, plus one block per stage as
///   it completes, then the rendered report
/// - `minimal`: one plain line per status change
/// - `json`: one JSON projection per change
pub struct ResearchUI {
    mode: UiMode,
    multi: MultiProgress,
    spinner: Option<ProgressBar>,
    term: Term,
    generation: Option<Generation>,
    /// `(stage id, activation)` pairs already printed as complete.
    reported: Vec<(String, u32)>,
    last_status: String,
    verbose: bool,
}

impl ResearchUI {
    pub fn new(mode: UiMode, verbose: bool) -> Self {
        Self {
            mode,
            multi: MultiProgress::new(),
            spinner: None,
            term: Term::stdout(),
            generation: None,
            reported: Vec::new(),
            last_status: String::new(),
            verbose,
        }
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn write_line(&self, msg: impl AsRef<str>) {
        let _ = writeln!(&self.term, "{}", msg.as_ref());
    }

    /// Draw a projection. Safe to call with the same projection repeatedly.
    pub fn render(&mut self, projection: &Projection) {
        if self.generation != Some(projection.generation) {
            self.begin(projection);
        }
        match self.mode {
            UiMode::Json => self.render_json(projection),
            UiMode::Minimal => self.render_minimal(projection),
            UiMode::Full => self.render_full(projection),
        }
    }

    fn begin(&mut self, projection: &Projection) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
        self.generation = Some(projection.generation);
        self.reported.clear();
        self.last_status.clear();

        if self.mode == UiMode::Full && projection.status == RunStatus::Running {
            self.print_line(format!(
                "{}Researching {}",
                SEARCH,
                style(&projection.topic).yellow().bold()
            ));
            let spinner_style = ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .expect("progress bar template is a valid static string");
            let spinner = self.multi.add(ProgressBar::new_spinner());
            spinner.set_style(spinner_style);
            spinner.enable_steady_tick(Duration::from_millis(100));
            self.spinner = Some(spinner);
        }
    }

    fn render_json(&mut self, projection: &Projection) {
        if let Ok(json) = serde_json::to_string(projection) {
            if json != self.last_status {
                self.write_line(&json);
                self.last_status = json;
            }
        }
    }

    fn render_minimal(&mut self, projection: &Projection) {
        if projection.status_line == self.last_status {
            return;
        }
        let line = match projection.status {
            RunStatus::Running => format!(
                "[{}/{}] {}",
                projection.completed,
                projection.stages.len(),
                projection.status_line
            ),
            _ => projection.status_line.clone(),
        };
        self.write_line(line);
        self.last_status = projection.status_line.clone();

        if projection.status == RunStatus::Completed {
            if let Some(result) = &projection.result_markup {
                self.write_line(result);
            }
        }
    }

    fn render_full(&mut self, projection: &Projection) {
        if projection.status.is_terminal() && projection.status_line == self.last_status {
            return;
        }
        for view in &projection.stages {
            if view.status != StageStatus::Complete {
                continue;
            }
            let key = (view.id.clone(), view.activations);
            if !self.reported.contains(&key) {
                self.print_line(stage_block(view, self.verbose));
                self.reported.push(key);
            }
        }

        let message = match projection.cycle {
            Some(cycle) if projection.status == RunStatus::Running => format!(
                "{} {}",
                projection.status_line,
                style(format!("{}cycle {}", CYCLE, cycle)).dim()
            ),
            _ => projection.status_line.clone(),
        };

        match projection.status {
            RunStatus::Running | RunStatus::Idle => {
                if let Some(spinner) = &self.spinner {
                    spinner.set_message(message);
                }
            }
            RunStatus::Completed => {
                self.finish(format!("{}{}", CHECK, style(message).green().bold()));
                if let Some(result) = &projection.result_markup {
                    self.print_line("");
                    self.print_line(result);
                    self.print_line("");
                }
            }
            RunStatus::Failed => {
                self.finish(format!("{}{}", CROSS, style(message).red().bold()));
            }
        }
        self.last_status = projection.status_line.clone();
    }

    fn finish(&mut self, message: String) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
        self.print_line(message);
    }

    /// Show the latest reasoning text, if any.
    pub fn show_reasoning(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            self.print_line(format!("{}{}", THINKING, style("No reasoning received yet").dim()));
            return;
        }
        match self.mode {
            UiMode::Json => {
                let json = serde_json::json!({ "reasoning": text });
                self.write_line(json.to_string());
            }
            _ => {
                self.print_line(format!("{}{}", THINKING, style("Reasoning").bold()));
                for line in wrap_indented(text, 4) {
                    self.print_line(style(line).dim().to_string());
                }
            }
        }
    }

    /// Report a transport hiccup that did not end the run.
    pub fn connection_notice(&self, message: &str) {
        if self.mode == UiMode::Json {
            return;
        }
        self.print_line(format!("{}{}", PLUG, style(message).yellow()));
    }

    /// Print a user-facing error without touching the run display.
    pub fn error(&self, message: &str) {
        if self.mode == UiMode::Json {
            let json = serde_json::json!({ "error": message });
            self.write_line(json.to_string());
            return;
        }
        self.print_line(format!("{}{}", CROSS, style(message).red()));
    }

    pub fn banner(&self, text: &str) {
        if self.mode == UiMode::Full {
            self.print_line(format!("{}{}", SPARKLE, style(text).bold()));
        }
    }

    /// Stop any spinner, e.g. before reading from stdin.
    pub fn pause(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.disable_steady_tick();
        }
    }

    pub fn resume(&self) {
        if let Some(spinner) = &self.spinner {
            spinner.enable_steady_tick(Duration::from_millis(100));
        }
    }
}

impl Drop for ResearchUI {
    fn drop(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}

fn stage_block(view: &StageView, verbose: bool) -> String {
    let mut lines = vec![format!(
        "  {}{} {}",
        CHECK,
        view.icon,
        style(&view.name).bold()
    )];
    if verbose {
        lines.push(format!("      {}", style(&view.description).dim()));
    }
    for detail in &view.details {
        for line in wrap_indented(detail, 6) {
            lines.push(style(line).dim().to_string());
        }
    }
    lines.join("\n")
}

/// Terminal width, falling back to 80 columns.
pub fn terminal_width() -> usize {
    match terminal_size::terminal_size() {
        Some((terminal_size::Width(w), _)) if w > 0 => w as usize,
        _ => 80,
    }
}

fn wrap_indented(text: &str, indent: usize) -> Vec<String> {
    let prefix = " ".repeat(indent);
    let width = terminal_width().saturating_sub(2).max(indent + 20);
    let options = textwrap::Options::new(width)
        .initial_indent(&prefix)
        .subsequent_indent(&prefix);
    textwrap::wrap(text, options)
        .into_iter()
        .map(|line| line.into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(details: &[&str]) -> StageView {
        StageView {
            id: "web_research".to_string(),
            name: "Web Research".to_string(),
            description: "Searching".to_string(),
            icon: "🌐",
            status: StageStatus::Complete,
            activations: 1,
            details: details.iter().map(|d| d.to_string()).collect(),
        }
    }

    #[test]
    fn test_wrap_indented_prefixes_every_line() {
        let text = "word ".repeat(60);
        let lines = wrap_indented(text.trim(), 4);
        assert!(lines.len() > 1);
        assert!(lines.iter().all(|l| l.starts_with("    ")));
    }

    #[test]
    fn test_stage_block_contains_details() {
        let block = console::strip_ansi_codes(&stage_block(&view(&["Found 2 sources", "a.com"]), false))
            .into_owned();
        assert!(block.contains("Web Research"));
        assert!(block.contains("      Found 2 sources"));
        assert!(block.contains("      a.com"));
        assert!(!block.contains("Searching"));
    }

    #[test]
    fn test_stage_block_verbose_shows_description() {
        let block = console::strip_ansi_codes(&stage_block(&view(&[]), true)).into_owned();
        assert!(block.contains("Searching"));
    }

    #[test]
    fn test_terminal_width_has_floor() {
        assert!(terminal_width() > 0);
    }
}
