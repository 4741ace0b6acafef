//! Recognizes the few structural markers the automation prints (iteration and
//! section headers, action glyphs, status phrases) and folds them into the
//! dashboard summary.

use crate::record::{strip_any_prefix, DONE_GLYPHS, START_GLYPHS, WARNING_GLYPHS};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

const DEFAULT_PHASE: &str = "Running";
const LEVEL_TOKENS: &[&str] = &["DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationIndex {
    Value(u64),
    /// A number was printed but could not be parsed.
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IterationTotal {
    /// No denominator was printed.
    #[default]
    Unspecified,
    /// A denominator was printed but could not be parsed.
    Unknown,
    Value(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationHeader {
    pub current: IterationIndex,
    pub total: IterationTotal,
    pub label: String,
}

impl IterationHeader {
    pub fn phase(&self) -> String {
        let current = match self.current {
            IterationIndex::Value(value) => value.to_string(),
            IterationIndex::Unknown => "?".to_string(),
        };
        match self.total {
            IterationTotal::Value(total) => format!("Iteration {current}/{total}"),
            IterationTotal::Unknown => format!("Iteration {current}/?"),
            IterationTotal::Unspecified => format!("Iteration {current}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    Iteration(IterationHeader),
    Section(String),
    ActionStarted(String),
    ActionDone(String),
    Warning(String),
    Status(String),
    Plain,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardState {
    pub phase: Option<String>,
    pub current_action: Option<String>,
    pub previous_action: Option<String>,
    pub last_completed_action: Option<String>,
    pub iteration_current: Option<IterationIndex>,
    pub iteration_total: IterationTotal,
    pub iteration_label: String,
}

impl DashboardState {
    /// Classifies one raw output line and applies it to the summary.
    pub fn observe(&mut self, raw: &str) -> LineKind {
        let kind = classify(raw);
        match &kind {
            LineKind::Iteration(header) => {
                let phase = header.phase();
                self.iteration_current = Some(header.current);
                self.iteration_total = header.total;
                self.iteration_label = header.label.clone();
                self.phase = Some(phase.clone());
                let action = if header.label.is_empty() {
                    phase
                } else {
                    header.label.clone()
                };
                self.set_current_action(action);
            }
            LineKind::Section(title) => {
                self.phase = Some(title.clone());
                self.set_current_action(title.clone());
            }
            LineKind::ActionStarted(action) | LineKind::Warning(action) | LineKind::Status(action) => {
                self.set_current_action(action.clone());
            }
            LineKind::ActionDone(action) => {
                self.last_completed_action = Some(action.clone());
                self.set_current_action(action.clone());
            }
            LineKind::Plain => {}
        }
        kind
    }

    fn set_current_action(&mut self, action: String) {
        self.previous_action = self.current_action.take();
        self.current_action = Some(action);
        if self.phase.is_none() {
            self.phase = Some(DEFAULT_PHASE.to_string());
        }
    }

    pub fn phase_label(&self) -> &str {
        self.phase.as_deref().unwrap_or("Idle")
    }

    pub fn iteration_summary(&self) -> Option<String> {
        let current = self.iteration_current?;
        let header = IterationHeader {
            current,
            total: self.iteration_total,
            label: self.iteration_label.clone(),
        };
        Some(header.to_string())
    }
}

impl fmt::Display for IterationHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.label.is_empty() {
            f.write_str(&self.phase())
        } else {
            write!(f, "{}: {}", self.phase(), self.label)
        }
    }
}

pub fn classify(raw: &str) -> LineKind {
    let line = strip_log_prefix(raw).trim();
    if line.is_empty() {
        return LineKind::Plain;
    }

    if let Some(header) = parse_iteration_header(line) {
        return LineKind::Iteration(header);
    }
    if let Some(title) = parse_section_header(line) {
        return LineKind::Section(title);
    }
    if let Some(action) = strip_any_prefix(line, START_GLYPHS) {
        return LineKind::ActionStarted(action.to_string());
    }
    if let Some(action) = strip_any_prefix(line, DONE_GLYPHS) {
        return LineKind::ActionDone(action.to_string());
    }
    if strip_any_prefix(line, WARNING_GLYPHS).is_some() {
        return LineKind::Warning(line.to_string());
    }
    if is_status_phrase(line) {
        return LineKind::Status(line.to_string());
    }
    LineKind::Plain
}

/// Drops a `YYYY-MM-DD HH:MM:SS,mmm LEVEL module: ` prefix. The regex only
/// runs when the cheap check (leading digits plus a level token) passes.
pub fn strip_log_prefix(line: &str) -> &str {
    let looks_prefixed = line.len() > 4
        && line.as_bytes()[..4].iter().all(u8::is_ascii_digit)
        && LEVEL_TOKENS.iter().any(|token| line.contains(token));
    if !looks_prefixed {
        return line;
    }
    match log_prefix_pattern().find(line) {
        Some(found) => &line[found.end()..],
        None => line,
    }
}

fn parse_iteration_header(line: &str) -> Option<IterationHeader> {
    let captures = iteration_pattern().captures(line)?;
    let current_raw = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let current = match current_raw.parse::<u64>() {
        Ok(value) => IterationIndex::Value(value),
        Err(err) => {
            debug!(value = current_raw, error = %err, "iteration_index_unparsed");
            IterationIndex::Unknown
        }
    };
    let total = match captures.get(2).map(|m| m.as_str()) {
        None => IterationTotal::Unspecified,
        Some(raw) => match raw.parse::<u64>() {
            Ok(value) if value > 0 => IterationTotal::Value(value),
            Ok(_) => {
                debug!(value = raw, "iteration_total_not_positive");
                IterationTotal::Unknown
            }
            Err(err) => {
                debug!(value = raw, error = %err, "iteration_total_unparsed");
                IterationTotal::Unknown
            }
        },
    };
    let label = captures
        .get(3)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    Some(IterationHeader {
        current,
        total,
        label,
    })
}

fn parse_section_header(line: &str) -> Option<String> {
    let captures = section_pattern().captures(line)?;
    let title = captures.get(1)?.as_str().trim();
    if title.is_empty() || title.to_ascii_lowercase().starts_with("iteration") {
        return None;
    }
    Some(title.to_string())
}

fn is_status_phrase(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.starts_with("no ")
        || lower.starts_with("stopping")
        || lower.starts_with("opened pr")
        || lower.starts_with("final tasks_left")
        || lower.ends_with("done.")
        || lower.contains("review loop")
        || lower.contains("process finished")
}

fn iteration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^=+\s*iteration\s+([^\s/:=]+)(?:\s*/\s*([^\s:=]+))?(?:\s*:\s*(.*?))?\s*=+$")
            .expect("valid regex")
    })
}

fn section_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^=+\s*([^=\s].*?)\s*=+$").expect("valid regex"))
}

fn log_prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?\s+(?:DEBUG|INFO|WARNING|WARN|ERROR|CRITICAL)\s+[^\s:]+:\s",
        )
        .expect("valid regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe_all(lines: &[&str]) -> DashboardState {
        let mut state = DashboardState::default();
        for line in lines {
            state.observe(line);
        }
        state
    }

    #[test]
    fn iteration_with_total_and_label() {
        let state = observe_all(&["=== Iteration 3/10: Build ==="]);
        assert_eq!(state.iteration_current, Some(IterationIndex::Value(3)));
        assert_eq!(state.iteration_total, IterationTotal::Value(10));
        assert_eq!(state.iteration_label, "Build");
        assert_eq!(state.phase.as_deref(), Some("Iteration 3/10"));
        assert_eq!(state.current_action.as_deref(), Some("Build"));
    }

    #[test]
    fn iteration_without_total() {
        let state = observe_all(&["=== Iteration 5 ==="]);
        assert_eq!(state.iteration_current, Some(IterationIndex::Value(5)));
        assert_eq!(state.iteration_total, IterationTotal::Unspecified);
        assert_eq!(state.iteration_label, "");
        assert_eq!(state.phase.as_deref(), Some("Iteration 5"));
        assert_eq!(state.current_action.as_deref(), Some("Iteration 5"));
    }

    #[test]
    fn overflowing_total_is_unknown_not_unspecified() {
        let state = observe_all(&["=== Iteration 2/99999999999999999999 ==="]);
        assert_eq!(state.iteration_current, Some(IterationIndex::Value(2)));
        assert_eq!(state.iteration_total, IterationTotal::Unknown);
        assert_eq!(state.phase.as_deref(), Some("Iteration 2/?"));
    }

    #[test]
    fn unparseable_index_is_unknown() {
        let state = observe_all(&["== Iteration 99999999999999999999999/4 =="]);
        assert_eq!(state.iteration_current, Some(IterationIndex::Unknown));
        assert_eq!(state.iteration_total, IterationTotal::Value(4));
        assert_eq!(state.phase.as_deref(), Some("Iteration ?/4"));
    }

    #[test]
    fn no_iteration_seen_yet() {
        let state = observe_all(&["hello"]);
        assert_eq!(state.iteration_current, None);
        assert_eq!(state.iteration_total, IterationTotal::Unspecified);
        assert_eq!(state.iteration_summary(), None);
    }

    #[test]
    fn section_header_sets_phase_and_action() {
        let state = observe_all(&["===== Code Review ====="]);
        assert_eq!(state.phase.as_deref(), Some("Code Review"));
        assert_eq!(state.current_action.as_deref(), Some("Code Review"));
    }

    #[test]
    fn separator_lines_are_plain() {
        assert_eq!(classify("=========="), LineKind::Plain);
        assert_eq!(classify("=== Iteration x y ==="), LineKind::Plain);
    }

    #[test]
    fn action_glyphs_shift_previous_action() {
        let state = observe_all(&["▶ Running tests", "✓ Tests passed", "⚠ coverage dropped"]);
        assert_eq!(state.last_completed_action.as_deref(), Some("Tests passed"));
        assert_eq!(state.previous_action.as_deref(), Some("Tests passed"));
        assert_eq!(state.current_action.as_deref(), Some("⚠ coverage dropped"));
        assert_eq!(state.phase.as_deref(), Some("Running"));
    }

    #[test]
    fn header_phase_survives_actions() {
        let state = observe_all(&["=== Iteration 1/2 ===", "▶ Implementing task"]);
        assert_eq!(state.phase.as_deref(), Some("Iteration 1/2"));
        assert_eq!(state.previous_action.as_deref(), Some("Iteration 1/2"));
        assert_eq!(state.current_action.as_deref(), Some("Implementing task"));
    }

    #[test]
    fn status_phrases_are_case_insensitive() {
        for line in [
            "No tasks remaining",
            "Stopping after max iterations",
            "Opened PR #42",
            "final tasks_left=0",
            "Review loop 2 of 3",
            "Build done.",
            "The process finished cleanly",
        ] {
            assert_eq!(classify(line), LineKind::Status(line.to_string()), "{line}");
        }
        assert_eq!(classify("nothing to see"), LineKind::Plain);
    }

    #[test]
    fn strips_automation_log_prefix() {
        let line = "2024-05-01 12:30:45,123 INFO ralph.loop: === Iteration 4/6: Tests ===";
        assert_eq!(strip_log_prefix(line), "=== Iteration 4/6: Tests ===");
        let state = observe_all(&[line]);
        assert_eq!(state.iteration_current, Some(IterationIndex::Value(4)));

        assert_eq!(strip_log_prefix("2024 was a year"), "2024 was a year");
        assert_eq!(strip_log_prefix("plain INFO text"), "plain INFO text");
    }

    #[test]
    fn plain_lines_leave_state_untouched() {
        let mut state = DashboardState::default();
        assert_eq!(state.observe("compiling foo v0.1.0"), LineKind::Plain);
        assert_eq!(state, DashboardState::default());
    }
}
