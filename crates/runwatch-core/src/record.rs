use chrono::{DateTime, Utc};
use std::fmt;

pub const START_GLYPHS: &[&str] = &["▶", "▸", "→", "➜"];
pub const DONE_GLYPHS: &[&str] = &["✅", "✓", "✔"];
pub const WARNING_GLYPHS: &[&str] = &["⚠️", "⚠"];

/// One captured output line. Never mutated after capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRecord {
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub is_error: bool,
}

impl LineRecord {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            text: text.into(),
            is_error: false,
        }
    }

    /// A record synthesized by the adapter itself (read failure, panic).
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            text: text.into(),
            is_error: true,
        }
    }

    pub fn level(&self) -> LogLevel {
        LogLevel::classify(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Success,
    Info,
}

impl LogLevel {
    pub fn classify(record: &LineRecord) -> Self {
        if record.is_error {
            return LogLevel::Error;
        }
        let text = record.text.trim_start();
        if starts_with_any(text, WARNING_GLYPHS) {
            LogLevel::Warn
        } else if starts_with_any(text, DONE_GLYPHS) {
            LogLevel::Success
        } else {
            LogLevel::Info
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Success => "SUCCESS",
            LogLevel::Info => "INFO",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn starts_with_any(text: &str, prefixes: &[&str]) -> bool {
    prefixes.iter().any(|prefix| text.starts_with(prefix))
}

/// Returns the remainder after the first matching glyph, trimmed.
pub(crate) fn strip_any_prefix<'a>(text: &'a str, prefixes: &[&str]) -> Option<&'a str> {
    prefixes
        .iter()
        .find_map(|prefix| text.strip_prefix(prefix))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_flag_wins_over_glyphs() {
        let mut record = LineRecord::new("✓ build finished");
        assert_eq!(record.level(), LogLevel::Success);
        record.is_error = true;
        assert_eq!(record.level(), LogLevel::Error);
    }

    #[test]
    fn glyph_levels() {
        assert_eq!(LineRecord::new("⚠ flaky test").level(), LogLevel::Warn);
        assert_eq!(LineRecord::new("  ✔ lint").level(), LogLevel::Success);
        assert_eq!(LineRecord::new("▶ running tests").level(), LogLevel::Info);
        assert_eq!(LineRecord::new("plain").level(), LogLevel::Info);
    }

    #[test]
    fn error_text_alone_is_not_an_error_record() {
        let record = LineRecord::new("ERROR: something broke");
        assert!(!record.is_error);
        assert_eq!(record.level(), LogLevel::Info);
    }
}
