//! Self-test transcript reported to the online monitoring
//!
//! Every line is logged through `tracing` and kept for the report.

use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct Transcript {
    lines: Mutex<Vec<String>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::info!("{}", text);
        self.push(text);
    }

    pub fn error(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::error!("{}", text);
        self.push(format!("ERROR: {}", text));
    }

    fn push(&self, line: String) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line);
    }

    /// All lines joined with newlines
    pub fn text(&self) -> String {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .join("\n")
    }

    #[cfg(test)]
    pub fn has_errors(&self) -> bool {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|line| line.starts_with("ERROR: "))
    }
}
