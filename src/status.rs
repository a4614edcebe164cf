use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

/// Severity of a status message emitted by the automation core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Success,
    Warning,
    Error,
    Debug,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Level::Info => "info",
            Level::Success => "success",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Debug => "debug",
        };
        f.write_str(s)
    }
}

/// Receiver for operator-relevant messages.
///
/// The core only calls this while a run is active (plus once for the stop
/// notification itself); tracing output is written separately and always.
pub trait StatusSink: Send + Sync {
    fn emit(&self, level: Level, message: &str);
}

/// Map a raw core message to the short line shown to the operator.
/// Returns `None` for messages the operator should not see.
pub fn operator_text(message: &str) -> Option<&'static str> {
    const KEYWORDS: &[(&str, &str)] = &[
        ("starting bot cycle in", "Starting in 5 seconds..."),
        ("scanning screen for water", "Looking for water..."),
        ("water found at", "Water found!"),
        ("water not found", "Water not found."),
        ("harvest action completed", "Harvest complete!"),
        ("traveling from", "Traveling to next map..."),
        ("map transition timeout", "Map load failed."),
        ("navigation failed", "Navigation failed."),
        ("run time limit reached", "Run time limit reached."),
        ("stopped collecting water", "Stopped collecting water"),
    ];

    let lower = message.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, friendly)| *friendly)
}

/// Publishes the latest operator line on a watch channel for the control API.
pub struct OperatorStatus {
    tx: watch::Sender<String>,
}

impl OperatorStatus {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel("Ready!".to_string());
        Self { tx }
    }

    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }
}

impl Default for OperatorStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for OperatorStatus {
    fn emit(&self, _level: Level, message: &str) {
        if let Some(text) = operator_text(message) {
            self.tx.send_replace(text.to_string());
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Sink that records every emitted message, for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub messages: Mutex<Vec<(Level, String)>>,
    }

    impl RecordingSink {
        pub fn count(&self) -> usize {
            self.messages.lock().unwrap().len()
        }

        pub fn texts(&self) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    impl StatusSink for RecordingSink {
        fn emit(&self, level: Level, message: &str) {
            self.messages.lock().unwrap().push((level, message.to_string()));
        }
    }

    #[test]
    fn test_operator_text_known_messages() {
        assert_eq!(
            operator_text("Water found at (10, 20) using 'w_elem_01.png'!"),
            Some("Water found!")
        );
        assert_eq!(
            operator_text("Map transition timeout: Screen did not turn black."),
            Some("Map load failed.")
        );
        assert_eq!(
            operator_text("Traveling from MAP_01 to MAP_02."),
            Some("Traveling to next map...")
        );
    }

    #[test]
    fn test_operator_text_is_case_insensitive() {
        assert_eq!(operator_text("WATER NOT FOUND"), Some("Water not found."));
    }

    #[test]
    fn test_operator_text_suppresses_unknown() {
        assert_eq!(operator_text("Holding movement key: up"), None);
        assert_eq!(operator_text(""), None);
        assert_eq!(operator_text("Run has stopped (Stopped) at MAP_01."), None);
    }

    #[test]
    fn test_operator_status_keeps_last_friendly_line() {
        let status = OperatorStatus::new();
        assert_eq!(status.current(), "Ready!");

        status.emit(Level::Info, "Scanning screen for water...");
        assert_eq!(status.current(), "Looking for water...");

        // Suppressed messages leave the line untouched
        status.emit(Level::Debug, "Clicked at: (1, 2)");
        assert_eq!(status.current(), "Looking for water...");
    }
}
