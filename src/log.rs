//! Injected logging capability.
//!
//! Components never reach for a global logger. Each one is handed an
//! `Arc<dyn Log>` at construction; the default forwards to `tracing`.

use parking_lot::Mutex;
use std::sync::Arc;

/// Minimal logging capability.
pub trait Log: Send + Sync {
    fn info(&self, component: &str, message: &str);
    fn warn(&self, component: &str, message: &str);
    fn error(&self, component: &str, message: &str);
}

/// Forwards to `tracing` with the component attached as a field.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLog;

impl Log for TracingLog {
    fn info(&self, component: &str, message: &str) {
        tracing::info!(component = component, "{}", message);
    }

    fn warn(&self, component: &str, message: &str) {
        tracing::warn!(component = component, "{}", message);
    }

    fn error(&self, component: &str, message: &str) {
        tracing::error!(component = component, "{}", message);
    }
}

/// Default logger handle.
pub fn default_log() -> Arc<dyn Log> {
    Arc::new(TracingLog)
}

/// Severity of a captured line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// A captured log line.
#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: Level,
    pub component: String,
    pub message: String,
}

/// Captures lines in memory (intended for tests).
#[derive(Default)]
pub struct RecordingLog {
    lines: Mutex<Vec<LogLine>>,
}

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured lines, oldest first.
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines.lock().clone()
    }

    /// Captured lines at the given level.
    pub fn at(&self, level: Level) -> Vec<LogLine> {
        self.lines
            .lock()
            .iter()
            .filter(|line| line.level == level)
            .cloned()
            .collect()
    }

    fn push(&self, level: Level, component: &str, message: &str) {
        self.lines.lock().push(LogLine {
            level,
            component: component.to_string(),
            message: message.to_string(),
        });
    }
}

impl Log for RecordingLog {
    fn info(&self, component: &str, message: &str) {
        self.push(Level::Info, component, message);
    }

    fn warn(&self, component: &str, message: &str) {
        self.push(Level::Warn, component, message);
    }

    fn error(&self, component: &str, message: &str) {
        self.push(Level::Error, component, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_log_filters_by_level() {
        let log = RecordingLog::new();
        log.info("a", "loaded");
        log.error("b", "failed");
        log.warn("a", "dropped");

        assert_eq!(log.lines().len(), 3);
        let errors = log.at(Level::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].component, "b");
        assert_eq!(errors[0].message, "failed");
    }

    #[test]
    fn test_tracing_log_under_subscriber() {
        let subscriber = tracing_subscriber::fmt().with_test_writer().finish();
        tracing::subscriber::with_default(subscriber, || {
            let log = default_log();
            log.info("groups", "Loaded 2 items");
            log.warn("groups", "Dropped create event");
            log.error("groups", "Bulk fetch failed");
        });
    }
}
