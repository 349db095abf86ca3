//! Line-oriented output sink for streamed command output and status notices.
//!
//! The engine and executor only ever write to a sink. `ConsoleSink` keeps
//! stdout free for the CLI's JSON response; `MemorySink` records lines so
//! callers can inspect what a run printed.

use std::io::{self, Write};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

pub trait OutputSink: Send + Sync {
    fn write_line(&self, severity: Severity, line: &str);

    fn info(&self, line: &str) {
        self.write_line(Severity::Info, line);
    }

    fn error(&self, line: &str) {
        self.write_line(Severity::Error, line);
    }
}

/// Writes everything to stderr. Error lines carry an `[error]` prefix.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

impl OutputSink for ConsoleSink {
    fn write_line(&self, severity: Severity, line: &str) {
        let stderr = io::stderr();
        let mut handle = stderr.lock();
        // A closed stderr is not worth failing a deploy over.
        let _ = match severity {
            Severity::Info => writeln!(handle, "{}", line),
            Severity::Error => writeln!(handle, "[error] {}", line),
        };
    }
}

/// Captures lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(Severity, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<(Severity, String)> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    /// Lines of the given severity, in write order.
    pub fn messages(&self, severity: Severity) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(s, _)| *s == severity)
            .map(|(_, line)| line)
            .collect()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, line)| line.contains(needle))
    }
}

impl OutputSink for MemorySink {
    fn write_line(&self, severity: Severity, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((severity, line.to_string()));
        }
    }
}
