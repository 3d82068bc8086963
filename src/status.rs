//! User-facing status messages.
//!
//! Use cases summarize every terminal outcome as one human-readable line
//! ("imported 3/5 files, 2 errors"). Messages go to a [`StatusSink`], which
//! is a one-way notification channel separate from the `tracing` debug log.
//! The CLI writes them to **stderr** so stdout stays parseable for scripts.

use std::io::Write;
use std::sync::Mutex;

use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl StatusLevel {
    pub fn label(&self) -> &'static str {
        match self {
            StatusLevel::Info => "info",
            StatusLevel::Success => "ok",
            StatusLevel::Warning => "warning",
            StatusLevel::Error => "error",
        }
    }
}

/// Receives status messages. Implementations must never fail the caller.
pub trait StatusSink: Send + Sync {
    fn report(&self, level: StatusLevel, message: &str);
}

/// Human-friendly status on stderr: `[ok] imported 3/3 files`.
pub struct StderrStatus;

impl StatusSink for StderrStatus {
    fn report(&self, level: StatusLevel, message: &str) {
        let line = format!("[{}] {}\n", level.label(), message);
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// Machine-readable status: one JSON object per line on stderr.
pub struct JsonStatus;

impl StatusSink for JsonStatus {
    fn report(&self, level: StatusLevel, message: &str) {
        let obj = serde_json::json!({
            "event": "status",
            "level": level,
            "message": message,
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

/// No-op sink when status output is disabled.
pub struct NoStatus;

impl StatusSink for NoStatus {
    fn report(&self, _level: StatusLevel, _message: &str) {}
}

/// Collects messages in memory, for embedders that render them later.
#[derive(Default)]
pub struct MemoryStatus {
    messages: Mutex<Vec<(StatusLevel, String)>>,
}

impl MemoryStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(StatusLevel, String)> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn last(&self) -> Option<(StatusLevel, String)> {
        self.messages().pop()
    }
}

impl StatusSink for MemoryStatus {
    fn report(&self, level: StatusLevel, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((level, message.to_string()));
        }
    }
}

/// Status mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusMode {
    Off,
    Human,
    Json,
}

impl StatusMode {
    /// Default: human status when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            StatusMode::Human
        } else {
            StatusMode::Off
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(StatusMode::Off),
            "human" => Some(StatusMode::Human),
            "json" => Some(StatusMode::Json),
            _ => None,
        }
    }

    pub fn sink(&self) -> Box<dyn StatusSink> {
        match self {
            StatusMode::Off => Box::new(NoStatus),
            StatusMode::Human => Box::new(StderrStatus),
            StatusMode::Json => Box::new(JsonStatus),
        }
    }
}
