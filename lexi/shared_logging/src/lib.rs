#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured logging sinks shared by the training and serving crates.
//!
//! Every sink consumes the same [`LogRecord`] so a training run can write
//! JSON lines to disk, echo progress to the console and capture records in
//! memory for assertions, all from one call site.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Log severity level, ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational events.
    Info,
    /// Advisory conditions that do not stop the run.
    Warn,
    /// Failures.
    Error,
}

impl LogLevel {
    /// Upper-case label used in console output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

/// Structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp in ISO8601.
    pub timestamp: DateTime<Utc>,
    /// Module emitting the log.
    pub module: String,
    /// Severity.
    pub level: LogLevel,
    /// Event name or human-readable message.
    pub message: String,
    /// Structured fields attached to the event.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl LogRecord {
    /// Creates a record with an empty metadata map.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            level,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    /// Attaches the fields of a JSON object. Non-object values are stored under `data`.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        match metadata {
            Value::Object(map) => self.metadata = map,
            Value::Null => {}
            other => {
                self.metadata.insert("data".into(), other);
            }
        }
        self
    }
}

/// Destination for log records.
pub trait LogSink: Send + Sync {
    /// Writes a single record.
    fn write(&self, record: &LogRecord) -> Result<()>;
}

/// Thread-safe JSON-lines logger with append-only semantics.
#[derive(Debug)]
pub struct JsonLogger {
    path: PathBuf,
    writer: Mutex<File>,
}

impl JsonLogger {
    /// Creates or opens a logger at the desired path, creating parent directories.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Writes a log record as one JSON line.
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Returns the underlying file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for JsonLogger {
    fn write(&self, record: &LogRecord) -> Result<()> {
        self.log(record)
    }
}

/// Human-readable sink writing to stderr, filtered by a minimum level.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleLogger {
    min_level: LogLevel,
}

impl ConsoleLogger {
    /// Creates a console sink that drops records below `min_level`.
    #[must_use]
    pub const fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }

    /// Formats a record the way it is printed.
    #[must_use]
    pub fn render(record: &LogRecord) -> String {
        if record.metadata.is_empty() {
            format!(
                "[{}] {}: {}",
                record.level.as_str(),
                record.module,
                record.message
            )
        } else {
            format!(
                "[{}] {}: {} {}",
                record.level.as_str(),
                record.module,
                record.message,
                Value::Object(record.metadata.clone())
            )
        }
    }
}

impl LogSink for ConsoleLogger {
    fn write(&self, record: &LogRecord) -> Result<()> {
        if record.level >= self.min_level {
            let mut stderr = std::io::stderr().lock();
            writeln!(stderr, "{}", Self::render(record))?;
        }
        Ok(())
    }
}

/// In-memory sink, mainly for tests and short-lived tools.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogger {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of captured records.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Records whose message equals `message`.
    #[must_use]
    pub fn find(&self, message: &str) -> Vec<LogRecord> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.message == message)
            .cloned()
            .collect()
    }
}

impl LogSink for MemoryLogger {
    fn write(&self, record: &LogRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
