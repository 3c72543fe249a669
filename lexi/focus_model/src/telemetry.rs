use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};

/// Builder for focus-model telemetry sinks.
pub struct FocusTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl FocusTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            sinks: Vec::new(),
        }
    }

    /// Sets the JSON-lines log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Adds an extra sink (console, memory).
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<FocusTelemetry> {
        let mut sinks = self.sinks;
        if let Some(path) = self.log_path {
            sinks.insert(0, Arc::new(JsonLogger::new(path)?));
        }
        Ok(FocusTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                sinks,
            }),
        })
    }
}

/// Telemetry handle shared by the training and inference pipelines.
#[derive(Clone)]
pub struct FocusTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for FocusTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FocusTelemetry")
            .field("module", &self.inner.module)
            .field("sinks", &self.inner.sinks.len())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl FocusTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> FocusTelemetryBuilder {
        FocusTelemetryBuilder::new(module)
    }

    /// Logs structured metadata to every sink.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if self.inner.sinks.is_empty() {
            return Ok(());
        }
        let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
        for sink in &self.inner.sinks {
            sink.write(&record)?;
        }
        Ok(())
    }
}

/// Logs through an optional handle; telemetry failures never fail the caller.
pub(crate) fn log(
    telemetry: Option<&FocusTelemetry>,
    level: LogLevel,
    message: &str,
    metadata: Value,
) {
    if let Some(telemetry) = telemetry {
        if let Err(err) = telemetry.log(level, message, metadata) {
            eprintln!("focus telemetry write failed: {err:?}");
        }
    }
}
