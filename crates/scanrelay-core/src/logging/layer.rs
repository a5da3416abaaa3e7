//! Tracing layer that mirrors events into the instance JSONL file,
//! plus the builder that installs the global subscriber.

use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

use super::entry::JsonLogEntry;
use super::writer::InstanceLogWriter;
use crate::config::LoggingConfig;
use crate::error::{RelayError, RelayResult};

/// Writes every event it sees to an [`InstanceLogWriter`]
pub struct JsonlLayer {
    writer: Arc<InstanceLogWriter>,
}

impl JsonlLayer {
    /// Layer writing to `<logs_dir>/raw/<date>_<instance>.jsonl`
    pub fn new(logs_dir: impl AsRef<Path>, instance: impl Into<String>) -> std::io::Result<Self> {
        Ok(Self {
            writer: Arc::new(InstanceLogWriter::new(logs_dir, instance)?),
        })
    }

    /// Log file path
    pub fn log_path(&self) -> &Path {
        self.writer.path()
    }

    /// Instance name
    pub fn instance(&self) -> &str {
        self.writer.instance()
    }
}

impl<S> Layer<S> for JsonlLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);

        let mut entry = JsonLogEntry::new(
            metadata.level().as_str().to_lowercase(),
            self.writer.instance(),
            metadata.target(),
            visitor.message.unwrap_or_default(),
        );
        if !visitor.fields.is_empty() {
            entry = entry.with_fields(serde_json::Value::Object(visitor.fields));
        }
        if let Some(scope) = ctx.event_scope(event) {
            let spans: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !spans.is_empty() {
                entry = entry.with_span(spans.join(" > "));
            }
        }

        // Logging must never take the relay down
        let _ = self.writer.write(&entry);
    }
}

/// Collects the message and structured fields of one event
#[derive(Default)]
struct JsonVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl JsonVisitor {
    fn insert(&mut self, field: &Field, value: serde_json::Value) {
        self.fields.insert(field.name().to_string(), value);
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let mut buf = String::new();
        let _ = write!(&mut buf, "{:?}", value);
        if field.name() == "message" {
            self.message = Some(buf);
        } else {
            self.insert(field, serde_json::Value::String(buf));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.insert(field, serde_json::Value::Number(n));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, serde_json::Value::String(value.to_string()));
    }
}

/// Assembles console output, JSONL output and filtering into one subscriber
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    logs_dir: Option<PathBuf>,
    instance: String,
    console_output: bool,
    env_filter: Option<String>,
    default_level: String,
}

impl LoggingBuilder {
    /// Console-only logging at `info` for `instance`
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            logs_dir: None,
            instance: instance.into(),
            console_output: true,
            env_filter: None,
            default_level: "info".to_string(),
        }
    }

    /// Builder matching a [`LoggingConfig`]
    pub fn from_config(config: &LoggingConfig) -> Self {
        let mut builder = Self::new(&config.instance);
        builder.logs_dir = config.logs_dir.clone();
        builder.console_output = config.console;
        builder.env_filter = config.filter.clone();
        builder
    }

    /// Also write JSONL files under `logs_dir`
    pub fn with_logs_dir(mut self, logs_dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = Some(logs_dir.into());
        self
    }

    /// Disable console output
    pub fn no_console(mut self) -> Self {
        self.console_output = false;
        self
    }

    /// Explicit filter directive (e.g. "scanrelay_core=debug"), overriding
    /// `RUST_LOG`
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Level used when neither a filter nor `RUST_LOG` is set
    pub fn with_default_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    /// JSONL layer alone, for manual composition
    pub fn build_layer(&self) -> std::io::Result<Option<JsonlLayer>> {
        self.logs_dir
            .as_ref()
            .map(|dir| JsonlLayer::new(dir, &self.instance))
            .transpose()
    }

    fn filter(&self) -> RelayResult<EnvFilter> {
        match &self.env_filter {
            Some(directive) => EnvFilter::try_new(directive)
                .map_err(|e| RelayError::Config(format!("invalid log filter: {}", e))),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&self.default_level))),
        }
    }

    /// Install the global subscriber.
    ///
    /// Returns the JSONL file path when file logging is enabled. Console
    /// output goes to stderr.
    pub fn init(self) -> RelayResult<Option<PathBuf>> {
        let filter = self.filter()?;
        let jsonl = self.build_layer()?;
        let log_path = jsonl.as_ref().map(|layer| layer.log_path().to_path_buf());

        let console = self.console_output.then(|| {
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
        });

        tracing_subscriber::registry()
            .with(filter)
            .with(console)
            .with(jsonl)
            .try_init()
            .map_err(|e| RelayError::Config(format!("logging already initialized: {}", e)))?;

        Ok(log_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_jsonl_layer_captures_fields() {
        let temp = TempDir::new().unwrap();
        let layer = JsonlLayer::new(temp.path(), "node-a").unwrap();
        let log_path = layer.log_path().to_path_buf();

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("cycle", n = 1);
            let _guard = span.enter();
            tracing::info!(records = 41u64, "Scan done");
            tracing::warn!(offset = 16, ok = false, "Notify failed");
        });

        let content = std::fs::read_to_string(&log_path).unwrap();
        let entries: Vec<JsonLogEntry> = content
            .lines()
            .map(|l| JsonLogEntry::from_json_line(l).unwrap())
            .collect();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].msg, "Scan done");
        assert_eq!(entries[0].field("records"), Some(&serde_json::json!(41)));
        assert_eq!(entries[0].span.as_deref(), Some("cycle"));
        assert_eq!(entries[1].level, "warn");
        assert_eq!(entries[1].field("ok"), Some(&serde_json::json!(false)));
    }

    #[test]
    fn test_builder_from_config() {
        let config = LoggingConfig {
            instance: "node-b".to_string(),
            logs_dir: None,
            console: false,
            filter: Some("scanrelay_core=debug".to_string()),
        };
        let builder = LoggingBuilder::from_config(&config);
        assert!(!builder.console_output);
        assert!(builder.build_layer().unwrap().is_none());
        assert!(builder.filter().is_ok());
    }

    #[test]
    fn test_builder_rejects_bad_filter() {
        let builder = LoggingBuilder::new("x").with_filter("scanrelay_core=[");
        assert!(matches!(builder.filter(), Err(RelayError::Config(_))));
    }
}
