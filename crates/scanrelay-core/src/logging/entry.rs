//! JSONL log entry

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One log event, written as a single JSON line.
///
/// ```json
/// {"ts":"2026-10-18T09:12:03.511Z","level":"info","instance":"node-a",
///  "target":"scanrelay_core::cycle","msg":"Scan done",
///  "fields":{"cycle":3,"records":41,"envelope_len":512}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonLogEntry {
    /// RFC 3339 UTC timestamp with milliseconds
    pub ts: String,

    /// trace, debug, info, warn or error
    pub level: String,

    /// Relay instance that wrote the entry
    pub instance: String,

    /// Module path of the event
    pub target: String,

    /// Formatted message
    pub msg: String,

    /// Structured fields recorded with the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,

    /// Enclosing spans, root first, joined with " > "
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

impl JsonLogEntry {
    /// Entry stamped with the current time
    pub fn new(
        level: impl Into<String>,
        instance: impl Into<String>,
        target: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: level.into(),
            instance: instance.into(),
            target: target.into(),
            msg: msg.into(),
            fields: None,
            span: None,
        }
    }

    /// Attach structured fields
    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Attach the span path
    pub fn with_span(mut self, span: impl Into<String>) -> Self {
        self.span = Some(span.into());
        self
    }

    /// Look up one structured field
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.as_ref().and_then(|f| f.get(name))
    }

    /// Serialize without a trailing newline
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse one line
    pub fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_line_shape() {
        let entry = JsonLogEntry::new("info", "node-a", "scanrelay_core::cycle", "Scan done")
            .with_fields(serde_json::json!({ "records": 41, "envelope_len": 512 }));

        let line = entry.to_json_line().unwrap();
        assert!(line.contains("\"level\":\"info\""));
        assert!(line.contains("\"records\":41"));
        assert!(!line.contains("\"span\""));

        let parsed = JsonLogEntry::from_json_line(&line).unwrap();
        assert_eq!(parsed, entry);
        assert_eq!(parsed.field("envelope_len"), Some(&serde_json::json!(512)));
    }

    #[test]
    fn test_entry_without_optional_parts_parses() {
        let line = r#"{"ts":"2026-10-18T09:12:03.511Z","level":"warn","instance":"n","target":"t","msg":"m"}"#;
        let parsed = JsonLogEntry::from_json_line(line).unwrap();
        assert!(parsed.fields.is_none());
        assert!(parsed.field("anything").is_none());
    }
}
