//! JSONL layer.
//!
//! Each event becomes one [`LogEntry`]; its fields pass through
//! [`crate::redact::sanitize_fields`] first.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::redact::sanitize_fields;
use crate::RedactionMode;

/// One line of the JSONL sink.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// RFC 3339, microsecond precision, UTC.
    pub timestamp: String,
    pub level: &'static str,
    pub service: String,
    pub pid: u32,
    /// Module path of the call site.
    pub target: String,
    pub message: String,
    /// Event fields after redaction, in key order.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
    /// Enclosing spans, outermost first, joined with `:`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<String>,
}

#[derive(Default)]
struct EventFields {
    message: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl EventFields {
    fn put(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            self.message = Some(match value {
                Value::String(text) => text,
                other => other.to_string(),
            });
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = serde_json::Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.put(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::String(value.to_string()));
    }
}

/// Layer writing one redacted [`LogEntry`] per event.
pub struct JsonLayer<W> {
    service_name: String,
    pid: u32,
    make_writer: W,
    redaction: RedactionMode,
}

impl<W> JsonLayer<W> {
    pub fn new(service_name: String, make_writer: W, redaction: RedactionMode) -> Self {
        Self {
            service_name,
            pid: std::process::id(),
            make_writer,
            redaction,
        }
    }
}

impl<S, W> Layer<S> for JsonLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut visited = EventFields::default();
        event.record(&mut visited);

        let span = ctx.event_scope(event).map(|scope| {
            scope
                .from_root()
                .map(|span| span.name())
                .collect::<Vec<_>>()
                .join(":")
        });
        let metadata = event.metadata();

        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            level: level_name(metadata.level()),
            service: self.service_name.clone(),
            pid: self.pid,
            target: metadata.target().to_string(),
            message: visited.message.unwrap_or_default(),
            fields: sanitize_fields(visited.fields, self.redaction),
            span,
        };

        if let Ok(line) = serde_json::to_string(&entry) {
            let mut writer = self.make_writer.make_writer();
            let _ = writeln!(writer, "{}", line);
        }
    }
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "TRACE",
        Level::DEBUG => "DEBUG",
        Level::INFO => "INFO",
        Level::WARN => "WARN",
        Level::ERROR => "ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_serialization() {
        let entry = LogEntry {
            timestamp: "2026-04-01T09:00:00.000000Z".to_string(),
            level: "INFO",
            service: "campus-auth".to_string(),
            pid: 12345,
            target: "campus_auth::session".to_string(),
            message: "session re-authenticated".to_string(),
            fields: BTreeMap::new(),
            span: None,
        };

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"service\":\"campus-auth\""));
        assert!(json.contains("\"pid\":12345"));
        assert!(!json.contains("\"fields\""));
    }

    #[derive(Clone, Default)]
    struct BufferWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for BufferWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = BufferWriter;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_layer_redacts_password_field() {
        use tracing_subscriber::layer::SubscriberExt;

        let buffer = BufferWriter::default();
        let layer = JsonLayer::new("test".to_string(), buffer.clone(), RedactionMode::Standard);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(password = "hunter2", service = "albo", "login submitted");
        });

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("login submitted"));
        assert!(output.contains("[REDACTED]"));
        assert!(!output.contains("hunter2"));
    }

    #[test]
    fn test_layer_records_span_path() {
        use tracing_subscriber::layer::SubscriberExt;

        let buffer = BufferWriter::default();
        let layer = JsonLayer::new("test".to_string(), buffer.clone(), RedactionMode::Standard);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            let outer = tracing::info_span!("sign_in");
            let _outer = outer.enter();
            let inner = tracing::info_span!("handshake");
            let _inner = inner.enter();
            tracing::info!(attempt = 2u64, "retrying");
        });

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let entry: Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(entry["span"], "sign_in:handshake");
        assert_eq!(entry["fields"]["attempt"], 2);
    }
}
