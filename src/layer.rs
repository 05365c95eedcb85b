use crate::record::{field_key, LogRecord, MESSAGE_FIELD};
use crate::sink::LogSink;
use crate::stack::StackError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// `tracing_subscriber` layer that turns each event into a [`LogRecord`]
/// and hands it to every configured [`LogSink`], in order, on the calling
/// thread.
///
/// Level filtering happens before the layer sees an event; every sink gets
/// every record the filter lets through. A failing sink does not stop the
/// others and is never reported to the code that logged.
#[derive(Clone)]
pub struct RecordLayer {
    sinks: Arc<Vec<Arc<dyn LogSink>>>,
    /// Events seen by the layer.
    pub total_events: Arc<AtomicU64>,
    /// Successful sink writes (one per sink per record).
    pub written_records: Arc<AtomicU64>,
    /// Sink writes that returned an error and were dropped.
    pub failed_writes: Arc<AtomicU64>,
}

impl RecordLayer {
    pub fn new(sinks: Vec<Arc<dyn LogSink>>) -> Self {
        Self {
            sinks: Arc::new(sinks),
            total_events: Arc::new(AtomicU64::new(0)),
            written_records: Arc::new(AtomicU64::new(0)),
            failed_writes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn sinks(&self) -> &[Arc<dyn LogSink>] {
        &self.sinks
    }

    fn dispatch(&self, record: &LogRecord) {
        for sink in self.sinks.iter() {
            match sink.send(record) {
                Ok(()) => {
                    self.written_records.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    self.failed_writes.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

/// Build a record from a `tracing` event.
pub fn record_from_event(event: &Event<'_>) -> LogRecord {
    let meta = event.metadata();
    let mut record = LogRecord::new(*meta.level(), meta.target());
    record.caller = match (meta.file(), meta.line()) {
        (Some(file), Some(line)) => Some(format!("{file}:{line}")),
        (Some(file), None) => Some(file.to_string()),
        _ => None,
    };

    let mut visitor = FieldVisitor::new(&mut record.fields);
    event.record(&mut visitor);
    let FieldVisitor {
        message, error, stack, ..
    } = visitor;

    // The error text goes under the message key unless the event carries its
    // own message, in which case it is kept as a plain `error` field.
    record.message = match (message.filter(|m| !m.is_empty()), error) {
        (Some(msg), Some(err)) => {
            record.fields.insert("error".to_string(), Value::String(err));
            Some(msg)
        }
        (Some(msg), None) => Some(msg),
        (None, err) => err,
    };
    record.stack = stack;
    record
}

impl<S> Layer<S> for RecordLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let record = record_from_event(event);
        self.dispatch(&record);
    }
}

/// Collects event fields into JSON values.
///
/// String values holding a serialized JSON object or array are parsed back
/// into structure so no encoder ever prints them as an escaped string.
pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, Value>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub stack: Option<Vec<crate::stack::StackFrame>>,
}

impl<'a> FieldVisitor<'a> {
    pub fn new(fields: &'a mut BTreeMap<String, Value>) -> Self {
        FieldVisitor {
            fields,
            message: None,
            error: None,
            stack: None,
        }
    }

    fn insert(&mut self, field: &Field, value: Value) {
        self.fields.insert(field_key(field.name()), value);
    }
}

fn structured_or_string(value: &str) -> Value {
    let trimmed = value.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(parsed @ (Value::Object(_) | Value::Array(_))) = serde_json::from_str::<Value>(value) {
            return parsed;
        }
    }
    Value::String(value.to_string())
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == MESSAGE_FIELD {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, structured_or_string(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        if let Some(stacked) = StackError::find_in(value) {
            self.stack = Some(stacked.frames().to_vec());
        }
        if field.name() == "error" || field.name() == MESSAGE_FIELD {
            self.error = Some(value.to_string());
        } else {
            self.insert(field, Value::String(value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{:?}", value);
        if field.name() == MESSAGE_FIELD {
            self.message = Some(text);
        } else {
            self.insert(field, structured_or_string(&text));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::JsonEncoder;
    use crate::sink::{SinkError, WriterSink};
    use crate::stack::StackFrame;
    use crate::testing::SharedBuf;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::Registry;

    struct BrokenSink;

    impl LogSink for BrokenSink {
        fn send(&self, _record: &LogRecord) -> Result<(), SinkError> {
            Err(SinkError::Poisoned)
        }
    }

    fn capture(f: impl FnOnce()) -> Vec<Value> {
        let buf = SharedBuf::default();
        let sink: Arc<dyn LogSink> = Arc::new(WriterSink::new(JsonEncoder::default(), buf.clone()));
        let subscriber = Registry::default().with(RecordLayer::new(vec![sink]));
        tracing::subscriber::with_default(subscriber, f);
        buf.json_lines()
    }

    #[test]
    fn event_becomes_record() {
        let lines = capture(|| {
            tracing::info!(user_id = 42, ok = true, "signed in");
        });
        assert_eq!(lines.len(), 1);
        let line = &lines[0];
        assert_eq!(line["level"], "info");
        assert_eq!(line["message"], "signed in");
        assert_eq!(line["user_id"], 42);
        assert_eq!(line["ok"], true);
        assert!(line["caller"].as_str().unwrap().contains("layer.rs:"));
        assert!(line["created"].is_string());
    }

    #[test]
    fn fields_cannot_shadow_record_keys() {
        let lines = capture(|| {
            tracing::error!(level = "custom", created = "yesterday", caller = "nowhere", "real");
        });
        let line = &lines[0];
        assert_eq!(line["level"], "error");
        assert_ne!(line["created"], "yesterday");
        assert!(line["caller"].as_str().unwrap().contains("layer.rs:"));
        assert_eq!(line["message"], "real");
        assert_eq!(line["fields.level"], "custom");
        assert_eq!(line["fields.created"], "yesterday");
        assert_eq!(line["fields.caller"], "nowhere");
    }

    #[test]
    fn serialized_json_field_stays_structured() {
        let lines = capture(|| {
            tracing::info!(payload = r#"{"id":7,"tags":["a","b"]}"#, "received");
        });
        assert_eq!(lines[0]["payload"]["id"], 7);
        assert_eq!(lines[0]["payload"]["tags"][1], "b");
    }

    #[test]
    fn stack_error_fills_message_and_stack() {
        let frames = vec![
            StackFrame::new("app::a", "src/a.rs", 1),
            StackFrame::new("app::b", "src/b.rs", 2),
            StackFrame::new("app::c", "src/c.rs", 3),
            StackFrame::new("app::d", "src/d.rs", 4),
        ];
        let err = StackError::from_frames("testing", frames);
        let lines = capture(|| {
            tracing::error!(error = err.as_dyn());
        });
        assert_eq!(lines[0]["message"], "testing");
        let stack = lines[0]["stack"].as_array().unwrap();
        assert_eq!(stack.len(), 4);
        assert_eq!(stack[3]["func"], "app::d");
    }

    #[test]
    fn error_next_to_message_is_kept_separately() {
        let err = StackError::from_frames("timeout", vec![]);
        let lines = capture(|| {
            tracing::error!(error = err.as_dyn(), "fetch failed");
        });
        assert_eq!(lines[0]["message"], "fetch failed");
        assert_eq!(lines[0]["error"], "timeout");
    }

    #[test]
    fn failing_sink_does_not_block_others() {
        let buf = SharedBuf::default();
        let good: Arc<dyn LogSink> = Arc::new(WriterSink::new(JsonEncoder::default(), buf.clone()));
        let broken: Arc<dyn LogSink> = Arc::new(BrokenSink);
        let layer = RecordLayer::new(vec![broken, good]);
        let failed = Arc::clone(&layer.failed_writes);
        let written = Arc::clone(&layer.written_records);

        let subscriber = Registry::default().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("still delivered");
        });

        assert_eq!(failed.load(Ordering::Relaxed), 1);
        assert_eq!(written.load(Ordering::Relaxed), 1);
        assert_eq!(buf.json_lines()[0]["message"], "still delivered");
    }
}
