use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::Level;

use crate::stack::StackFrame;

/// Key of the record timestamp.
pub const TIMESTAMP_FIELD: &str = "created";
/// Key that carries the error text of an error record.
pub const ERROR_FIELD: &str = "message";
/// Key of the event message.
pub const MESSAGE_FIELD: &str = "message";
/// Key of the marshaled call stack.
pub const STACK_FIELD: &str = "stack";
/// Key of the `file:line` call site annotation.
pub const CALLER_FIELD: &str = "caller";
/// Key of the lowercase level name.
pub const LEVEL_FIELD: &str = "level";
/// Key of the `tracing` target.
pub const TARGET_FIELD: &str = "target";

/// Keys written by the record itself. Event fields with one of these names
/// are stored under `fields.<name>` so they never shadow the real value.
pub const RESERVED_FIELDS: &[&str] = &[
    LEVEL_FIELD,
    TIMESTAMP_FIELD,
    TARGET_FIELD,
    CALLER_FIELD,
    MESSAGE_FIELD,
    STACK_FIELD,
];

/// Key under which an event field named `name` is stored.
pub fn field_key(name: &str) -> String {
    if RESERVED_FIELDS.contains(&name) {
        format!("fields.{name}")
    } else {
        name.to_string()
    }
}

/// One structured log entry.
///
/// Built once per `tracing` event by [`RecordLayer`](crate::layer::RecordLayer)
/// and handed by reference to every configured sink. Serializes to the
/// wire layout shared by all JSON output of this crate:
///
/// ```json
/// {"level":"error","created":"2024-05-01T10:00:00Z","caller":"src/main.rs:12","message":"boom","stack":[...]}
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    #[serde(serialize_with = "serialize_level")]
    pub level: Level,
    #[serde(rename = "created", serialize_with = "serialize_rfc3339")]
    pub timestamp: DateTime<Utc>,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<StackFrame>>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

impl LogRecord {
    pub fn new(level: Level, target: impl Into<String>) -> Self {
        LogRecord {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            caller: None,
            message: None,
            stack: None,
            fields: BTreeMap::new(),
        }
    }

    /// Timestamp formatted the way it appears under [`TIMESTAMP_FIELD`].
    pub fn created(&self) -> String {
        format_rfc3339(&self.timestamp)
    }

    /// `true` for `ERROR` records, which render the message as an error.
    pub fn is_error(&self) -> bool {
        self.level == Level::ERROR
    }
}

pub(crate) fn format_rfc3339(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Lowercase level name, matching the `level` key of JSON output.
pub fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    }
}

fn serialize_level<S: Serializer>(level: &Level, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(level_name(level))
}

fn serialize_rfc3339<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_rfc3339(ts))
}
