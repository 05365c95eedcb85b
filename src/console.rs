//! Human-readable encoder for terminals and plain-text files.

use crate::record::{LogRecord, STACK_FIELD};
use chrono::Local;
use crate::sink::{RecordEncoder, SinkError};
use nu_ansi_term::{Color, Style};
use serde_json::Value;
use std::fmt::Write as _;
use std::io::{self, IsTerminal, Write};
use tracing::Level;

/// Default console timestamp layout.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Stream the console encoder is meant for. Only consulted for color detection
/// and for opening the default writer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    Stdout,
    Stderr,
}

impl Target {
    pub fn is_terminal(self) -> bool {
        match self {
            Target::Stdout => io::stdout().is_terminal(),
            Target::Stderr => io::stderr().is_terminal(),
        }
    }

    pub fn writer(self) -> Box<dyn Write + Send> {
        match self {
            Target::Stdout => Box::new(io::stdout()),
            Target::Stderr => Box::new(io::stderr()),
        }
    }
}

/// When to emit ANSI color sequences.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorChoice {
    /// Color only if the target stream is a terminal.
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    pub fn resolve(self, target: Target) -> bool {
        match self {
            ColorChoice::Auto => target.is_terminal(),
            ColorChoice::Always => true,
            ColorChoice::Never => false,
        }
    }
}

/// Formats a record as `<time> <LVL> <caller> > <message> key=value ...`.
///
/// Nested values (objects, arrays, and the call stack) stay structured:
/// inline compact JSON by default, or an indented block under the line
/// when `marshal_indent` is on.
#[derive(Clone, Debug)]
pub struct ConsoleEncoder {
    target: Target,
    color: bool,
    time_format: String,
    marshal_indent: bool,
}

impl Default for ConsoleEncoder {
    fn default() -> Self {
        Self::new(Target::Stdout, ColorChoice::Auto)
    }
}

impl ConsoleEncoder {
    pub fn new(target: Target, color: ColorChoice) -> Self {
        ConsoleEncoder {
            target,
            color: color.resolve(target),
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            marshal_indent: false,
        }
    }

    pub fn color(mut self, choice: ColorChoice) -> Self {
        self.color = choice.resolve(self.target);
        self
    }

    pub fn time_format(mut self, format: impl Into<String>) -> Self {
        self.time_format = format.into();
        self
    }

    pub fn marshal_indent(mut self, enabled: bool) -> Self {
        self.marshal_indent = enabled;
        self
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn colored(&self) -> bool {
        self.color
    }

    fn paint(&self, style: Style, text: &str) -> String {
        if self.color {
            style.paint(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn level_style(level: &Level) -> (Style, &'static str) {
        match *level {
            Level::TRACE => (Color::Magenta.normal(), "TRC"),
            Level::DEBUG => (Color::Yellow.normal(), "DBG"),
            Level::INFO => (Color::Green.normal(), "INF"),
            Level::WARN => (Color::Red.normal(), "WRN"),
            Level::ERROR => (Color::Red.bold(), "ERR"),
        }
    }

    fn format_value(&self, value: &Value) -> String {
        match value {
            Value::String(s) if needs_quoting(s) => Value::String(s.clone()).to_string(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn push_block(&self, line: &mut String, key: &str, value: &Value) -> Result<(), SinkError> {
        let pretty = serde_json::to_string_pretty(value)?;
        line.push('\n');
        line.push_str("  ");
        line.push_str(&self.paint(Color::Cyan.normal(), &format!("{key}=")));
        for (i, row) in pretty.lines().enumerate() {
            if i > 0 {
                line.push_str("\n  ");
            }
            line.push_str(row);
        }
        Ok(())
    }
}

impl RecordEncoder for ConsoleEncoder {
    fn encode(&self, record: &LogRecord, buf: &mut Vec<u8>) -> Result<(), SinkError> {
        let mut line = String::with_capacity(128);

        let mut time = String::new();
        // chrono reports a bad format string as a fmt::Error
        let local = record.timestamp.with_timezone(&Local);
        if write!(time, "{}", local.format(&self.time_format)).is_err() {
            time = record.created();
        }
        line.push_str(&self.paint(Color::DarkGray.normal(), &time));

        let (style, label) = Self::level_style(&record.level);
        line.push(' ');
        line.push_str(&self.paint(style, label));

        if let Some(caller) = &record.caller {
            line.push(' ');
            line.push_str(&self.paint(Style::new().bold(), caller));
            line.push(' ');
            line.push_str(&self.paint(Color::Cyan.normal(), ">"));
        }

        if let Some(message) = record.message.as_deref().filter(|m| !m.is_empty()) {
            line.push(' ');
            if record.is_error() {
                line.push_str(&self.paint(Color::Red.normal(), message));
            } else {
                line.push_str(message);
            }
        }

        let mut blocks: Vec<(&str, Value)> = Vec::new();
        for (key, value) in &record.fields {
            if self.marshal_indent && is_nested(value) {
                blocks.push((key.as_str(), value.clone()));
                continue;
            }
            line.push(' ');
            line.push_str(&self.paint(Color::Cyan.normal(), &format!("{key}=")));
            line.push_str(&self.format_value(value));
        }

        if let Some(stack) = &record.stack {
            let value = serde_json::to_value(stack)?;
            if self.marshal_indent {
                blocks.push((STACK_FIELD, value));
            } else {
                line.push(' ');
                line.push_str(&self.paint(Color::Cyan.normal(), &format!("{STACK_FIELD}=")));
                line.push_str(&value.to_string());
            }
        }

        for (key, value) in &blocks {
            self.push_block(&mut line, key, value)?;
        }

        line.push('\n');
        buf.write_all(line.as_bytes())?;
        Ok(())
    }
}

fn is_nested(value: &Value) -> bool {
    matches!(value, Value::Object(_) | Value::Array(_))
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '"' || c == '=' || c.is_control())
}
