use crate::console::{ColorChoice, ConsoleEncoder, Target, DEFAULT_TIME_FORMAT};
use crate::env::{
    env_opt, LOGUTIL_COLOR_ENV, LOGUTIL_CONSOLE_ENV, LOGUTIL_LEVEL_ENV,
    LOGUTIL_TIME_FORMAT_ENV, NO_COLOR_ENV,
};
use crate::json::JsonEncoder;
use crate::layer::RecordLayer;
use crate::sink::{LogSink, SinkError, WriterSink};
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Error returned when a configuration value cannot be parsed.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid log level: {0:?}")]
    InvalidLevel(String),

    #[error("invalid color mode: {0:?} (expected auto, always or never)")]
    InvalidColor(String),

    #[error("invalid boolean for {key}: {value:?}")]
    InvalidBool { key: &'static str, value: String },
}

/// Error returned by [`Logger::init`].
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("a global tracing subscriber is already installed")]
    AlreadySet(#[from] tracing::subscriber::SetGlobalDefaultError),
}

impl FromStr for ColorChoice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ColorChoice::Auto),
            "always" | "on" => Ok(ColorChoice::Always),
            "never" | "off" => Ok(ColorChoice::Never),
            _ => Err(ConfigError::InvalidColor(s.to_string())),
        }
    }
}

/// Parse a level name (`trace` .. `error`, or `off`).
pub fn parse_level(s: &str) -> Result<LevelFilter, ConfigError> {
    LevelFilter::from_str(s.trim()).map_err(|_| ConfigError::InvalidLevel(s.to_string()))
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            key,
            value: value.to_string(),
        }),
    }
}

/// Logger configuration.
///
/// **Fields**
/// - `console`: human-readable console output on `console_target` at
///   `DEBUG`; when `false`, JSON with caller annotation on stderr at `INFO`.
/// - `level`: overrides the preset level of either mode.
/// - `color`: color mode of the console encoder.
/// - `no_color`: global color-disable switch, wins over `color`.
/// - `time_format`: strftime layout of console timestamps.
/// - `marshal_indent`: render nested console fields as indented blocks.
/// - `console_target`: stream the console encoder writes to.
#[derive(Clone, Debug)]
pub struct LoggerConfig {
    pub console: bool,
    pub level: Option<LevelFilter>,
    pub color: ColorChoice,
    pub no_color: bool,
    pub time_format: String,
    pub marshal_indent: bool,
    pub console_target: Target,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            console: false,
            level: None,
            color: ColorChoice::Auto,
            no_color: false,
            time_format: DEFAULT_TIME_FORMAT.to_string(),
            marshal_indent: true,
            console_target: Target::Stdout,
        }
    }
}

impl LoggerConfig {
    /// Defaults overridden by the variables listed in [`crate::env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(env_opt)
    }

    /// Like [`LoggerConfig::from_env`], reading values through `lookup`.
    /// `lookup` returns `None` for unset or empty variables.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(v) = lookup(LOGUTIL_CONSOLE_ENV) {
            config.console = parse_bool(LOGUTIL_CONSOLE_ENV, &v)?;
        }
        if let Some(v) = lookup(LOGUTIL_LEVEL_ENV) {
            config.level = Some(parse_level(&v)?);
        }
        if let Some(v) = lookup(LOGUTIL_COLOR_ENV) {
            config.color = v.parse()?;
        }
        config.no_color = lookup(NO_COLOR_ENV).is_some();
        if let Some(v) = lookup(LOGUTIL_TIME_FORMAT_ENV) {
            config.time_format = v;
        }
        Ok(config)
    }

    /// Level in effect: the override, or the preset of the selected mode.
    pub fn effective_level(&self) -> LevelFilter {
        self.level.unwrap_or(if self.console {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        })
    }

    pub fn effective_color(&self) -> ColorChoice {
        if self.no_color {
            ColorChoice::Never
        } else {
            self.color
        }
    }

    pub fn console_encoder(&self) -> ConsoleEncoder {
        ConsoleEncoder::new(self.console_target, self.effective_color())
            .time_format(self.time_format.clone())
            .marshal_indent(self.marshal_indent)
    }
}

/// Builds a [`Logger`] from a [`LoggerConfig`] plus extra sinks.
pub struct LoggerBuilder {
    config: LoggerConfig,
    console_writer: Option<Box<dyn Write + Send>>,
    file_only: Option<Box<dyn Write + Send>>,
    extra: Vec<Arc<dyn LogSink>>,
}

impl LoggerBuilder {
    pub fn new(config: LoggerConfig) -> Self {
        LoggerBuilder {
            config,
            console_writer: None,
            file_only: None,
            extra: Vec::new(),
        }
    }

    pub fn config(mut self, config: LoggerConfig) -> Self {
        self.config = config;
        self
    }

    /// Send primary output to `w` instead of stdout/stderr.
    pub fn console_writer<W>(mut self, w: W) -> Self
    where
        W: Write + Send + 'static,
    {
        self.console_writer = Some(Box::new(w));
        self
    }

    /// Extra JSON output, e.g. an open file. Receives every record.
    pub fn writer<W>(self, w: W) -> Self
    where
        W: Write + Send + 'static,
    {
        self.boxed_writer(Box::new(w))
    }

    pub fn boxed_writer(mut self, w: Box<dyn Write + Send>) -> Self {
        self.extra
            .push(Arc::new(WriterSink::from_boxed(JsonEncoder::default(), w)));
        self
    }

    /// Send everything to `file` as JSON without caller and nothing else:
    /// no primary sink is built and extra sinks are ignored. The level is
    /// `INFO` unless the config overrides it.
    pub fn file_only<W>(mut self, file: W) -> Self
    where
        W: Write + Send + 'static,
    {
        self.file_only = Some(Box::new(file));
        self
    }

    /// Extra sink of any kind. Receives every record.
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.extra.push(sink);
        self
    }

    pub fn build(self) -> Logger {
        let LoggerBuilder {
            config,
            console_writer,
            file_only,
            extra,
        } = self;

        if let Some(file) = file_only {
            let sink: Arc<dyn LogSink> = Arc::new(WriterSink::from_boxed(
                JsonEncoder::default().with_caller(false),
                file,
            ));
            return Logger {
                layer: RecordLayer::new(vec![sink]),
                level: config.level.unwrap_or(LevelFilter::INFO),
            };
        }

        let primary: Arc<dyn LogSink> = if config.console {
            let out = console_writer.unwrap_or_else(|| config.console_target.writer());
            Arc::new(WriterSink::from_boxed(config.console_encoder(), out))
        } else {
            let out = console_writer.unwrap_or_else(|| Target::Stderr.writer());
            Arc::new(WriterSink::from_boxed(JsonEncoder::default(), out))
        };

        let mut sinks = Vec::with_capacity(extra.len() + 1);
        sinks.push(primary);
        sinks.extend(extra);

        Logger {
            layer: RecordLayer::new(sinks),
            level: config.effective_level(),
        }
    }
}

/// A configured logging pipeline: a level filter and the sinks behind it.
///
/// Nothing is global until [`Logger::init`] is called; tests and libraries
/// can scope a logger with `tracing::subscriber::with_default(logger.subscriber(), ..)`.
/// Clones share sinks and counters, so keep a clone to flush after `init`.
#[derive(Clone)]
pub struct Logger {
    layer: RecordLayer,
    level: LevelFilter,
}

impl Logger {
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::new(LoggerConfig::default())
    }

    /// Console encoder at `DEBUG` when `use_console`, otherwise JSON with
    /// caller on stderr at `INFO`. Each writer in `extra` additionally gets
    /// every record as JSON.
    ///
    /// ```no_run
    /// let file = std::fs::File::create("app.log")?;
    /// tracing_logutil::Logger::configure(true, vec![Box::new(file)]).init()?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn configure(use_console: bool, extra: Vec<Box<dyn Write + Send>>) -> Logger {
        let config = LoggerConfig {
            console: use_console,
            ..LoggerConfig::default()
        };
        extra
            .into_iter()
            .fold(LoggerBuilder::new(config), LoggerBuilder::boxed_writer)
            .build()
    }

    /// All output goes to `file` as JSON at `INFO`; no console sink exists.
    pub fn to_file<W>(file: W) -> Logger
    where
        W: Write + Send + 'static,
    {
        Logger::builder().file_only(file).build()
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    pub fn layer(&self) -> &RecordLayer {
        &self.layer
    }

    pub fn sinks(&self) -> &[Arc<dyn LogSink>] {
        self.layer.sinks()
    }

    /// Registry with this logger's level filter and record layer.
    pub fn subscriber(&self) -> impl Subscriber + Send + Sync + 'static {
        Registry::default()
            .with(self.level)
            .with(self.layer.clone())
    }

    /// Install as the process-wide default subscriber.
    ///
    /// **Returns**
    /// - `Err(InitError::AlreadySet)` if another subscriber was installed
    ///   first; the existing one stays in place.
    pub fn init(self) -> Result<(), InitError> {
        tracing::subscriber::set_global_default(self.subscriber())?;
        Ok(())
    }

    /// Flush every sink, returning the first failure.
    pub fn flush(&self) -> Result<(), SinkError> {
        let mut first = None;
        for sink in self.sinks() {
            if let Err(e) = sink.flush() {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
