//! Environment variable names read by [`LoggerConfig::from_env`](crate::init::LoggerConfig::from_env).
//!
//! These are purely helpers; the encoders and sinks never read the
//! environment themselves.

/// Console-writer toggle: `1`/`true` for console output, `0`/`false` for JSON.
pub const LOGUTIL_CONSOLE_ENV: &str = "LOGUTIL_CONSOLE";

/// Level override: `trace`, `debug`, `info`, `warn`, `error` or `off`.
pub const LOGUTIL_LEVEL_ENV: &str = "LOGUTIL_LEVEL";

/// Console color mode: `auto`, `always` or `never`.
pub const LOGUTIL_COLOR_ENV: &str = "LOGUTIL_COLOR";

/// Any non-empty value disables color, whatever `LOGUTIL_COLOR` says.
pub const NO_COLOR_ENV: &str = "NO_COLOR";

/// strftime layout for console timestamps.
pub const LOGUTIL_TIME_FORMAT_ENV: &str = "LOGUTIL_TIME_FORMAT";

/// Read an environment variable, treating unset and empty the same.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
