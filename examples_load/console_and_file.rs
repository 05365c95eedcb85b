use std::fs::OpenOptions;

use tracing::{debug, info};
use tracing_logutil::{report, Logger, ResultExt};

fn read_settings(path: &str) -> Result<String, tracing_logutil::StackError> {
    std::fs::read_to_string(path).wrap_err(format!("reading {path}"))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open("console_and_file.log")?;

    // Human-readable lines on stdout, JSON lines in the file.
    let logger = Logger::configure(true, vec![Box::new(file)]);
    logger.clone().init()?;

    info!(version = env!("CARGO_PKG_VERSION"), "starting");
    debug!(settings = r#"{"workers":4,"queue":"jobs"}"#, "loaded defaults");

    if let Err(err) = read_settings("/definitely/missing.toml") {
        report(&err);
    }

    logger.flush()?;
    Ok(())
}
