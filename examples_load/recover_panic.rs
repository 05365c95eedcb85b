use tracing::info;
use tracing_logutil::{recover, recover_future, Logger, LoggerConfig};

fn parse_port(raw: &str) -> u16 {
    raw.parse().unwrap()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LoggerConfig::from_env()?;
    Logger::builder().config(config).build().init()?;

    let port = recover(|| parse_port("eighty")).unwrap_or(8080);
    info!(port, "listening");

    let res = recover_future(async {
        let parts: Vec<&str> = "a,b".split(',').collect();
        parts[5].len()
    })
    .await;
    info!(recovered = res.is_err(), "worker finished");

    Ok(())
}
