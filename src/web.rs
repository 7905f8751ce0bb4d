#![cfg(not(tarpaulin_include))]

use datavisor::app;
use datavisor::config::AppConfig;

/// Main entry point for the web server
///
/// Reads its settings from the environment (see [`AppConfig::from_env`]) and
/// logs through `env_logger`, at `info` unless `RUST_LOG` says otherwise.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_env();
    log::info!(
        "Starting server with database directory {}",
        config.database_dir.display()
    );

    app::run(config).await
}
