//! Usher bot - Main entry point.

use anyhow::Result;
use usher_common::config::Config;
use usher_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load_with_env()?;

    // Initialize logging
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Usher Bot v{}", env!("CARGO_PKG_VERSION"));

    // Run the bot
    usher_bot::start_bot(&config).await
}
