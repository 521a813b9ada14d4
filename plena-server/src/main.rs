//! Vida Plena server - main entry point.

use anyhow::Result;
use plena_common::logging::init_logging;
use plena_common::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Missing required configuration is fatal before anything starts.
    let config = Config::from_env()?;

    init_logging(&config.log_level, &config.log_format);

    tracing::info!("Vida Plena server v{}", env!("CARGO_PKG_VERSION"));

    plena_server::start_server(&config).await
}
