use anyhow::Context;
use clap::Parser;
use reino::cli::{self, Cli};
use reino::config::AppConfig;
use tracing::debug;

mod main_runtime;

use main_runtime::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config))?;
    let _log_guard = init_logging(&config.logging, cli.log_json);
    debug!(config_dir = %cli.config, "configuration loaded");

    cli::run(&cli, config).await
}
