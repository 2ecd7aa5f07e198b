use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use watchflow::ServiceContainer;
use watchflow::config::AppConfig;
use watchflow::logging::{self, LogFormat};

/// Watch a source and run new items through the configured pipeline.
#[derive(Debug, Parser)]
#[command(name = "watchflow", version, about)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, env = "WATCHFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Console log format: text or json.
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Directory for rolling log files.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let (mut config, overrides) = AppConfig::load(cli.config.as_deref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    if cli.log_dir.is_some() {
        config.logging.dir = cli.log_dir;
    }

    let _guard = logging::init_logging(&config.logging)?;
    info!("watchflow {} starting", env!("CARGO_PKG_VERSION"));
    match &cli.config {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("No configuration file given, using defaults"),
    }
    for (key, value) in &overrides {
        info!("Configuration override from {}: {}", key, value);
    }

    let services = ServiceContainer::new(config).await?;
    services.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    if let Err(e) = services.shutdown().await {
        error!("Shutdown completed with errors: {}", e);
        return Err(e.into());
    }

    info!("watchflow stopped");
    Ok(())
}
