mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use playtogether_core::{logging, Config};

use server::PlayTogetherServer;

/// Session relay for one broadcaster and many watchers
#[derive(Debug, Parser)]
#[command(name = "playtogether", version, about)]
struct Cli {
    /// Path to a YAML or TOML configuration file
    #[arg(short, long, env = "PLAYTOGETHER_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = Config::load(cli.config.as_deref())?;

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("PlayTogether relay starting...");
    info!("HTTP address: {}", config.http_address());
    if config.auth.credential().is_none() {
        info!("No admin credential configured, broadcaster endpoint is open");
    }

    // 4. Run until shutdown
    PlayTogetherServer::new(config).start().await
}
