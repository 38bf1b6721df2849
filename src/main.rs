use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile::config::Config;
use turnstile::config_validator::ConfigValidator;
use turnstile::server::Server;

#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about = "Rate-limited todo API")]
struct Cli {
    /// JSON configuration file; environment variables are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?,
    };
    if let Some(bind) = cli.bind {
        config.server.bind_addr = bind;
    }
    ConfigValidator::validate(&config)?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("turnstile={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting turnstile service");
    tracing::info!(
        bind_addr = %config.server.bind_addr,
        backend = ?config.rate_limit.backend,
        redis_url = %config.redis.redacted_url(),
        limit = config.rate_limit.limit,
        window = ?config.rate_limit.window,
        "Configuration loaded"
    );

    let server = Server::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
