//! Sahab node entry point

use clap::Parser;
use sahab_api::ApiServer;
use sahab_core::config::SahabConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sahab-node", about = "Sahab cluster control plane node", version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "SAHAB_CONFIG")]
    config: Option<String>,

    /// Override the bind address
    #[arg(long)]
    bind: Option<String>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

fn init_tracing(config: &SahabConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SahabConfig::from_file(path)?,
        None => SahabConfig::default(),
    }
    .apply_env();

    if let Some(bind) = args.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    init_tracing(&config);
    info!(version = sahab_core::VERSION, "Starting Sahab node");

    ApiServer::new(config).run().await?;
    Ok(())
}
