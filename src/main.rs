use anyhow::Result;
use clap::Parser;
use reflectt_core::{api, config::Config, services::Services};
use std::sync::Arc;
use tracing::{info, Level};

/// Startup overrides; every other setting comes from the environment
/// (spec §6.3) via `Config::load()`.
#[derive(Parser, Debug)]
#[command(name = "reflectt-core")]
struct Cli {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("starting reflectt-core");

    let cli = Cli::parse();
    let mut config = Config::load();
    if let Some(host) = cli.host {
        config.api.host = host;
    }
    if let Some(port) = cli.port {
        config.api.port = port;
    }
    let addr = format!("{}:{}", config.api.host, config.api.port);

    let services = Arc::new(Services::build(config).await);
    let scheduler = services.scheduler.clone();
    let app = api::router(services);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!("API server failed: {e}");
            }
        }
        _ = scheduler.run() => {}
    }

    Ok(())
}