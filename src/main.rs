use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use docbase_api::config::{self, StoreBackend};
use docbase_api::{app, is_production, AppState};

#[derive(Parser, Debug)]
#[command(name = "docbase-api", version, about = "Schema-governed multi-tenant document API")]
struct Args {
    /// Port to listen on (defaults to PORT or 3000)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Store backend: postgres or memory
    #[arg(long, value_parser = parse_backend)]
    backend: Option<StoreBackend>,
}

fn parse_backend(raw: &str) -> Result<StoreBackend, String> {
    raw.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = config::config().clone();
    if let Some(backend) = args.backend {
        config.database.backend = backend;
    }
    if is_production!() && config.database.backend == StoreBackend::Memory {
        tracing::warn!("Running the in-memory store in production; data will not survive restarts");
    }
    info!("Starting Docbase API in {:?} mode", config.environment);

    let state = AppState::from_config(&config).await?;
    let registry = state.registry.clone();
    let router = app(state, &config);

    let port = args.port.unwrap_or(3000);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Docbase API listening on http://{}", bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.close_all().await;
    info!("Tenant connections closed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
