use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use zapgate::ai::OpenAiClient;
use zapgate::dispatch::webhook::{build_router, AppState};
use zapgate::dispatch::Dispatcher;
use zapgate::flows::engine::FlowEngine;
use zapgate::gateway::EvolutionGateway;
use zapgate::store::Store;

#[derive(Parser)]
#[command(name = "zapgate", about = "WhatsApp flow-automation daemon")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, default_value = "zapgate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = zapgate::config::load(&args.config)?;

    let store = Arc::new(Store::open(&config.server.db_path)?);
    tracing::info!(db = %store.db_path().display(), "store opened");

    let gateway = Arc::new(EvolutionGateway::new(
        config.gateway.base_url.clone(),
        config.gateway.api_key.clone(),
    ));
    let ai = Arc::new(OpenAiClient::new(config.ai.base_url.clone()));

    let engine = Arc::new(FlowEngine::new(store.clone(), gateway.clone(), ai));
    let dispatcher = Arc::new(Dispatcher::new(store, gateway, engine));

    let app = build_router(AppState {
        dispatcher,
        webhook_token: config.server.webhook_token.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "webhook server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}
