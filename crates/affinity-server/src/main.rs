mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use affinity_api::scheduler::{self, FavorScheduler};
use affinity_api::{AppState, AppStateInner, Orchestrator};
use affinity_db::Database;
use affinity_llm::OpenAiClient;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "affinity=debug,affinity_api=debug,affinity_db=debug,affinity_llm=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.llm.api_key.is_empty() {
        warn!("AFFINITY_LLM_API_KEY is unset; completion calls will be rejected by the provider");
    }

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    let provider = Arc::new(OpenAiClient::new(config.llm.clone())?);
    info!("Completion provider: {} ({})", config.llm.base_url, provider.model());

    let scheduler = Arc::new(FavorScheduler::new(config.schedule.clone()));
    tokio::spawn(scheduler::run_sweep_loop(scheduler.clone(), config.sweep_interval_secs));

    let orchestrator = Orchestrator::new(db.clone(), provider, scheduler.clone(), config.engine.clone());
    let state: AppState = Arc::new(AppStateInner {
        db,
        scheduler,
        orchestrator,
    });

    let app = affinity_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Affinity server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
