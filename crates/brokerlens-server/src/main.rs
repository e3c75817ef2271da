use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use brokerlens_core::config::Config;
use brokerlens_server::{app::build_app, scheduler::run_scheduler_loop, state::AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Structured JSON logging. Level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("brokerlens=info".parse()?),
        )
        .json()
        .init();

    let cfg = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let state = Arc::new(AppState::new(cfg.clone()));

    // Queue draining, session expiry and the periodic analytics jobs.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            run_scheduler_loop(state).await;
        });
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = build_app(Arc::clone(&state));

    info!(
        port = cfg.port,
        cache_max_entries = cfg.cache_max_entries,
        "BrokerLens listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
        })
        .await?;

    let active = state.services.tracker.active_session_count().await;
    info!(active_sessions = active, "BrokerLens stopped");
    Ok(())
}
