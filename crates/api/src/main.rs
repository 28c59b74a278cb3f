use anyhow::Context;

use fmshop_api::app::{self, state::AppState};
use fmshop_api::config::ApiConfig;
use fmshop_infra::settlement::AbandonmentSweeper;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    fmshop_observability::init();

    let config = ApiConfig::from_env()?;
    let state = AppState::from_config(&config).await?;

    let sweeper = AbandonmentSweeper::spawn(
        state.coordinator.clone(),
        config.settlement.sweep_interval,
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let router = app::build_app(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    sweeper.shutdown().await;
    Ok(())
}
