//! DLHA inference server - Main Entry Point

use dlha::api::{self, AppState};
use dlha::{ArbitrationRouter, DetectorConfig, InferenceEngine, LiveStatus};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("DLHA server v{}", env!("CARGO_PKG_VERSION"));

    let config = DetectorConfig::from_env()?;
    let engine = InferenceEngine::new(ArbitrationRouter::from_config(&config.pipeline));

    // Serve degraded until a bundle is reloaded
    if let Err(e) = engine.reload(&config.server.bundle_path) {
        tracing::warn!(
            "No model bundle at {} ({}), serving without a model",
            config.server.bundle_path.display(),
            e
        );
    }

    let state = AppState {
        engine: Arc::new(engine),
        status: Arc::new(LiveStatus::new()),
        bundle_path: config.server.bundle_path.clone(),
    };
    api::serve(state, &config.server.listen_addr).await?;

    Ok(())
}
