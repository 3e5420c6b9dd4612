//! Edgecam - Adaptive Visual Edge Node
//!
//! Main entry point for the edge node application.

use edgecam::{
    adaptive_controller::ControllerTuning,
    importance_scorer::SidecarScorer,
    pipeline::{Pipeline, PipelineSettings},
    state::{AppConfig, AppState},
    web_api,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgecam=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting edgecam v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        recordings_dir = %config.recordings_dir.display(),
        scorer_url = ?config.scorer_url,
        cameras = config.cameras.len(),
        cooldown_secs = config.cooldown.as_secs(),
        "Configuration loaded"
    );

    if config.cameras.is_empty() {
        anyhow::bail!("No cameras configured (set STREAM_URL or CAMERAS_JSON)");
    }

    let scorer = config
        .scorer_url
        .clone()
        .map(|url| Arc::new(SidecarScorer::new(url)));

    let settings = PipelineSettings {
        recordings_dir: config.recordings_dir.clone(),
        scorer: scorer.clone(),
        tuning: ControllerTuning {
            cooldown: config.cooldown,
            ..ControllerTuning::default()
        },
        reconnect_backoff: config.reconnect_backoff,
        score_interval: config.score_interval,
    };

    // Start one pipeline per camera. A camera whose stream cannot be opened
    // at all is a configuration error and stops startup.
    let mut pipelines = HashMap::new();
    for camera in &config.cameras {
        let pipeline = Pipeline::start(camera.clone(), settings.clone())
            .await
            .map_err(|e| {
                anyhow::anyhow!("camera {} failed to start: {}", camera.camera_id, e)
            })?;
        pipelines.insert(camera.camera_id.clone(), pipeline);
    }
    tracing::info!(count = pipelines.len(), "All pipelines running");

    // Create application state
    let state = AppState {
        config: config.clone(),
        pipelines: Arc::new(pipelines),
        scorer,
    };

    let app = web_api::create_router(state.clone())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain pipelines: flush open recordings, release decode handles
    tracing::info!("Shutting down pipelines");
    futures::future::join_all(
        state
            .pipelines
            .values()
            .map(|pipeline| pipeline.shutdown()),
    )
    .await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install shutdown handler");
    }
    tracing::info!("Shutdown requested");
}
