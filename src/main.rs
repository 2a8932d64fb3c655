//! MCE Server - Motor Control Enterprise central server
//!
//! Main entry point.

use mce_server::{
    broker::BrokerClient,
    edge_service::CameraEdgeService,
    message_router::MessageRouter,
    repository::{MySqlDataAccess, RecorderDefaults},
    state::{AppConfig, AppState},
    storage_cleaner::StorageCleanerService,
    stream_recorder::{FfmpegLauncher, RecorderConfig, StreamRecorderService},
    web_api,
};
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Subscriptions covering every inbound topic family the router handles
const SUBSCRIPTION_PATTERNS: &[&str] = &[
    "response/+/+",
    "gateway/+/heartbeat",
    "camera/+/+/status",
    "camera/+/+/register",
    "motor/+/telemetry",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mce_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting MCE Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        mqtt_host = %config.mqtt_host,
        mqtt_port = config.mqtt_port,
        nas_recordings_path = %config.nas_recordings_path.display(),
        retention_days = config.retention_days,
        "Configuration loaded"
    );

    // Create database pool
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;

    tracing::info!("Database connected");

    // Initialize components
    let data = Arc::new(MySqlDataAccess::new(
        pool.clone(),
        RecorderDefaults {
            source_address: config.mediamtx_address.clone(),
            storage_root: config.nas_recordings_path.clone(),
        },
    ));

    let broker = Arc::new(BrokerClient::new(&config));
    let edge = Arc::new(CameraEdgeService::new(broker.clone()));
    let router = Arc::new(MessageRouter::new(edge.clone(), data.clone()));

    for pattern in SUBSCRIPTION_PATTERNS {
        broker.subscribe(pattern).await;
    }
    broker.start(router);
    tracing::info!("BrokerClient started");

    let launcher = Arc::new(FfmpegLauncher {
        segment_seconds: config.segment_seconds,
        rtsp_user: config.mediamtx_user.clone(),
        rtsp_pass: config.mediamtx_password.clone(),
    });
    let recorder = Arc::new(StreamRecorderService::new(
        data.clone(),
        launcher,
        RecorderConfig {
            refresh_interval: Duration::from_secs(config.recorder_refresh_seconds),
            ..RecorderConfig::default()
        },
    ));
    recorder.start().await;
    tracing::info!("StreamRecorderService started");

    let cleaner = Arc::new(StorageCleanerService::new(
        config.nas_recordings_path.clone(),
        config.retention_days,
    ));
    cleaner.start().await;
    tracing::info!("StorageCleanerService started");

    // Create application state
    let state = AppState {
        pool,
        config,
        broker,
        edge,
        recorder: recorder.clone(),
    };

    let app = web_api::create_router(state.clone())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // レコーダープロセスをサーバーより長生きさせない
    recorder.shutdown().await;
    cleaner.stop().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install shutdown signal handler");
    }
    tracing::info!("Shutdown signal received");
}
