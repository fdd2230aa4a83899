//! Trading Dashboard API Server
//!
//! Serves chart candles from the IBKR bridge and pushes live bar updates
//! to chart clients over WebSocket.

mod config;
mod routes;

use axum::{
    http::{header, Method},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use terminal_core::HistorySource;
use terminal_ibkr::IbkrClient;
use terminal_services::{BarCache, LivePipeline, PipelineConfig, WebSocketState};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AppConfig;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub cache: BarCache,
    pub history: Arc<dyn HistorySource>,
    pub pipeline: Arc<LivePipeline>,
    pub ws_state: Arc<WebSocketState>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,terminal_api=debug")),
        )
        .init();

    info!("Starting Trading Dashboard API");

    let config = AppConfig::from_env()?;
    info!(
        "IBKR bridge: api={} ws={}",
        config.ibkr_api_url, config.ibkr_ws_url
    );
    match config.max_reconnect_window() {
        Some(window) if config.auto_reconnect => info!(
            "Feed reconnect: up to {} attempts over ~{}s",
            config.max_reconnect_attempts,
            window.as_secs()
        ),
        None if config.auto_reconnect => info!("Feed reconnect: unlimited attempts"),
        _ => info!("Feed reconnect disabled"),
    }

    let history: Arc<dyn HistorySource> = Arc::new(IbkrClient::new(config.ibkr_api_url.clone()));
    let cache = BarCache::new();

    // Start the live pipeline (connects to the bridge tick stream)
    let mut pipeline = LivePipeline::new(
        PipelineConfig {
            feed: config.feed_config(),
        },
        cache.clone(),
    );
    if let Err(e) = pipeline.start() {
        tracing::error!("Failed to start live pipeline: {}", e);
    } else {
        info!("Live pipeline started successfully");
    }

    // Create subscription event channel for pipeline integration
    let (subscription_tx, subscription_rx) = WebSocketState::create_subscription_event_channel();

    // Create WebSocket state fed by the pipeline
    let mut ws_state = WebSocketState::new(pipeline.bar_updates());
    ws_state.set_subscription_event_sender(subscription_tx);
    if let Some(feed_state) = pipeline.feed_state() {
        ws_state.set_feed_state(feed_state);
    }
    let ws_state = Arc::new(ws_state);

    // Spawn a task to process subscription events from chart clients
    let pipeline = Arc::new(pipeline);
    let pipeline_for_events = Arc::clone(&pipeline);
    tokio::spawn(async move {
        pipeline_for_events
            .process_subscription_events(subscription_rx)
            .await;
    });

    // Create app state
    let state = AppState {
        cache,
        history,
        pipeline: Arc::clone(&pipeline),
        ws_state,
    };

    // Configure CORS for frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    // Build router
    let app = Router::new()
        .nest("/api", routes::api_routes())
        .merge(routes::ws_routes())
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pipeline.shutdown().await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
