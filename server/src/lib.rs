//! HTTP surface for the tool-calling loop.
//!
//! Every accepted request runs one loop on its own task and streams the
//! events back as Server-Sent Events.

pub mod api;

use anyhow::Context;
use axum::Router;
use axum::http::HeaderName;
use axum::routing::get;
use cirrus_core::{Config, LoopController, ServerConfig, build_controller};
use std::sync::Arc;
use tracing::info;

pub struct AppState {
    pub controller: Arc<LoopController>,
    pub auth_header: HeaderName,
    pub channel_capacity: usize,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(controller: LoopController, server: &ServerConfig) -> anyhow::Result<Self> {
        let auth_header = HeaderName::from_bytes(server.auth_header.to_lowercase().as_bytes())
            .with_context(|| format!("Invalid auth header name: {}", server.auth_header))?;

        Ok(Self {
            controller: Arc::new(controller),
            auth_header,
            channel_capacity: server.channel_capacity.max(1),
        })
    }
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(api::health_handler))
        .route(
            "/api/messages/stream",
            get(api::stream_query_handler).post(api::stream_json_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the HTTP server and run until Ctrl-C.
pub async fn start(config: Config) -> anyhow::Result<()> {
    let controller = build_controller(&config)?;
    let state = Arc::new(AppState::new(controller, &config.server)?);
    let addr = config.server.bind.clone();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!(
        addr = %addr,
        provider = state.controller.provider_name(),
        tools = state.controller.tools().len(),
        "cirrus server listening"
    );

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("Server error")?;

    Ok(())
}
