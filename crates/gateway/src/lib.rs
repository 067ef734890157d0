//! HTTP gateway for agentloop.
//!
//! Exposes the orchestrator under `/api/v1/agent` (see [`agent_api`]) and a
//! `GET /health` probe. Built on Axum.

pub mod agent_api;
pub mod error;

use agentloop_agent::Orchestrator;
use agentloop_config::GatewayConfig;
use agentloop_memory::TokenTextSplitter;
use axum::extract::DefaultBodyLimit;
use axum::{Router, http::Method, http::header, response::Json, routing::get};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub orchestrator: Orchestrator,
    pub splitter: TokenTextSplitter,
}

pub type SharedState = Arc<GatewayState>;

/// Build the router with all gateway routes.
///
/// Layers applied:
/// - Request body limit of `config.max_upload_bytes`
/// - CORS open to any origin for GET/POST
/// - HTTP trace logging
pub fn build_router(state: SharedState, config: &GatewayConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api/v1/agent", agent_api::agent_router(state))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Bind `config.host:config.port` and serve until the process stops.
pub async fn start(config: &GatewayConfig, state: SharedState) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(state, config);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app).await
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
