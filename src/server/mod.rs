pub mod api;
pub mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::get,
};
use tower_http::cors::{Any, CorsLayer};

use crate::config::ServerSection;
use crate::orchestrator::Orchestrator;
use api::{AppState, SharedState};

/// Origins allowed when the server is not in permissive mode.
const LOCAL_ORIGINS: &[&str] = &[
    "http://localhost",
    "http://127.0.0.1",
    "http://localhost:3000",
    "http://127.0.0.1:3000",
    "http://localhost:5173",
    "http://127.0.0.1:5173",
];

fn cors_layer(permissive: bool) -> CorsLayer {
    if permissive {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = LOCAL_ORIGINS
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

/// Build the full router: REST API plus the streaming WebSocket route.
pub fn build_router(state: SharedState, cors_permissive: bool) -> Router {
    api::api_router()
        .route("/ws/sessions", get(ws::ws_handler))
        .with_state(state)
        .layer(cors_layer(cors_permissive))
}

/// Serve until Ctrl+C, then cancel whatever is still running.
pub async fn start_server(config: &ServerSection, orchestrator: Arc<Orchestrator>) -> Result<()> {
    let state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
    });
    let app = build_router(state, config.cors_permissive);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, cors_permissive = config.cors_permissive, "Server listening");
    println!("Refinery API running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(orchestrator))
        .await
        .context("Server error")?;

    tracing::info!("Server shut down");
    Ok(())
}

async fn shutdown_signal(orchestrator: Arc<Orchestrator>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    let registry = orchestrator.registry();
    let interrupted = registry.active_ids();
    registry.cancel_all();
    tracing::info!(active = interrupted.len(), sessions = ?interrupted, "Shutting down");
}
