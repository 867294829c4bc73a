//! Axum HTTP server exposing the agent loop over server-sent events.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod heartbeat;
pub mod routes;
pub mod sse;
pub mod state;

pub use state::AppState;

/// Start the server on the given port, serving until ctrl-c.
pub async fn start_server(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state
        .config
        .server
        .as_ref()
        .and_then(|s| s.bind.clone())
        .unwrap_or_else(|| "0.0.0.0".to_string());

    let app = router(state);

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("QueryPilot server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Build the router: the streaming endpoint, a health probe, CORS, and
/// request tracing.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state);

    Router::new()
        .route("/v1/stream", post(routes::stream_handler))
        .route("/health", get(routes::health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(state: &Arc<AppState>) -> CorsLayer {
    let origins = state
        .config
        .server
        .as_ref()
        .map(|s| s.cors_origins.clone())
        .unwrap_or_default();

    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let parsed: Vec<axum::http::HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(origin = %o, %e, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
