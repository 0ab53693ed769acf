//! HTTP application for claude-proxy
//!
//! Merges the proxy router with root-level probes, CORS and request tracing.
//!
//! ## Endpoint Map
//!
//! | Path                               | Description                      |
//! |------------------------------------|----------------------------------|
//! | `/health`                          | Liveness probe                   |
//! | `/api/claude-proxy/status`         | Configuration + CLI availability |
//! | `/api/claude-proxy/sessions`       | Active session ids               |
//! | `/api/claude-proxy/sessions/:id`   | Session state, abort (DELETE)    |
//! | `/ws/claude-proxy`                 | Command WebSocket                |

use crate::agent::{proxy_router, AgentState};
use axum::{
    http::{header, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the complete HTTP application
pub fn build_app(agent_state: AgentState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(proxy_router(agent_state))
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// CORS
// =============================================================================

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(parsed)
    }
}
