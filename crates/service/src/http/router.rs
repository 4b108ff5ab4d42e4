//! Axum router composition for the scepd HTTP layer.
//!
//! Routes:
//! GET|POST / — SCEP endpoint
//! GET|POST /scep — SCEP endpoint (alias)
//! GET|POST /cgi-bin/pkiclient.exe — SCEP endpoint (alias, the historical OpenSCEP path)
//! GET /healthz — health check
//!
//! All three SCEP paths are equivalent; the `operation` query parameter (and, for `PKIOperation`,
//! the request body or `message` query parameter) is what actually selects behavior.

use axum::{
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use super::{handlers::scep_handler, state::AppState};

async fn health_handler() -> &'static str {
    "OK"
}

/// Builds the base router shared across every deployment shape; a single source of truth for
/// the route set.
pub fn build_base_router() -> Router<AppState> {
    Router::new()
        .route("/", get(scep_handler).post(scep_handler))
        .route("/scep", get(scep_handler).post(scep_handler))
        .route(
            "/cgi-bin/pkiclient.exe",
            get(scep_handler).post(scep_handler),
        )
        .route("/healthz", get(health_handler))
}

/// Composes the full router with CORS and tracing layers.
pub fn create_router(state: AppState) -> Router {
    build_base_router()
        .with_state(state)
        .layer(CorsLayer::new())
        .layer(TraceLayer::new_for_http())
}
