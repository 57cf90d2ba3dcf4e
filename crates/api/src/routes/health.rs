//! Liveness endpoint.

use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::AppState;

/// Liveness payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Always `healthy`; the process answered, that is the whole check.
    pub status: &'static str,
    /// Crate version serving the request.
    pub version: &'static str,
}

/// Report the process as alive. Deliberately checks nothing downstream;
/// database and platform failures surface on the file routes that hit them.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Creates the liveness route.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
