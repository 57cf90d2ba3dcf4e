//! HTTP streaming surface with Axum routes.
//!
//! This crate provides:
//! - Upload, streaming, and deletion routes for stored files
//! - The byte-range response wiring over the core streaming reader
//! - The `AppError` to HTTP response mapping

pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use sea_orm::DatabaseConnection;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use shardbox_core::gateway::AttachmentGateway;
use shardbox_core::pool::CredentialPool;
use shardbox_db::{CredentialRepository, StorageRepository};
use shardbox_shared::AppConfig;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: Arc<DatabaseConnection>,
    /// File and fragment rows.
    pub storage: Arc<StorageRepository>,
    /// Credential rows, also the gateway's directory.
    pub credentials: Arc<CredentialRepository>,
    /// Per-owner credential leasing.
    pub pool: Arc<CredentialPool>,
    /// The platform gateway; sole owner of outbound HTTP.
    pub gateway: Arc<AttachmentGateway<CredentialRepository>>,
    /// Loaded configuration.
    pub config: Arc<AppConfig>,
}

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
