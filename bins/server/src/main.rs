//! Shardbox API Server
//!
//! Main entry point for the attachment-backed file storage service.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shardbox_api::{AppState, create_router};
use shardbox_core::gateway::AttachmentGateway;
use shardbox_core::pool::CredentialPool;
use shardbox_db::{CredentialRepository, StorageRepository, connect};
use shardbox_shared::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shardbox=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = AppConfig::load().expect("Failed to load configuration");

    // Connect to database
    let db = Arc::new(connect(&config.database.url).await?);
    info!("Connected to database");

    // Credential pool and the platform gateway
    let pool = Arc::new(CredentialPool::new(config.pool.clone()));
    let credentials = Arc::new(CredentialRepository::new(db.clone()));
    let gateway = Arc::new(AttachmentGateway::new(
        config.platform.clone(),
        pool.clone(),
        credentials.clone(),
    )?);
    info!(
        base_url = %config.platform.base_url,
        max_slots = config.pool.max_slots_per_credential,
        "Attachment gateway configured"
    );

    // Create application state
    let state = AppState {
        db: db.clone(),
        storage: Arc::new(StorageRepository::new(db)),
        credentials,
        pool,
        gateway,
        config: Arc::new(config.clone()),
    };

    // Create router
    let app = create_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
