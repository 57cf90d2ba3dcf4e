//! Credential repository for database operations.
//!
//! Implements the gateway's `CredentialDirectory` using `SeaORM`.

use std::sync::Arc;

use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tracing::warn;

use crate::entities::credentials;
use shardbox_core::gateway::{CredentialDirectory, GatewayError};
use shardbox_core::pool::Credential;
use shardbox_shared::types::{CredentialId, OwnerId};

/// Credential repository implementation.
#[derive(Debug, Clone)]
pub struct CredentialRepository {
    db: Arc<DatabaseConnection>,
}

impl CredentialRepository {
    /// Create a new credential repository.
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl CredentialDirectory for CredentialRepository {
    async fn owner_credentials(&self, owner_id: OwnerId) -> Result<Vec<Credential>, GatewayError> {
        let models = credentials::Entity::find()
            .filter(credentials::Column::OwnerId.eq(owner_id.into_inner()))
            .filter(credentials::Column::Enabled.eq(true))
            .all(self.db.as_ref())
            .await
            .map_err(|e| GatewayError::Directory(e.to_string()))?;

        Ok(models.iter().filter_map(to_domain).collect())
    }

    async fn author(&self, id: CredentialId) -> Result<Option<Credential>, GatewayError> {
        let model = credentials::Entity::find_by_id(id.into_inner())
            .one(self.db.as_ref())
            .await
            .map_err(|e| GatewayError::Directory(e.to_string()))?;

        Ok(model.as_ref().and_then(to_domain))
    }
}

/// Convert database model to domain credential.
///
/// Rows with an unknown kind or missing secret material are dropped with a
/// warning rather than failing the whole lookup.
fn to_domain(model: &credentials::Model) -> Option<Credential> {
    let id = CredentialId::from_uuid(model.id);
    match (model.kind.as_str(), &model.token, &model.url) {
        ("bot", Some(token), _) => Some(Credential::Bot {
            id,
            token: token.clone(),
        }),
        ("webhook", _, Some(url)) => Some(Credential::Webhook {
            id,
            url: url.clone(),
        }),
        _ => {
            warn!(credential_id = %id, kind = %model.kind, "malformed credential row");
            None
        }
    }
}
