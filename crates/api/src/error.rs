//! Mapping from core error enums to HTTP responses.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use shardbox_core::catalog::CatalogError;
use shardbox_core::cipher::CipherError;
use shardbox_core::gateway::GatewayError;
use shardbox_core::gc::GcError;
use shardbox_core::pool::PoolError;
use shardbox_core::stream::StreamError;
use shardbox_core::upload::UploadError;
use shardbox_shared::AppError;

/// Handler-level error carrying its HTTP mapping.
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error": self.0.error_code(),
            "message": self.0.to_string(),
        }));

        let mut response = (status, body).into_response();
        if let AppError::RateLimited { retry_after_secs } = &self.0 {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        Self(e)
    }
}

impl From<PoolError> for ApiError {
    fn from(e: PoolError) -> Self {
        let app = match e {
            PoolError::CredentialExhausted(_) => AppError::ServiceBusy(e.to_string()),
            PoolError::OwnerBlocked {
                retry_after_secs, ..
            } => AppError::RateLimited { retry_after_secs },
            PoolError::UnknownOwner(_) => AppError::NotFound(e.to_string()),
        };
        Self(app)
    }
}

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Pool(pool) => pool.into(),
            GatewayError::RateLimited { retry_after_secs } => {
                Self(AppError::RateLimited { retry_after_secs })
            }
            GatewayError::AuthorizationRejected(_) | GatewayError::WebhookRevoked(_) => {
                Self(AppError::UpstreamAuth(e.to_string()))
            }
            GatewayError::PlacementNotFound(_) => Self(AppError::NotFound(e.to_string())),
            GatewayError::UnknownAuthor(_) | GatewayError::Directory(_) => {
                Self(AppError::Database(e.to_string()))
            }
            GatewayError::Http(_) | GatewayError::Platform { .. } => {
                Self(AppError::ExternalService(e.to_string()))
            }
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        let app = match &e {
            CatalogError::FileNotFound(_) | CatalogError::FragmentNotFound(_) => {
                AppError::NotFound(e.to_string())
            }
            CatalogError::DuplicateFragment { .. } => AppError::Conflict(e.to_string()),
            CatalogError::InvalidInput(_) => AppError::Validation(e.to_string()),
            CatalogError::CorruptLayout { .. } => AppError::Internal(e.to_string()),
            CatalogError::Repository(_) => AppError::Database(e.to_string()),
        };
        Self(app)
    }
}

impl From<CipherError> for ApiError {
    fn from(e: CipherError) -> Self {
        // Key material comes from our own rows, never the request.
        Self(AppError::Internal(e.to_string()))
    }
}

impl From<StreamError> for ApiError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::InvalidRange(_) => Self(AppError::Validation(e.to_string())),
            StreamError::Unsatisfiable { .. } => Self(AppError::RangeNotSatisfiable(e.to_string())),
            StreamError::Truncated { .. } => Self(AppError::ExternalService(e.to_string())),
            StreamError::Catalog(inner) => inner.into(),
            StreamError::Gateway(inner) => inner.into(),
            StreamError::Cipher(inner) => inner.into(),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::Invalid(_) => Self(AppError::Validation(e.to_string())),
            UploadError::Catalog(inner) => inner.into(),
            UploadError::Gateway(inner) => inner.into(),
            UploadError::Cipher(inner) => inner.into(),
        }
    }
}

impl From<GcError> for ApiError {
    fn from(e: GcError) -> Self {
        match e {
            GcError::Catalog(inner) => inner.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use shardbox_shared::types::{CredentialId, FileId, OwnerId};

    use super::*;

    #[test]
    fn test_pool_errors_map_to_busy_and_rate_limited() {
        let busy = ApiError::from(PoolError::CredentialExhausted(OwnerId::new()));
        assert_eq!(busy.0.status_code(), 503);

        let blocked = ApiError::from(PoolError::OwnerBlocked {
            owner_id: OwnerId::new(),
            retry_after_secs: 120,
        });
        assert_eq!(blocked.0.status_code(), 429);
    }

    #[test]
    fn test_rate_limited_response_carries_retry_after() {
        let response = ApiError(AppError::RateLimited {
            retry_after_secs: 42,
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER),
            Some(&HeaderValue::from_static("42"))
        );
    }

    #[test]
    fn test_stream_errors_map_through_nested_sources() {
        let invalid = ApiError::from(StreamError::InvalidRange("bytes=a-b".into()));
        assert_eq!(invalid.0.status_code(), 400);

        let unsatisfiable = ApiError::from(StreamError::Unsatisfiable {
            start: 10,
            size: 10,
        });
        assert_eq!(unsatisfiable.0.status_code(), 416);

        let missing = ApiError::from(StreamError::Catalog(CatalogError::FileNotFound(
            FileId::new(),
        )));
        assert_eq!(missing.0.status_code(), 404);
    }

    #[test]
    fn test_upstream_auth_maps_to_502() {
        let rejected = ApiError::from(GatewayError::AuthorizationRejected(CredentialId::new()));
        assert_eq!(rejected.0.status_code(), 502);
    }
}
