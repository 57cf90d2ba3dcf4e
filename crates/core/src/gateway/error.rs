//! Gateway error types.

use shardbox_shared::types::CredentialId;
use thiserror::Error;

use crate::pool::PoolError;

/// Attachment gateway errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Credential pool failure (exhausted, blocked, unknown owner).
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The platform rejected the credential (401/403).
    #[error("credential {0} rejected by the platform")]
    AuthorizationRejected(CredentialId),

    /// The message, channel, or attachment is gone on the platform side.
    #[error("placement not found on the platform: {0}")]
    PlacementNotFound(String),

    /// A webhook author no longer exists on the platform.
    #[error("webhook credential {0} revoked on the platform")]
    WebhookRevoked(CredentialId),

    /// Rate limited even after credential rotation.
    #[error("rate limited by the platform, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds the platform asked us to wait.
        retry_after_secs: u64,
    },

    /// The recorded author credential is not in the directory.
    #[error("author credential {0} is not registered")]
    UnknownAuthor(CredentialId),

    /// Credential directory lookup failed.
    #[error("credential directory error: {0}")]
    Directory(String),

    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Any other platform response we do not model.
    #[error("platform returned {status}: {detail}")]
    Platform {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        detail: String,
    },
}

impl GatewayError {
    /// Whether the failure means the target is already absent, making
    /// delete/patch a no-op rather than an error.
    #[must_use]
    pub const fn is_already_absent(&self) -> bool {
        matches!(self, Self::PlacementNotFound(_))
    }
}
