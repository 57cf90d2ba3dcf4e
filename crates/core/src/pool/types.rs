//! Pool types and data structures.

use chrono::{DateTime, Utc};
use shardbox_shared::types::CredentialId;

/// One platform credential registered for an owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// A bot token; authenticated requests, pooled and rate-limit tracked.
    Bot {
        /// Unique identifier.
        id: CredentialId,
        /// Raw token, sent as `Authorization: Bot <token>`.
        token: String,
    },
    /// A webhook endpoint; authors messages it can later edit or delete.
    Webhook {
        /// Unique identifier.
        id: CredentialId,
        /// Full webhook URL including its secret.
        url: String,
    },
}

impl Credential {
    /// Identifier of the credential.
    #[must_use]
    pub const fn id(&self) -> CredentialId {
        match self {
            Self::Bot { id, .. } | Self::Webhook { id, .. } => *id,
        }
    }

    /// Whether this is a bot token.
    #[must_use]
    pub const fn is_bot(&self) -> bool {
        matches!(self, Self::Bot { .. })
    }
}

/// Rate-limit state reported by the platform on a response.
///
/// Parsed from the `X-RateLimit-Remaining` and `X-RateLimit-Reset` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitObservation {
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the window resets.
    pub reset_at: DateTime<Utc>,
}
