//! Pool error types.

use shardbox_shared::types::OwnerId;
use thiserror::Error;

/// Credential pool errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// No credential became usable within the bounded wait.
    #[error("all credentials for owner {0} are saturated or rate limited")]
    CredentialExhausted(OwnerId),

    /// The platform blocked the whole account; back off before retrying.
    #[error("owner {owner_id} is blocked by the platform for {retry_after_secs}s")]
    OwnerBlocked {
        /// Affected owner.
        owner_id: OwnerId,
        /// Seconds until the block lifts.
        retry_after_secs: u64,
    },

    /// The owner has no registered credentials.
    #[error("no credentials registered for owner {0}")]
    UnknownOwner(OwnerId),
}
