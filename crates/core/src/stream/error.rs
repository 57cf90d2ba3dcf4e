//! Streaming error types.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::cipher::CipherError;
use crate::gateway::GatewayError;

/// Range resolution and streaming errors.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The `Range` header is syntactically invalid.
    #[error("invalid range header: {0}")]
    InvalidRange(String),

    /// The range starts at or beyond the end of the file.
    #[error("range start {start} unsatisfiable for size {size}")]
    Unsatisfiable {
        /// Requested first byte.
        start: u64,
        /// Total file size.
        size: u64,
    },

    /// The platform returned fewer bytes than the fragment layout records.
    #[error("stream truncated: {missing} bytes missing")]
    Truncated {
        /// Bytes the layout promised but the platform never delivered.
        missing: u64,
    },

    /// Catalog lookup or layout failure.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Platform fetch failure.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Cipher construction failure.
    #[error(transparent)]
    Cipher(#[from] CipherError),
}
