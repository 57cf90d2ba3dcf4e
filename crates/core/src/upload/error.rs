//! Upload error types.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::cipher::CipherError;
use crate::gateway::GatewayError;

/// Upload pipeline errors.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The upload request is malformed before any external call.
    #[error("invalid upload: {0}")]
    Invalid(String),

    /// Recording the file or a fragment failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Platform upload failed; already-confirmed fragments stay recorded
    /// so a GC pass can reclaim them.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Cipher construction failed.
    #[error(transparent)]
    Cipher(#[from] CipherError),
}
