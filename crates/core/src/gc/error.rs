//! GC error types.

use thiserror::Error;

use crate::catalog::CatalogError;

/// Attachment consistency errors.
///
/// Per-message platform failures never surface here; they are captured in
/// the [`GcReport`](super::GcReport) so one message cannot abort a batch.
#[derive(Debug, Error)]
pub enum GcError {
    /// Reading or deleting catalog rows failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
