//! Catalog error types.

use shardbox_shared::types::{FileId, FragmentId};
use thiserror::Error;

/// Catalog operation errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// A fragment with the same `(file, sequence)` or `(file, offset)` already exists.
    #[error("duplicate fragment for file {file_id}: sequence {sequence} or offset {offset} taken")]
    DuplicateFragment {
        /// Owning file.
        file_id: FileId,
        /// Conflicting sequence.
        sequence: u32,
        /// Conflicting offset.
        offset: u64,
    },

    /// Logical file not found.
    #[error("file not found: {0}")]
    FileNotFound(FileId),

    /// Fragment not found.
    #[error("fragment not found: {0}")]
    FragmentNotFound(FragmentId),

    /// Fragment layout violates the contiguity invariant.
    #[error("corrupt fragment layout for file {file_id}: {detail}")]
    CorruptLayout {
        /// Owning file.
        file_id: FileId,
        /// Which invariant was violated.
        detail: String,
    },

    /// Invalid input before it reaches the store.
    #[error("invalid fragment input: {0}")]
    InvalidInput(String),

    /// Underlying repository failure.
    #[error("catalog repository error: {0}")]
    Repository(String),
}

impl CatalogError {
    /// Create a repository error.
    #[must_use]
    pub fn repository(msg: impl Into<String>) -> Self {
        Self::Repository(msg.into())
    }

    /// Create a corrupt layout error.
    #[must_use]
    pub fn corrupt_layout(file_id: FileId, detail: impl Into<String>) -> Self {
        Self::CorruptLayout {
            file_id,
            detail: detail.into(),
        }
    }
}
