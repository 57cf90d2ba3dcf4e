//! Fragment catalog: the durable record of where each chunk of a file lives.
//!
//! This module provides:
//! - Domain types for logical files, fragments, and placements
//! - The `FragmentStore` repository trait implemented by the db crate
//! - Layout invariant checks and the message grouping used by GC

mod error;
mod service;
mod types;

pub use error::CatalogError;
pub use service::{CatalogService, FragmentStore, group_by_message, verify_layout};

#[cfg(test)]
pub(crate) use service::testing;
pub use types::{
    CreateFragmentInput, EncryptionMethod, FileKind, Fragment, LogicalFile, Placement,
    PlacementKind,
};
