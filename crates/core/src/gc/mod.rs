//! Attachment consistency / garbage collection.

mod error;
mod service;

pub use error::GcError;
pub use service::{GcFailure, GcReport, GcService};
