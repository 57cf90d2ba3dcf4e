//! Upload pipeline: chunk, encrypt, send, record.

mod error;
mod service;

pub use error::UploadError;
pub use service::{NewFileUpload, UploadService, UploadedFile};
