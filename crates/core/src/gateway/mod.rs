//! Attachment gateway: the sole owner of platform HTTP traffic.
//!
//! This module provides:
//! - The `AttachmentPlatform` trait the streaming reader and GC depend on
//! - `AttachmentGateway`, the concrete client with credential rotation,
//!   rate-limit feedback, and the expiry-aware message URL cache
//! - Wire-level payload shapes and header parsing

mod client;
mod error;
mod types;
mod wire;

pub use client::{AttachmentGateway, AttachmentPlatform, CredentialDirectory};
pub use error::GatewayError;
pub use types::{AttachmentUpload, ByteStream, CreatedAttachment, FetchRange, MessageRef};
