//! Common types used across the application.

pub mod id;
pub mod platform;

pub use id::*;
pub use platform::{AttachmentId, ChannelId, MessageId};
