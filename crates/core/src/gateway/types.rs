//! Gateway types and data structures.

use bytes::Bytes;
use futures::stream::BoxStream;
use shardbox_shared::types::{AttachmentId, ChannelId, CredentialId, MessageId};

use super::error::GatewayError;
use crate::catalog::Placement;

/// Lazy stream of attachment bytes.
pub type ByteStream = BoxStream<'static, Result<Bytes, GatewayError>>;

/// Payload for creating one attachment on a new message.
#[derive(Debug, Clone)]
pub struct AttachmentUpload {
    /// Filename presented to the platform.
    pub filename: String,
    /// Raw (already encrypted) bytes.
    pub bytes: Bytes,
}

/// Result of a confirmed attachment creation.
#[derive(Debug, Clone)]
pub struct CreatedAttachment {
    /// Message hosting the attachment.
    pub message_id: MessageId,
    /// The attachment id, globally unique.
    pub attachment_id: AttachmentId,
    /// Stored size reported by the platform.
    pub size: u64,
    /// Credential that authored the message.
    pub author_id: CredentialId,
}

/// Locates one message and its recorded author for edit/delete calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    /// Channel hosting the message.
    pub channel_id: ChannelId,
    /// The message itself.
    pub message_id: MessageId,
    /// Credential that authored the message.
    pub author_id: CredentialId,
}

impl From<&Placement> for MessageRef {
    fn from(placement: &Placement) -> Self {
        Self {
            channel_id: placement.channel_id.clone(),
            message_id: placement.message_id.clone(),
            author_id: placement.author_id,
        }
    }
}

/// Byte sub-range of one attachment, inclusive end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRange {
    /// First byte to fetch.
    pub start: u64,
    /// Last byte to fetch, or open-ended.
    pub end: Option<u64>,
}

impl FetchRange {
    /// Open-ended range from `start`.
    #[must_use]
    pub const fn from(start: u64) -> Self {
        Self {
            start,
            end: None,
        }
    }

    /// Render as an HTTP `Range` header value.
    #[must_use]
    pub fn header_value(&self) -> String {
        match self.end {
            Some(end) => format!("bytes={}-{}", self.start, end),
            None => format!("bytes={}-", self.start),
        }
    }
}
