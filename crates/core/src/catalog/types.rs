//! Catalog types and data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shardbox_shared::types::{
    AttachmentId, ChannelId, CredentialId, FileId, FragmentId, MessageId, OwnerId,
};

/// Client-side encryption method applied to a file's byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionMethod {
    /// No encryption; bytes are stored as-is.
    #[default]
    None,
    /// AES in counter mode, 16-byte blocks.
    AesCtr,
    /// ChaCha20 stream cipher, 64-byte blocks.
    ChaCha20,
}

impl EncryptionMethod {
    /// Convert to database string value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::AesCtr => "aes_ctr",
            Self::ChaCha20 => "cha_cha20",
        }
    }

    /// Parse from database string value.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "aes_ctr" => Some(Self::AesCtr),
            "cha_cha20" => Some(Self::ChaCha20),
            _ => None,
        }
    }

    /// Keystream block size in bytes, if the method has one.
    #[must_use]
    pub const fn block_size(&self) -> Option<u64> {
        match self {
            Self::None => None,
            Self::AesCtr => Some(16),
            Self::ChaCha20 => Some(64),
        }
    }

    /// Whether the method applies any encryption at all.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Broad content classification, used for cache header decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    /// Plain text; served with `no-cache`.
    Text,
    /// Image content.
    Image,
    /// Audio content.
    Audio,
    /// Video content.
    Video,
    /// Anything else.
    #[default]
    Other,
}

impl FileKind {
    /// Convert to database string value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Other => "other",
        }
    }

    /// Parse from database string value.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "audio" => Some(Self::Audio),
            "video" => Some(Self::Video),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// What an attachment placement carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementKind {
    /// A fragment of a file's byte stream.
    Fragment,
    /// A generated thumbnail image.
    Thumbnail,
}

/// Location of one attachment on the external platform.
///
/// Shared by fragments and auxiliary artifacts such as thumbnails. Every
/// `(message_id, attachment_id)` pair maps to at most one placement row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Channel hosting the message.
    pub channel_id: ChannelId,
    /// Message carrying the attachment.
    pub message_id: MessageId,
    /// The attachment itself; globally unique.
    pub attachment_id: AttachmentId,
    /// Stored (post-encryption) byte size.
    pub size: u64,
    /// Credential that authored the message.
    pub author_id: CredentialId,
    /// What the attachment carries.
    pub kind: PlacementKind,
}

/// A user-visible file, independent of how it is chunked.
#[derive(Debug, Clone)]
pub struct LogicalFile {
    /// Unique identifier.
    pub id: FileId,
    /// Display name, extension included.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// Content classification.
    pub kind: FileKind,
    /// Total decrypted size in bytes.
    pub size: u64,
    /// CRC32 of the plaintext, recorded at upload.
    pub crc: Option<u32>,
    /// Encryption method for the byte stream.
    pub encryption: EncryptionMethod,
    /// Symmetric key; present iff encrypted.
    pub key: Option<Vec<u8>>,
    /// IV / nonce base; present iff encrypted.
    pub iv: Option<Vec<u8>>,
    /// Owner of the file.
    pub owner_id: OwnerId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl LogicalFile {
    /// Whether the stored bytes are encrypted.
    #[must_use]
    pub const fn is_encrypted(&self) -> bool {
        self.encryption.is_encrypted()
    }
}

/// One chunk of a logical file, stored as one attachment on one message.
#[derive(Debug, Clone)]
pub struct Fragment {
    /// Unique identifier.
    pub id: FragmentId,
    /// Owning file.
    pub file_id: FileId,
    /// 1-based, dense, unique per file.
    pub sequence: u32,
    /// Byte offset within the logical file; unique per file.
    pub offset: u64,
    /// Stored byte size of this chunk.
    pub size: u64,
    /// Where the chunk lives on the platform.
    pub placement: Placement,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Input for recording a fragment after its upload is confirmed.
#[derive(Debug, Clone)]
pub struct CreateFragmentInput {
    /// Owning file.
    pub file_id: FileId,
    /// 1-based sequence.
    pub sequence: u32,
    /// Byte offset within the logical file.
    pub offset: u64,
    /// Stored byte size.
    pub size: u64,
    /// Confirmed platform placement.
    pub placement: Placement,
}
