//! The chunk-encrypt-send-record upload pipeline.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use shardbox_shared::types::{ChannelId, FileId, OwnerId};
use tracing::info;

use super::error::UploadError;
use crate::catalog::{
    CatalogService, CreateFragmentInput, EncryptionMethod, FileKind, Fragment, FragmentStore,
    LogicalFile, Placement, PlacementKind,
};
use crate::cipher::StreamEncryptor;
use crate::gateway::{AttachmentPlatform, AttachmentUpload};

/// A new file to be stored.
#[derive(Debug, Clone)]
pub struct NewFileUpload {
    /// Display name, extension included.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// Content classification.
    pub kind: FileKind,
    /// Encryption to apply to the byte stream.
    pub encryption: EncryptionMethod,
    /// Symmetric key; required iff encrypted.
    pub key: Option<Vec<u8>>,
    /// IV / nonce base; required iff encrypted.
    pub iv: Option<Vec<u8>>,
    /// Plaintext file contents.
    pub data: Bytes,
    /// Maximum stored bytes per fragment.
    pub fragment_size: u64,
}

/// A completed upload.
#[derive(Debug)]
pub struct UploadedFile {
    /// The recorded file.
    pub file: LogicalFile,
    /// Its fragments in sequence order.
    pub fragments: Vec<Fragment>,
}

/// Splits files into fragments and pushes them through the gateway.
pub struct UploadService<S: FragmentStore, P> {
    catalog: CatalogService<S>,
    platform: Arc<P>,
}

impl<S, P> UploadService<S, P>
where
    S: FragmentStore,
    P: AttachmentPlatform,
{
    /// Create a new upload service.
    #[must_use]
    pub fn new(catalog: CatalogService<S>, platform: Arc<P>) -> Self {
        Self { catalog, platform }
    }

    /// Store one file: record it, then chunk, encrypt, upload, and record
    /// each fragment once the platform confirms it.
    ///
    /// Fragments are recorded one by one as uploads confirm; if a later
    /// fragment fails, the earlier records stay so GC can reclaim them.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` before any side effect, and catalog/gateway/cipher
    /// errors from the pipeline itself.
    pub async fn upload(
        &self,
        owner_id: OwnerId,
        channel_id: &ChannelId,
        upload: NewFileUpload,
    ) -> Result<UploadedFile, UploadError> {
        if upload.data.is_empty() {
            return Err(UploadError::Invalid("empty file".to_string()));
        }
        if upload.fragment_size == 0 {
            return Err(UploadError::Invalid("zero fragment size".to_string()));
        }

        let size = upload.data.len() as u64;
        let crc = crc32fast::hash(&upload.data);
        let file = LogicalFile {
            id: FileId::new(),
            name: upload.name.clone(),
            mime_type: upload.mime_type.clone(),
            kind: upload.kind,
            size,
            crc: Some(crc),
            encryption: upload.encryption,
            key: upload.key.clone(),
            iv: upload.iv.clone(),
            owner_id,
            created_at: Utc::now(),
        };

        // One stateful encryptor spans all fragments: the ciphertext is one
        // logically contiguous stream split at fragment boundaries.
        let mut encryptor = StreamEncryptor::new(
            upload.encryption,
            upload.key.as_deref(),
            upload.iv.as_deref(),
            0,
        )?;

        self.catalog.store().create_file(file.clone()).await?;

        let mut fragments = Vec::new();
        let mut offset: u64 = 0;
        let chunk_len = usize::try_from(upload.fragment_size)
            .map_err(|_| UploadError::Invalid("fragment size too large".to_string()))?;

        for (index, chunk) in upload.data.chunks(chunk_len).enumerate() {
            let sequence = u32::try_from(index + 1)
                .map_err(|_| UploadError::Invalid("too many fragments".to_string()))?;
            let mut sealed = BytesMut::from(chunk);
            encryptor.apply(&mut sealed);

            let created = self
                .platform
                .create_attachment(
                    owner_id,
                    channel_id,
                    AttachmentUpload {
                        filename: format!("{}-{sequence}", file.id),
                        bytes: sealed.freeze(),
                    },
                )
                .await?;

            let fragment = self
                .catalog
                .register_fragment(CreateFragmentInput {
                    file_id: file.id,
                    sequence,
                    offset,
                    size: chunk.len() as u64,
                    placement: Placement {
                        channel_id: channel_id.clone(),
                        message_id: created.message_id,
                        attachment_id: created.attachment_id,
                        size: created.size,
                        author_id: created.author_id,
                        kind: PlacementKind::Fragment,
                    },
                })
                .await?;

            offset += chunk.len() as u64;
            fragments.push(fragment);
        }

        info!(
            file_id = %file.id,
            size,
            fragments = fragments.len(),
            "upload complete"
        );
        Ok(UploadedFile { file, fragments })
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::catalog::testing::MemoryStore;
    use crate::catalog::verify_layout;
    use crate::stream::testing::MockPlatform;
    use crate::stream::{FileStreamer, ResolvedRange};

    fn upload_input(data: Vec<u8>, fragment_size: u64, encryption: EncryptionMethod) -> NewFileUpload {
        NewFileUpload {
            name: "report.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            kind: FileKind::Other,
            encryption,
            key: encryption.is_encrypted().then(|| vec![6u8; 32]),
            iv: encryption.is_encrypted().then(|| match encryption {
                EncryptionMethod::ChaCha20 => vec![8u8; 12],
                _ => vec![8u8; 16],
            }),
            data: Bytes::from(data),
            fragment_size,
        }
    }

    #[tokio::test]
    async fn test_upload_records_contiguous_fragments() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(MockPlatform::new());
        let service = UploadService::new(
            CatalogService::new(Arc::clone(&store)),
            Arc::clone(&platform),
        );

        let data: Vec<u8> = (0u16..250).map(|i| (i % 251) as u8).collect();
        let uploaded = service
            .upload(
                OwnerId::new(),
                &ChannelId::from("chan"),
                upload_input(data.clone(), 100, EncryptionMethod::AesCtr),
            )
            .await
            .expect("upload");

        assert_eq!(uploaded.fragments.len(), 3);
        assert_eq!(uploaded.file.size, 250);
        assert_eq!(uploaded.file.crc, Some(crc32fast::hash(&data)));
        verify_layout(&uploaded.file, &uploaded.fragments).expect("layout holds");

        let stored = store.get_file(uploaded.file.id).await.expect("get");
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_upload_then_stream_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(MockPlatform::new());
        let service = UploadService::new(
            CatalogService::new(Arc::clone(&store)),
            Arc::clone(&platform),
        );

        let data: Vec<u8> = (0u16..333).map(|i| (i % 251) as u8).collect();
        let uploaded = service
            .upload(
                OwnerId::new(),
                &ChannelId::from("chan"),
                upload_input(data.clone(), 128, EncryptionMethod::ChaCha20),
            )
            .await
            .expect("upload");

        let streamer = FileStreamer::new(Arc::clone(&platform));
        let stream = streamer
            .stream(
                uploaded.file.owner_id,
                &uploaded.file,
                uploaded.fragments,
                ResolvedRange { start: 0, end: 332 },
            )
            .expect("stream");
        let chunks: Vec<Bytes> = stream.try_collect().await.expect("collect");
        assert_eq!(chunks.concat(), data);
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_data() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(MockPlatform::new());
        let service = UploadService::new(
            CatalogService::new(Arc::clone(&store)),
            Arc::clone(&platform),
        );

        let err = service
            .upload(
                OwnerId::new(),
                &ChannelId::from("chan"),
                upload_input(Vec::new(), 100, EncryptionMethod::None),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Invalid(_)));
        assert_eq!(platform.calls().len(), 0);
    }
}
