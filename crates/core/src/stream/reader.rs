//! The decrypting fragment reader.
//!
//! Produces a lazy byte stream spanning as many fragments as the resolved
//! range requires. Fragments are consumed strictly in sequence order; the
//! cipher is stateful and out-of-order delivery would desynchronize the
//! keystream. Laziness doubles as cancellation: when the consumer drops the
//! stream, no further fragment fetches are issued.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use shardbox_shared::types::OwnerId;
use tracing::debug;

use super::error::StreamError;
use super::range::{ResolvedRange, resolve_entry};
use crate::catalog::{Fragment, LogicalFile};
use crate::cipher::StreamDecryptor;
use crate::gateway::{AttachmentPlatform, ByteStream, FetchRange};

/// Streams decrypted file bytes out of their platform fragments.
pub struct FileStreamer<P> {
    platform: Arc<P>,
}

impl<P: AttachmentPlatform + 'static> FileStreamer<P> {
    /// Create a streamer over the given platform gateway.
    #[must_use]
    pub fn new(platform: Arc<P>) -> Self {
        Self { platform }
    }

    /// Produce the byte stream for `resolved` out of the file's ordered
    /// fragments.
    ///
    /// The cipher is positioned at the global offset `resolved.start`;
    /// exactly `resolved.len()` bytes are yielded.
    ///
    /// # Errors
    ///
    /// Fails up front on corrupt layouts and bad key material; per-chunk
    /// failures surface through the stream items.
    pub fn stream(
        &self,
        owner_id: OwnerId,
        file: &LogicalFile,
        fragments: Vec<Fragment>,
        resolved: ResolvedRange,
    ) -> Result<impl Stream<Item = Result<Bytes, StreamError>> + Send + 'static, StreamError> {
        let entry = resolve_entry(&fragments, resolved.start).ok_or(StreamError::Unsatisfiable {
            start: resolved.start,
            size: file.size,
        })?;

        let cipher = StreamDecryptor::new(
            file.encryption,
            file.key.as_deref(),
            file.iv.as_deref(),
            resolved.start,
        )?;

        let state = ReadState {
            platform: Arc::clone(&self.platform),
            owner_id,
            fragments,
            next_index: entry.index,
            entry_index: entry.index,
            intra_offset: entry.intra_offset,
            range_end: resolved.end,
            current: None,
            cipher,
            remaining: resolved.len(),
        };

        Ok(futures::stream::try_unfold(state, ReadState::step))
    }
}

struct ReadState<P> {
    platform: Arc<P>,
    owner_id: OwnerId,
    fragments: Vec<Fragment>,
    next_index: usize,
    entry_index: usize,
    intra_offset: u64,
    range_end: u64,
    current: Option<ByteStream>,
    cipher: StreamDecryptor,
    remaining: u64,
}

impl<P: AttachmentPlatform> ReadState<P> {
    async fn step(mut self) -> Result<Option<(Bytes, Self)>, StreamError> {
        loop {
            if self.remaining == 0 {
                return Ok(None);
            }

            let current = match self.current.as_mut() {
                Some(current) => current,
                None => {
                    let Some(fragment) = self.fragments.get(self.next_index) else {
                        return Err(StreamError::Truncated {
                            missing: self.remaining,
                        });
                    };
                    let fetch = self.fetch_range(fragment);
                    debug!(
                        sequence = fragment.sequence,
                        attachment_id = %fragment.placement.attachment_id,
                        ?fetch,
                        "fetching fragment"
                    );
                    let stream = self
                        .platform
                        .fetch(self.owner_id, &fragment.placement, fetch)
                        .await?;
                    self.next_index += 1;
                    self.current.insert(stream)
                }
            };
            match current.next().await {
                Some(Ok(chunk)) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    let mut data = BytesMut::from(&chunk[..]);
                    self.cipher.apply(&mut data);
                    if data.len() as u64 > self.remaining {
                        data.truncate(usize::try_from(self.remaining).unwrap_or(usize::MAX));
                    }
                    self.remaining -= data.len() as u64;
                    return Ok(Some((data.freeze(), self)));
                }
                Some(Err(err)) => return Err(err.into()),
                None => {
                    self.current = None;
                }
            }
        }
    }

    /// Sub-range to request for one fragment: the entry fragment starts at
    /// the intra-fragment remainder, the last needed fragment stops at the
    /// range end, everything in between is fetched whole.
    fn fetch_range(&self, fragment: &Fragment) -> Option<FetchRange> {
        let start = if self.next_index == self.entry_index {
            self.intra_offset
        } else {
            0
        };
        let fragment_last = fragment.offset + fragment.size - 1;
        let end = if self.range_end < fragment_last {
            Some(self.range_end - fragment.offset)
        } else {
            None
        };
        if start == 0 && end.is_none() {
            None
        } else {
            Some(FetchRange { start, end })
        }
    }
}


#[cfg(test)]
mod tests {
    use chrono::Utc;
    use futures::TryStreamExt;
    use shardbox_shared::types::{CredentialId, FileId, FragmentId};

    use super::testing::{Call, MockPlatform};
    use super::*;
    use crate::catalog::{EncryptionMethod, FileKind, Placement, PlacementKind};
    use crate::cipher::StreamEncryptor;
    use crate::gateway::FetchRange;

    const KEY: [u8; 32] = [4u8; 32];
    const IV: [u8; 16] = [9u8; 16];

    pub(super) struct Fixture {
        platform: Arc<MockPlatform>,
        file: LogicalFile,
        fragments: Vec<Fragment>,
        pub(super) plain: Vec<u8>,
    }

    /// Build a file split into fragments of the given sizes, stored on the
    /// mock platform, optionally encrypted.
    pub(super) fn fixture(sizes: &[u64], encryption: EncryptionMethod) -> Fixture {
        let total: u64 = sizes.iter().sum();
        let plain: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();

        let iv: &[u8] = match encryption {
            EncryptionMethod::ChaCha20 => &IV[..12],
            _ => &IV,
        };
        let mut stored = plain.clone();
        if encryption.is_encrypted() {
            let mut enc =
                StreamEncryptor::new(encryption, Some(&KEY), Some(iv), 0).expect("encryptor");
            enc.apply(&mut stored);
        }

        let platform = Arc::new(MockPlatform::new());
        let file_id = FileId::new();
        let mut offset = 0u64;
        let fragments: Vec<Fragment> = sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                let attachment_id =
                    shardbox_shared::types::AttachmentId::from(format!("a{i}").as_str());
                let chunk =
                    stored[offset as usize..(offset + size) as usize].to_vec();
                platform.put(attachment_id.clone(), chunk);
                let fragment = Fragment {
                    id: FragmentId::new(),
                    file_id,
                    sequence: u32::try_from(i + 1).unwrap(),
                    offset,
                    size,
                    placement: Placement {
                        channel_id: "1".into(),
                        message_id: format!("m{i}").as_str().into(),
                        attachment_id,
                        size,
                        author_id: CredentialId::new(),
                        kind: PlacementKind::Fragment,
                    },
                    created_at: Utc::now(),
                };
                offset += size;
                fragment
            })
            .collect();

        let file = LogicalFile {
            id: file_id,
            name: "data.bin".to_string(),
            mime_type: "application/octet-stream".to_string(),
            kind: FileKind::Other,
            size: total,
            crc: Some(crc32fast::hash(&plain)),
            encryption,
            key: encryption.is_encrypted().then(|| KEY.to_vec()),
            iv: encryption.is_encrypted().then(|| iv.to_vec()),
            owner_id: shardbox_shared::types::OwnerId::new(),
            created_at: Utc::now(),
        };

        Fixture {
            platform,
            file,
            fragments,
            plain,
        }
    }

    pub(super) async fn collect(
        fx: &Fixture,
        resolved: ResolvedRange,
    ) -> Result<Vec<u8>, StreamError> {
        let streamer = FileStreamer::new(Arc::clone(&fx.platform));
        let stream = streamer.stream(
            fx.file.owner_id,
            &fx.file,
            fx.fragments.clone(),
            resolved,
        )?;
        let chunks: Vec<Bytes> = stream.try_collect().await?;
        Ok(chunks.concat())
    }

    #[tokio::test]
    async fn test_bounded_range_touches_only_entry_fragment() {
        // 100/100/50, bytes=150-199: lands 50 bytes into fragment 2 and
        // ends exactly on its last byte.
        let fx = fixture(&[100, 100, 50], EncryptionMethod::AesCtr);
        let got = collect(&fx, ResolvedRange { start: 150, end: 199 })
            .await
            .expect("stream");
        assert_eq!(got, &fx.plain[150..200]);
        assert_eq!(got.len(), 50);

        let calls = fx.platform.calls();
        assert_eq!(calls.len(), 1, "only the entry fragment is fetched");
        assert_eq!(
            calls[0],
            Call::Fetch("a1".into(), Some(FetchRange { start: 50, end: None }))
        );
    }

    #[tokio::test]
    async fn test_fragment_boundary_start_has_zero_remainder() {
        // Byte 150 is exactly the first byte of fragment 3.
        let fx = fixture(&[100, 50, 50], EncryptionMethod::AesCtr);
        let got = collect(&fx, ResolvedRange { start: 150, end: 199 })
            .await
            .expect("stream");
        assert_eq!(got, &fx.plain[150..200]);
        assert_eq!(
            fx.platform.calls(),
            vec![Call::Fetch("a2".into(), None)]
        );
    }

    #[tokio::test]
    async fn test_full_stream_matches_plaintext_and_crc() {
        let fx = fixture(&[100, 100, 50], EncryptionMethod::ChaCha20);
        let got = collect(&fx, ResolvedRange { start: 0, end: 249 })
            .await
            .expect("stream");
        assert_eq!(got, fx.plain);
        assert_eq!(crc32fast::hash(&got), fx.file.crc.unwrap());
        assert_eq!(fx.platform.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_open_range_spans_remaining_fragments() {
        let fx = fixture(&[100, 100, 50], EncryptionMethod::AesCtr);
        let got = collect(&fx, ResolvedRange { start: 150, end: 249 })
            .await
            .expect("stream");
        assert_eq!(got, &fx.plain[150..]);

        let calls = fx.platform.calls();
        assert_eq!(
            calls[0],
            Call::Fetch("a1".into(), Some(FetchRange { start: 50, end: None }))
        );
        assert_eq!(calls[1], Call::Fetch("a2".into(), None));
    }

    #[tokio::test]
    async fn test_range_ending_mid_fragment_is_bounded() {
        let fx = fixture(&[100, 100], EncryptionMethod::None);
        let got = collect(&fx, ResolvedRange { start: 0, end: 129 })
            .await
            .expect("stream");
        assert_eq!(got, &fx.plain[..130]);

        let calls = fx.platform.calls();
        assert_eq!(calls[0], Call::Fetch("a0".into(), None));
        assert_eq!(
            calls[1],
            Call::Fetch("a1".into(), Some(FetchRange { start: 0, end: Some(29) }))
        );
    }

    #[tokio::test]
    async fn test_drop_stops_fetching() {
        let fx = fixture(&[100, 100, 50], EncryptionMethod::AesCtr);
        let streamer = FileStreamer::new(Arc::clone(&fx.platform));
        let mut stream = Box::pin(
            streamer
                .stream(
                    fx.file.owner_id,
                    &fx.file,
                    fx.fragments.clone(),
                    ResolvedRange { start: 0, end: 249 },
                )
                .expect("stream"),
        );

        let first = stream.try_next().await.expect("chunk").expect("some");
        assert!(!first.is_empty());
        drop(stream);

        // Only the first fragment was ever requested.
        assert_eq!(fx.platform.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_short_platform_read_reports_truncation() {
        let fx = fixture(&[100, 100], EncryptionMethod::None);
        *fx.platform.short_read_limit.lock().unwrap() = Some(10);

        let err = collect(&fx, ResolvedRange { start: 0, end: 199 })
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Truncated { missing: 180 }));
    }
}

#[cfg(test)]
mod property_tests {
    use proptest::prelude::*;

    use super::tests::{collect, fixture};
    use crate::catalog::EncryptionMethod;
    use crate::stream::range::ResolvedRange;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Any range served through the fragment walk equals the same slice
        /// of the original plaintext.
        #[test]
        fn prop_range_stream_matches_plain_slice(
            sizes in proptest::collection::vec(1u64..64, 1..6),
            start_seed in any::<u64>(),
            len_seed in any::<u64>(),
        ) {
            let total: u64 = sizes.iter().sum();
            let start = start_seed % total;
            let end = start + len_seed % (total - start);

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            let fx = fixture(&sizes, EncryptionMethod::AesCtr);
            let got = rt
                .block_on(collect(&fx, ResolvedRange { start, end }))
                .expect("stream");
            prop_assert_eq!(&got[..], &fx.plain[start as usize..=end as usize]);
        }
    }
}
