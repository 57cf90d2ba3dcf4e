//! Catalog service implementation.

use std::collections::HashMap;
use std::sync::Arc;

use shardbox_shared::types::{AttachmentId, FileId, MessageId};

use super::error::CatalogError;
use super::types::{CreateFragmentInput, Fragment, LogicalFile, Placement};

/// Repository trait for fragment persistence.
///
/// This trait is implemented by the db crate to provide actual database operations.
pub trait FragmentStore: Send + Sync {
    /// Record a new logical file before its first fragment upload.
    fn create_file(
        &self,
        file: LogicalFile,
    ) -> impl std::future::Future<Output = Result<(), CatalogError>> + Send;

    /// Record a fragment after its platform upload is confirmed.
    fn create_fragment(
        &self,
        input: CreateFragmentInput,
    ) -> impl std::future::Future<Output = Result<Fragment, CatalogError>> + Send;

    /// Find a logical file by ID.
    fn get_file(
        &self,
        id: FileId,
    ) -> impl std::future::Future<Output = Result<Option<LogicalFile>, CatalogError>> + Send;

    /// List a file's fragments ordered by sequence.
    fn list_ordered(
        &self,
        file_id: FileId,
    ) -> impl std::future::Future<Output = Result<Vec<Fragment>, CatalogError>> + Send;

    /// List every placement (fragments and auxiliary artifacts) for a set of files.
    fn list_placements_for_files(
        &self,
        file_ids: &[FileId],
    ) -> impl std::future::Future<Output = Result<Vec<Placement>, CatalogError>> + Send;

    /// List every placement recorded on one message, across all placement kinds.
    fn list_message_placements(
        &self,
        message_id: &MessageId,
    ) -> impl std::future::Future<Output = Result<Vec<Placement>, CatalogError>> + Send;

    /// Delete files with their fragments and auxiliary placements. Returns rows removed.
    fn delete_files(
        &self,
        file_ids: &[FileId],
    ) -> impl std::future::Future<Output = Result<u64, CatalogError>> + Send;
}

/// Build the `message -> attachment ids` map used by the consistency pass.
#[must_use]
pub fn group_by_message(placements: &[Placement]) -> HashMap<MessageId, Vec<AttachmentId>> {
    let mut grouped: HashMap<MessageId, Vec<AttachmentId>> = HashMap::new();
    for p in placements {
        grouped
            .entry(p.message_id.clone())
            .or_default()
            .push(p.attachment_id.clone());
    }
    grouped
}

/// Catalog service for fragment bookkeeping.
pub struct CatalogService<S: FragmentStore> {
    store: Arc<S>,
}

impl<S: FragmentStore> CatalogService<S> {
    /// Create a new catalog service.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Access the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Record a confirmed fragment.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateFragment` if `(file, sequence)` or `(file, offset)` is
    /// already taken, `InvalidInput` for a zero sequence or size.
    pub async fn register_fragment(
        &self,
        input: CreateFragmentInput,
    ) -> Result<Fragment, CatalogError> {
        if input.sequence == 0 {
            return Err(CatalogError::InvalidInput(
                "fragment sequence is 1-based".into(),
            ));
        }
        if input.size == 0 {
            return Err(CatalogError::InvalidInput(
                "fragment size must be positive".into(),
            ));
        }

        self.store.create_fragment(input).await
    }

    /// Load a file and its ordered fragments, verifying the layout invariant.
    ///
    /// # Errors
    ///
    /// Returns `FileNotFound` or `CorruptLayout`.
    pub async fn file_for_read(
        &self,
        file_id: FileId,
    ) -> Result<(LogicalFile, Vec<Fragment>), CatalogError> {
        let file = self
            .store
            .get_file(file_id)
            .await?
            .ok_or(CatalogError::FileNotFound(file_id))?;

        let fragments = self.store.list_ordered(file_id).await?;
        verify_layout(&file, &fragments)?;

        Ok((file, fragments))
    }
}

/// Check the fragment layout invariant for one file.
///
/// Fragments sorted by sequence must have dense 1-based sequences and
/// contiguous offsets summing to the file size.
///
/// # Errors
///
/// Returns `CorruptLayout` naming the first violation.
pub fn verify_layout(file: &LogicalFile, fragments: &[Fragment]) -> Result<(), CatalogError> {
    let mut expected_offset: u64 = 0;

    for (i, fragment) in fragments.iter().enumerate() {
        let expected_sequence = u32::try_from(i + 1).unwrap_or(u32::MAX);
        if fragment.sequence != expected_sequence {
            return Err(CatalogError::corrupt_layout(
                file.id,
                format!(
                    "sequence gap: expected {expected_sequence}, found {}",
                    fragment.sequence
                ),
            ));
        }
        if fragment.offset != expected_offset {
            return Err(CatalogError::corrupt_layout(
                file.id,
                format!(
                    "offset gap at sequence {}: expected {expected_offset}, found {}",
                    fragment.sequence, fragment.offset
                ),
            ));
        }
        expected_offset += fragment.size;
    }

    if expected_offset != file.size {
        return Err(CatalogError::corrupt_layout(
            file.id,
            format!(
                "fragment sizes sum to {expected_offset}, file size is {}",
                file.size
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory store shared by catalog, gc, and stream tests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Utc;
    use shardbox_shared::types::FragmentId;

    use super::*;
    use crate::catalog::PlacementKind;

    /// In-memory `FragmentStore` for tests.
    #[derive(Default)]
    pub struct MemoryStore {
        pub files: Mutex<HashMap<FileId, LogicalFile>>,
        pub fragments: Mutex<Vec<Fragment>>,
        pub extra_placements: Mutex<Vec<(FileId, Placement)>>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_file(&self, file: LogicalFile) {
            self.files.lock().unwrap().insert(file.id, file);
        }

        /// Register a thumbnail-style placement that belongs to a file.
        pub fn add_thumbnail(&self, file_id: FileId, placement: Placement) {
            assert_eq!(placement.kind, PlacementKind::Thumbnail);
            self.extra_placements
                .lock()
                .unwrap()
                .push((file_id, placement));
        }
    }

    impl FragmentStore for MemoryStore {
        async fn create_file(&self, file: LogicalFile) -> Result<(), CatalogError> {
            self.files.lock().unwrap().insert(file.id, file);
            Ok(())
        }

        async fn create_fragment(
            &self,
            input: CreateFragmentInput,
        ) -> Result<Fragment, CatalogError> {
            let mut fragments = self.fragments.lock().unwrap();
            let duplicate = fragments.iter().any(|f| {
                f.file_id == input.file_id
                    && (f.sequence == input.sequence || f.offset == input.offset)
            });
            if duplicate {
                return Err(CatalogError::DuplicateFragment {
                    file_id: input.file_id,
                    sequence: input.sequence,
                    offset: input.offset,
                });
            }
            let fragment = Fragment {
                id: FragmentId::new(),
                file_id: input.file_id,
                sequence: input.sequence,
                offset: input.offset,
                size: input.size,
                placement: input.placement,
                created_at: Utc::now(),
            };
            fragments.push(fragment.clone());
            Ok(fragment)
        }

        async fn get_file(&self, id: FileId) -> Result<Option<LogicalFile>, CatalogError> {
            Ok(self.files.lock().unwrap().get(&id).cloned())
        }

        async fn list_ordered(&self, file_id: FileId) -> Result<Vec<Fragment>, CatalogError> {
            let mut out: Vec<Fragment> = self
                .fragments
                .lock()
                .unwrap()
                .iter()
                .filter(|f| f.file_id == file_id)
                .cloned()
                .collect();
            out.sort_by_key(|f| f.sequence);
            Ok(out)
        }

        async fn list_placements_for_files(
            &self,
            file_ids: &[FileId],
        ) -> Result<Vec<Placement>, CatalogError> {
            let mut out: Vec<Placement> = self
                .fragments
                .lock()
                .unwrap()
                .iter()
                .filter(|f| file_ids.contains(&f.file_id))
                .map(|f| f.placement.clone())
                .collect();
            out.extend(
                self.extra_placements
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|(id, _)| file_ids.contains(id))
                    .map(|(_, p)| p.clone()),
            );
            Ok(out)
        }

        async fn list_message_placements(
            &self,
            message_id: &MessageId,
        ) -> Result<Vec<Placement>, CatalogError> {
            let mut out: Vec<Placement> = self
                .fragments
                .lock()
                .unwrap()
                .iter()
                .filter(|f| &f.placement.message_id == message_id)
                .map(|f| f.placement.clone())
                .collect();
            out.extend(
                self.extra_placements
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|(_, p)| &p.message_id == message_id)
                    .map(|(_, p)| p.clone()),
            );
            Ok(out)
        }

        async fn delete_files(&self, file_ids: &[FileId]) -> Result<u64, CatalogError> {
            let mut removed = 0u64;
            {
                let mut files = self.files.lock().unwrap();
                for id in file_ids {
                    if files.remove(id).is_some() {
                        removed += 1;
                    }
                }
            }
            self.fragments
                .lock()
                .unwrap()
                .retain(|f| !file_ids.contains(&f.file_id));
            self.extra_placements
                .lock()
                .unwrap()
                .retain(|(id, _)| !file_ids.contains(id));
            Ok(removed)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use shardbox_shared::types::{CredentialId, OwnerId};

    use super::testing::MemoryStore;
    use super::*;
    use crate::catalog::{EncryptionMethod, FileKind, PlacementKind};

    fn placement(message: &str, attachment: &str) -> Placement {
        Placement {
            channel_id: "100".into(),
            message_id: message.into(),
            attachment_id: attachment.into(),
            size: 8,
            author_id: CredentialId::new(),
            kind: PlacementKind::Fragment,
        }
    }

    fn file(size: u64) -> LogicalFile {
        LogicalFile {
            id: FileId::new(),
            name: "notes.txt".to_string(),
            mime_type: "text/plain".to_string(),
            kind: FileKind::Text,
            size,
            crc: None,
            encryption: EncryptionMethod::None,
            key: None,
            iv: None,
            owner_id: OwnerId::new(),
            created_at: Utc::now(),
        }
    }

    fn fragment(file_id: FileId, sequence: u32, offset: u64, size: u64) -> Fragment {
        Fragment {
            id: shardbox_shared::types::FragmentId::new(),
            file_id,
            sequence,
            offset,
            size,
            placement: placement("1", &format!("a{sequence}")),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_verify_layout_accepts_contiguous() {
        let f = file(250);
        let frags = vec![
            fragment(f.id, 1, 0, 100),
            fragment(f.id, 2, 100, 100),
            fragment(f.id, 3, 200, 50),
        ];
        assert!(verify_layout(&f, &frags).is_ok());
    }

    #[test]
    fn test_verify_layout_rejects_offset_gap() {
        let f = file(200);
        let frags = vec![fragment(f.id, 1, 0, 100), fragment(f.id, 2, 101, 100)];
        let err = verify_layout(&f, &frags).unwrap_err();
        assert!(matches!(err, CatalogError::CorruptLayout { .. }));
    }

    #[test]
    fn test_verify_layout_rejects_size_mismatch() {
        let f = file(300);
        let frags = vec![fragment(f.id, 1, 0, 100), fragment(f.id, 2, 100, 100)];
        let err = verify_layout(&f, &frags).unwrap_err();
        assert!(matches!(err, CatalogError::CorruptLayout { .. }));
    }

    #[test]
    fn test_verify_layout_rejects_sequence_gap() {
        let f = file(200);
        let frags = vec![fragment(f.id, 1, 0, 100), fragment(f.id, 3, 100, 100)];
        let err = verify_layout(&f, &frags).unwrap_err();
        assert!(matches!(err, CatalogError::CorruptLayout { .. }));
    }

    #[test]
    fn test_group_by_message() {
        let placements = vec![
            placement("10", "a"),
            placement("10", "b"),
            placement("11", "c"),
        ];
        let grouped = group_by_message(&placements);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&MessageId::from("10")].len(), 2);
        assert_eq!(grouped[&MessageId::from("11")].len(), 1);
    }

    #[tokio::test]
    async fn test_register_fragment_rejects_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let service = CatalogService::new(store);
        let file_id = FileId::new();

        let input = CreateFragmentInput {
            file_id,
            sequence: 1,
            offset: 0,
            size: 10,
            placement: placement("1", "a"),
        };
        service
            .register_fragment(input.clone())
            .await
            .expect("first insert");

        let err = service.register_fragment(input).await.unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateFragment { .. }));
    }

    #[tokio::test]
    async fn test_register_fragment_rejects_zero_sequence() {
        let store = Arc::new(MemoryStore::new());
        let service = CatalogService::new(store);

        let err = service
            .register_fragment(CreateFragmentInput {
                file_id: FileId::new(),
                sequence: 0,
                offset: 0,
                size: 10,
                placement: placement("1", "a"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_file_for_read_missing_file() {
        let store = Arc::new(MemoryStore::new());
        let service = CatalogService::new(store);

        let err = service.file_for_read(FileId::new()).await.unwrap_err();
        assert!(matches!(err, CatalogError::FileNotFound(_)));
    }
}
