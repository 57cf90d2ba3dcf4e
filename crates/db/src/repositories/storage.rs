//! Storage repository for file and fragment rows.
//!
//! Implements the core crate's `FragmentStore` using `SeaORM`.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, SqlErr,
};
use uuid::Uuid;

use crate::entities::{files, fragments, thumbnails};
use shardbox_core::catalog::{
    CatalogError, CreateFragmentInput, EncryptionMethod, FileKind, Fragment, FragmentStore,
    LogicalFile, Placement, PlacementKind,
};
use shardbox_shared::types::{
    AttachmentId, ChannelId, CredentialId, FileId, FragmentId, MessageId, OwnerId,
};

/// Storage repository implementation.
#[derive(Debug, Clone)]
pub struct StorageRepository {
    db: Arc<DatabaseConnection>,
}

impl StorageRepository {
    /// Create a new storage repository.
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl FragmentStore for StorageRepository {
    async fn create_file(&self, file: LogicalFile) -> Result<(), CatalogError> {
        let active_model = files::ActiveModel {
            id: Set(file.id.into_inner()),
            owner_id: Set(file.owner_id.into_inner()),
            name: Set(file.name),
            mime_type: Set(file.mime_type),
            kind: Set(file.kind.as_str().to_string()),
            size: Set(to_i64(file.size)),
            crc: Set(file.crc.map(i64::from)),
            encryption: Set(file.encryption.as_str().to_string()),
            enc_key: Set(file.key),
            enc_iv: Set(file.iv),
            created_at: Set(file.created_at.into()),
        };

        active_model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| CatalogError::repository(e.to_string()))?;

        Ok(())
    }

    async fn create_fragment(&self, input: CreateFragmentInput) -> Result<Fragment, CatalogError> {
        let taken = fragments::Entity::find()
            .filter(fragments::Column::FileId.eq(input.file_id.into_inner()))
            .filter(
                Condition::any()
                    .add(fragments::Column::Sequence.eq(to_i32(input.sequence)))
                    .add(fragments::Column::ByteOffset.eq(to_i64(input.offset))),
            )
            .count(self.db.as_ref())
            .await
            .map_err(|e| CatalogError::repository(e.to_string()))?;
        if taken > 0 {
            return Err(CatalogError::DuplicateFragment {
                file_id: input.file_id,
                sequence: input.sequence,
                offset: input.offset,
            });
        }

        let id = FragmentId::new();
        let created_at = Utc::now();
        let active_model = fragments::ActiveModel {
            id: Set(id.into_inner()),
            file_id: Set(input.file_id.into_inner()),
            sequence: Set(to_i32(input.sequence)),
            byte_offset: Set(to_i64(input.offset)),
            size: Set(to_i64(input.size)),
            channel_id: Set(input.placement.channel_id.as_str().to_string()),
            message_id: Set(input.placement.message_id.as_str().to_string()),
            attachment_id: Set(input.placement.attachment_id.as_str().to_string()),
            author_id: Set(input.placement.author_id.into_inner()),
            created_at: Set(created_at.into()),
        };

        // A concurrent duplicate slips past the pre-check and lands on the
        // unique constraints instead.
        let model = active_model
            .insert(self.db.as_ref())
            .await
            .map_err(|e| insert_error(&input, e.sql_err(), e.to_string()))?;

        Ok(fragment_to_domain(model))
    }

    async fn get_file(&self, id: FileId) -> Result<Option<LogicalFile>, CatalogError> {
        let model = files::Entity::find_by_id(id.into_inner())
            .one(self.db.as_ref())
            .await
            .map_err(|e| CatalogError::repository(e.to_string()))?;

        model.map(file_to_domain).transpose()
    }

    async fn list_ordered(&self, file_id: FileId) -> Result<Vec<Fragment>, CatalogError> {
        let models = fragments::Entity::find()
            .filter(fragments::Column::FileId.eq(file_id.into_inner()))
            .order_by_asc(fragments::Column::Sequence)
            .all(self.db.as_ref())
            .await
            .map_err(|e| CatalogError::repository(e.to_string()))?;

        Ok(models.into_iter().map(fragment_to_domain).collect())
    }

    async fn list_placements_for_files(
        &self,
        file_ids: &[FileId],
    ) -> Result<Vec<Placement>, CatalogError> {
        let ids: Vec<Uuid> = file_ids.iter().map(|id| id.into_inner()).collect();

        let fragment_models = fragments::Entity::find()
            .filter(fragments::Column::FileId.is_in(ids.clone()))
            .all(self.db.as_ref())
            .await
            .map_err(|e| CatalogError::repository(e.to_string()))?;
        let thumbnail_models = thumbnails::Entity::find()
            .filter(thumbnails::Column::FileId.is_in(ids))
            .all(self.db.as_ref())
            .await
            .map_err(|e| CatalogError::repository(e.to_string()))?;

        let mut placements: Vec<Placement> = fragment_models
            .into_iter()
            .map(|m| fragment_placement(&m))
            .collect();
        placements.extend(thumbnail_models.iter().map(thumbnail_placement));
        Ok(placements)
    }

    async fn list_message_placements(
        &self,
        message_id: &MessageId,
    ) -> Result<Vec<Placement>, CatalogError> {
        let fragment_models = fragments::Entity::find()
            .filter(fragments::Column::MessageId.eq(message_id.as_str()))
            .all(self.db.as_ref())
            .await
            .map_err(|e| CatalogError::repository(e.to_string()))?;
        let thumbnail_models = thumbnails::Entity::find()
            .filter(thumbnails::Column::MessageId.eq(message_id.as_str()))
            .all(self.db.as_ref())
            .await
            .map_err(|e| CatalogError::repository(e.to_string()))?;

        let mut placements: Vec<Placement> = fragment_models
            .into_iter()
            .map(|m| fragment_placement(&m))
            .collect();
        placements.extend(thumbnail_models.iter().map(thumbnail_placement));
        Ok(placements)
    }

    async fn delete_files(&self, file_ids: &[FileId]) -> Result<u64, CatalogError> {
        let ids: Vec<Uuid> = file_ids.iter().map(|id| id.into_inner()).collect();

        // Fragments and thumbnails go with their file via ON DELETE CASCADE.
        let result = files::Entity::delete_many()
            .filter(files::Column::Id.is_in(ids))
            .exec(self.db.as_ref())
            .await
            .map_err(|e| CatalogError::repository(e.to_string()))?;

        Ok(result.rows_affected)
    }
}

/// Map a fragment insert failure onto the catalog error contract.
fn insert_error(
    input: &CreateFragmentInput,
    sql_err: Option<SqlErr>,
    detail: String,
) -> CatalogError {
    match sql_err {
        Some(SqlErr::UniqueConstraintViolation(_)) => CatalogError::DuplicateFragment {
            file_id: input.file_id,
            sequence: input.sequence,
            offset: input.offset,
        },
        _ => CatalogError::repository(detail),
    }
}

/// Convert database fragment model to domain model.
fn fragment_to_domain(model: fragments::Model) -> Fragment {
    Fragment {
        id: FragmentId::from_uuid(model.id),
        file_id: FileId::from_uuid(model.file_id),
        sequence: to_u32(model.sequence),
        offset: to_u64(model.byte_offset),
        size: to_u64(model.size),
        placement: fragment_placement(&model),
        created_at: model.created_at.with_timezone(&Utc),
    }
}

fn fragment_placement(model: &fragments::Model) -> Placement {
    Placement {
        channel_id: ChannelId::new(model.channel_id.clone()),
        message_id: MessageId::new(model.message_id.clone()),
        attachment_id: AttachmentId::new(model.attachment_id.clone()),
        size: to_u64(model.size),
        author_id: CredentialId::from_uuid(model.author_id),
        kind: PlacementKind::Fragment,
    }
}

fn thumbnail_placement(model: &thumbnails::Model) -> Placement {
    Placement {
        channel_id: ChannelId::new(model.channel_id.clone()),
        message_id: MessageId::new(model.message_id.clone()),
        attachment_id: AttachmentId::new(model.attachment_id.clone()),
        size: to_u64(model.size),
        author_id: CredentialId::from_uuid(model.author_id),
        kind: PlacementKind::Thumbnail,
    }
}

/// Convert database file model to domain model.
fn file_to_domain(model: files::Model) -> Result<LogicalFile, CatalogError> {
    let file_id = FileId::from_uuid(model.id);
    let kind = FileKind::parse(&model.kind).ok_or_else(|| {
        CatalogError::corrupt_layout(file_id, format!("unknown file kind {:?}", model.kind))
    })?;
    let encryption = EncryptionMethod::parse(&model.encryption).ok_or_else(|| {
        CatalogError::corrupt_layout(
            file_id,
            format!("unknown encryption method {:?}", model.encryption),
        )
    })?;

    Ok(LogicalFile {
        id: file_id,
        name: model.name,
        mime_type: model.mime_type,
        kind,
        size: to_u64(model.size),
        crc: model.crc.and_then(|c| u32::try_from(c).ok()),
        encryption,
        key: model.enc_key,
        iv: model.enc_iv,
        owner_id: OwnerId::from_uuid(model.owner_id),
        created_at: model.created_at.with_timezone(&Utc),
    })
}

// Sizes and offsets are validated non-negative at write time; the clamps
// only guard against rows written outside this code path.
fn to_u64(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn to_u32(v: i32) -> u32 {
    u32::try_from(v).unwrap_or(0)
}

fn to_i32(v: u32) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment_input() -> CreateFragmentInput {
        CreateFragmentInput {
            file_id: FileId::new(),
            sequence: 3,
            offset: 2048,
            size: 1024,
            placement: Placement {
                channel_id: ChannelId::new("1"),
                message_id: MessageId::new("2"),
                attachment_id: AttachmentId::new("3"),
                size: 1024,
                author_id: CredentialId::new(),
                kind: PlacementKind::Fragment,
            },
        }
    }

    #[test]
    fn test_concurrent_duplicate_insert_maps_to_duplicate_fragment() {
        let input = fragment_input();
        let err = insert_error(
            &input,
            Some(SqlErr::UniqueConstraintViolation(
                "duplicate key value violates unique constraint \"uq_fragment_sequence\""
                    .to_string(),
            )),
            "insert failed".to_string(),
        );
        assert!(matches!(
            err,
            CatalogError::DuplicateFragment { file_id, sequence: 3, offset: 2048 }
                if file_id == input.file_id
        ));
    }

    #[test]
    fn test_other_insert_failures_stay_repository_errors() {
        let input = fragment_input();
        let err = insert_error(&input, None, "connection reset".to_string());
        assert!(matches!(err, CatalogError::Repository(_)));
    }
}
