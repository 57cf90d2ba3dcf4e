//! File upload, streaming, and deletion routes.

use axum::{
    Json, Router,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use bytes::Bytes;
use futures::StreamExt;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{AppState, error::ApiError};
use shardbox_core::catalog::{
    CatalogService, EncryptionMethod, FileKind, FragmentStore, LogicalFile, PlacementKind,
};
use shardbox_core::cipher::StreamDecryptor;
use shardbox_core::gateway::AttachmentPlatform;
use shardbox_core::gc::GcService;
use shardbox_core::stream::{ByteRange, FileStreamer, ResponsePlan, parse_range_header, resolve_range};
use shardbox_core::upload::{NewFileUpload, UploadService};
use shardbox_shared::AppError;
use shardbox_shared::types::{ChannelId, FileId, OwnerId};

/// Default stored bytes per fragment when the client does not pick one.
const DEFAULT_FRAGMENT_SIZE: u64 = 8 * 1024 * 1024;

/// Thumbnails are transcoded before storage and always served as WebP.
const THUMBNAIL_CONTENT_TYPE: &str = "image/webp";

/// Creates the file routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/owners/{owner_id}/channels/{channel_id}/files",
            post(upload_file),
        )
        .route("/files/{file_id}", get(stream_file))
        .route("/files/{file_id}", delete(delete_file))
        .route("/files/{file_id}/info", get(get_file_info))
        .route("/files/{file_id}/thumbnail", get(stream_thumbnail))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for the streaming route.
#[derive(Debug, Deserialize)]
struct StreamQuery {
    /// Serve with `attachment` disposition instead of `inline`.
    #[serde(default)]
    download: bool,
}

/// Response for a stored file.
#[derive(Debug, Serialize)]
pub struct FileResponse {
    /// File ID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// Content classification.
    pub kind: String,
    /// Size in bytes.
    pub size: u64,
    /// CRC32 of the plaintext, when recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crc: Option<u32>,
    /// Encryption method applied to the stored bytes.
    pub encryption: String,
    /// Number of fragments the file is split into.
    pub fragments: usize,
    /// Created at timestamp (ISO 8601).
    pub created_at: String,
}

impl FileResponse {
    fn new(file: &LogicalFile, fragments: usize) -> Self {
        Self {
            id: file.id.into_inner(),
            name: file.name.clone(),
            mime_type: file.mime_type.clone(),
            kind: file.kind.as_str().to_string(),
            size: file.size,
            crc: file.crc,
            encryption: file.encryption.as_str().to_string(),
            fragments,
            created_at: file.created_at.to_rfc3339(),
        }
    }
}

/// Response for a deletion pass.
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    /// Messages the pass touched.
    pub messages_processed: usize,
    /// Messages deleted outright.
    pub messages_deleted: usize,
    /// Messages patched down to survivors.
    pub messages_patched: usize,
    /// Messages skipped (revoked webhook author).
    pub messages_skipped: usize,
    /// Per-message failures left for a later pass.
    pub failures: Vec<DeleteFailure>,
    /// Catalog rows removed.
    pub rows_deleted: u64,
}

/// One message the deletion pass could not reconcile.
#[derive(Debug, Serialize)]
pub struct DeleteFailure {
    /// Platform message ID.
    pub message_id: String,
    /// What went wrong.
    pub error: String,
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Classify content from its MIME type.
fn kind_from_mime(mime: &str) -> FileKind {
    let prefix = mime.split('/').next().unwrap_or("");
    match prefix {
        "text" => FileKind::Text,
        "image" => FileKind::Image,
        "audio" => FileKind::Audio,
        "video" => FileKind::Video,
        _ => FileKind::Other,
    }
}

/// Generate key material for the chosen encryption method.
///
/// AES-CTR gets a 256-bit key with a 16-byte IV; ChaCha20 a 256-bit key
/// with a 12-byte nonce.
fn key_material(method: EncryptionMethod) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
    let iv_len = match method {
        EncryptionMethod::None => return (None, None),
        EncryptionMethod::AesCtr => 16,
        EncryptionMethod::ChaCha20 => 12,
    };
    let mut key = vec![0u8; 32];
    let mut iv = vec![0u8; iv_len];
    rand::rngs::OsRng.fill_bytes(&mut key);
    rand::rngs::OsRng.fill_bytes(&mut iv);
    (Some(key), Some(iv))
}

fn validation(msg: impl Into<String>) -> ApiError {
    ApiError(AppError::Validation(msg.into()))
}

// ============================================================================
// Route Handlers
// ============================================================================

/// POST `/owners/{owner_id}/channels/{channel_id}/files`
/// Upload a file: chunk, encrypt, send, record.
async fn upload_file(
    State(state): State<AppState>,
    Path((owner_id, channel_id)): Path<(Uuid, String)>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let owner_id = OwnerId::from_uuid(owner_id);
    let channel_id = ChannelId::new(channel_id);

    let mut name = None;
    let mut mime_type = None;
    let mut data: Option<Bytes> = None;
    let mut encryption = EncryptionMethod::None;
    let mut fragment_size = DEFAULT_FRAGMENT_SIZE;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| validation(e.to_string()))?
    {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "file" => {
                name = field.file_name().map(str::to_string);
                mime_type = field.content_type().map(str::to_string);
                data = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| validation(e.to_string()))?,
                );
            }
            "encryption" => {
                let text = field.text().await.map_err(|e| validation(e.to_string()))?;
                encryption = EncryptionMethod::parse(&text)
                    .ok_or_else(|| validation(format!("unknown encryption method {text:?}")))?;
            }
            "fragment_size" => {
                let text = field.text().await.map_err(|e| validation(e.to_string()))?;
                fragment_size = text
                    .parse()
                    .map_err(|_| validation(format!("invalid fragment size {text:?}")))?;
            }
            other => {
                return Err(validation(format!("unexpected field {other:?}")));
            }
        }
    }

    let data = data.ok_or_else(|| validation("missing file part"))?;
    let name = name.unwrap_or_else(|| "upload.bin".to_string());
    let mime_type = mime_type.unwrap_or_else(|| "application/octet-stream".to_string());
    let kind = kind_from_mime(&mime_type);
    let (key, iv) = key_material(encryption);

    let service = UploadService::new(
        CatalogService::new(state.storage.clone()),
        state.gateway.clone(),
    );
    let uploaded = service
        .upload(
            owner_id,
            &channel_id,
            NewFileUpload {
                name,
                mime_type,
                kind,
                encryption,
                key,
                iv,
                data,
                fragment_size,
            },
        )
        .await?;

    info!(
        file_id = %uploaded.file.id,
        owner_id = %owner_id,
        size = uploaded.file.size,
        fragments = uploaded.fragments.len(),
        "File uploaded"
    );

    let body = FileResponse::new(&uploaded.file, uploaded.fragments.len());
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// GET `/files/{file_id}`
/// Stream a file's decrypted bytes, honoring single-range `Range` headers.
async fn stream_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let file_id = FileId::from_uuid(file_id);
    let catalog = CatalogService::new(state.storage.clone());
    let (file, fragments) = catalog.file_for_read(file_id).await?;

    // Unservable range forms (suffix, multi-range, garbage) fall back to a
    // full response rather than failing the request.
    let requested = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| match parse_range_header(v) {
            Ok(range) => Some(range),
            Err(e) => {
                debug!(file_id = %file_id, error = %e, "Unservable range header, serving full file");
                None
            }
        });
    let partial = requested.is_some();
    let range = requested.unwrap_or(ByteRange {
        start: 0,
        end: None,
    });

    let resolved = resolve_range(range, file.size)?;
    let plan = ResponsePlan::build(&file, resolved, partial, !query.download);

    let streamer = FileStreamer::new(state.gateway.clone());
    let stream = streamer.stream(file.owner_id, &file, fragments, resolved)?;

    debug!(
        file_id = %file_id,
        status = plan.status,
        start = resolved.start,
        end = resolved.end,
        "Streaming file"
    );

    let mut builder = Response::builder()
        .status(StatusCode::from_u16(plan.status).unwrap_or(StatusCode::OK))
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, plan.content_type.as_str())
        .header(header::CONTENT_LENGTH, plan.content_length)
        .header(header::CACHE_CONTROL, plan.cache_control.as_str())
        .header(header::CONTENT_DISPOSITION, plan.content_disposition.as_str());
    if let Some(content_range) = &plan.content_range {
        builder = builder.header(header::CONTENT_RANGE, content_range.as_str());
    }

    builder
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError(AppError::Internal(e.to_string())))
}

/// GET `/files/{file_id}/info`
/// File metadata without the bytes.
async fn get_file_info(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<Json<FileResponse>, ApiError> {
    let file_id = FileId::from_uuid(file_id);
    let catalog = CatalogService::new(state.storage.clone());
    let (file, fragments) = catalog.file_for_read(file_id).await?;

    Ok(Json(FileResponse::new(&file, fragments.len())))
}

/// GET `/files/{file_id}/thumbnail`
/// Serve the file's thumbnail whole, decrypted from offset zero.
async fn stream_thumbnail(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let file_id = FileId::from_uuid(file_id);
    let catalog = CatalogService::new(state.storage.clone());
    let file = catalog
        .store()
        .get_file(file_id)
        .await?
        .ok_or_else(|| ApiError(AppError::NotFound(format!("file not found: {file_id}"))))?;

    let placements = catalog
        .store()
        .list_placements_for_files(&[file_id])
        .await?;
    let placement = placements
        .into_iter()
        .find(|p| p.kind == PlacementKind::Thumbnail)
        .ok_or_else(|| ApiError(AppError::NotFound(format!("no thumbnail for {file_id}"))))?;

    let mut cipher = StreamDecryptor::new(
        file.encryption,
        file.key.as_deref(),
        file.iv.as_deref(),
        0,
    )?;
    let size = placement.size;
    let stream = state
        .gateway
        .fetch(file.owner_id, &placement, None)
        .await?
        .map(move |chunk| {
            chunk.map(|bytes| {
                let mut data = bytes.to_vec();
                cipher.apply(&mut data);
                Bytes::from(data)
            })
        });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, THUMBNAIL_CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, size)
        .header(header::CACHE_CONTROL, "public, max-age=2628000")
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError(AppError::Internal(e.to_string())))
}

/// DELETE `/files/{file_id}`
/// Remove a file: reconcile its platform messages, then drop its rows.
async fn delete_file(
    State(state): State<AppState>,
    Path(file_id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let file_id = FileId::from_uuid(file_id);
    let catalog = CatalogService::new(state.storage.clone());
    let file = catalog
        .store()
        .get_file(file_id)
        .await?
        .ok_or_else(|| ApiError(AppError::NotFound(format!("file not found: {file_id}"))))?;

    let gc = GcService::new(state.storage.clone(), state.gateway.clone());
    let report = gc.collect_files(file.owner_id, &[file_id]).await?;

    info!(
        file_id = %file_id,
        deleted = report.messages_deleted,
        patched = report.messages_patched,
        skipped = report.messages_skipped,
        failures = report.failures.len(),
        clean = report.is_clean(),
        "File deleted"
    );

    Ok(Json(DeleteResponse {
        messages_processed: report.messages_processed,
        messages_deleted: report.messages_deleted,
        messages_patched: report.messages_patched,
        messages_skipped: report.messages_skipped,
        failures: report
            .failures
            .into_iter()
            .map(|f| DeleteFailure {
                message_id: f.message_id.as_str().to_string(),
                error: f.error,
            })
            .collect(),
        rows_deleted: report.rows_deleted,
    }))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("text/plain", FileKind::Text)]
    #[case("image/png", FileKind::Image)]
    #[case("audio/ogg", FileKind::Audio)]
    #[case("video/mp4", FileKind::Video)]
    #[case("application/pdf", FileKind::Other)]
    #[case("garbage", FileKind::Other)]
    fn test_kind_from_mime(#[case] mime: &str, #[case] expected: FileKind) {
        assert_eq!(kind_from_mime(mime), expected);
    }

    #[test]
    fn test_key_material_sizes() {
        assert_eq!(key_material(EncryptionMethod::None), (None, None));

        let (key, iv) = key_material(EncryptionMethod::AesCtr);
        assert_eq!(key.as_ref().map(Vec::len), Some(32));
        assert_eq!(iv.as_ref().map(Vec::len), Some(16));

        let (key, iv) = key_material(EncryptionMethod::ChaCha20);
        assert_eq!(key.as_ref().map(Vec::len), Some(32));
        assert_eq!(iv.as_ref().map(Vec::len), Some(12));
    }

    #[test]
    fn test_key_material_is_not_constant() {
        let (a, _) = key_material(EncryptionMethod::AesCtr);
        let (b, _) = key_material(EncryptionMethod::AesCtr);
        assert_ne!(a, b);
    }
}
