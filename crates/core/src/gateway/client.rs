//! The attachment gateway: the only component that talks to the platform.
//!
//! Every API call goes out under a credential leased from the pool (or under
//! a placement's recorded author, for edits and deletes, since only the
//! author may touch its message). Rate-limit headers are folded back into
//! the pool on every completion, success or failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use moka::Expiry;
use moka::future::Cache;
use reqwest::header::{AUTHORIZATION, RANGE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use shardbox_shared::config::PlatformConfig;
use shardbox_shared::types::{AttachmentId, ChannelId, CredentialId, MessageId, OwnerId};
use tracing::{debug, warn};

use super::error::GatewayError;
use super::types::{AttachmentUpload, ByteStream, CreatedAttachment, FetchRange, MessageRef};
use super::wire::{self, AttachmentKeep, ErrorBody, MessageResponse, PatchAttachmentsBody};
use crate::catalog::Placement;
use crate::pool::{
    Credential, CredentialFilter, CredentialPool, PoolError, RateLimitObservation,
};

/// Rotation attempts for pooled calls hitting a credential-scoped 429.
const ROTATE_RETRY_LIMIT: u32 = 2;
/// Inline wait-and-retry attempts for author-bound calls.
const AUTHOR_RETRY_LIMIT: u32 = 1;
/// Longest 429 wait we absorb inline instead of surfacing to the caller.
const MAX_INLINE_WAIT: Duration = Duration::from_secs(5);
/// Block window assumed when a 429 carries no usable retry-after.
const OWNER_BLOCK_FALLBACK: Duration = Duration::from_secs(3600);
const MESSAGE_CACHE_CAPACITY: u64 = 50_000;

/// Directory of an owner's registered credentials, backed by the metadata
/// store.
pub trait CredentialDirectory: Send + Sync {
    /// All credentials registered for the owner.
    fn owner_credentials(
        &self,
        owner_id: OwnerId,
    ) -> impl std::future::Future<Output = Result<Vec<Credential>, GatewayError>> + Send;

    /// Resolve one credential by id.
    fn author(
        &self,
        id: CredentialId,
    ) -> impl std::future::Future<Output = Result<Option<Credential>, GatewayError>> + Send;
}

/// The four platform operations the rest of the engine is allowed to use.
pub trait AttachmentPlatform: Send + Sync {
    /// Stream an attachment's bytes, optionally a sub-range.
    fn fetch(
        &self,
        owner_id: OwnerId,
        placement: &Placement,
        range: Option<FetchRange>,
    ) -> impl std::future::Future<Output = Result<ByteStream, GatewayError>> + Send;

    /// Create a new message carrying one attachment.
    fn create_attachment(
        &self,
        owner_id: OwnerId,
        channel_id: &ChannelId,
        upload: AttachmentUpload,
    ) -> impl std::future::Future<Output = Result<CreatedAttachment, GatewayError>> + Send;

    /// Replace a message's attachment list with `keep`. Idempotent: a
    /// missing message or channel counts as success.
    fn patch_attachments(
        &self,
        owner_id: OwnerId,
        message: &MessageRef,
        keep: &[AttachmentId],
    ) -> impl std::future::Future<Output = Result<(), GatewayError>> + Send;

    /// Delete a message outright. Idempotent like `patch_attachments`.
    fn delete_message(
        &self,
        owner_id: OwnerId,
        message: &MessageRef,
    ) -> impl std::future::Future<Output = Result<(), GatewayError>> + Send;
}

/// Cached attachment URLs of one message, with the TTL derived from the
/// URLs' own expiry parameter.
#[derive(Clone)]
struct CachedMessage {
    urls: Arc<HashMap<AttachmentId, String>>,
    ttl: Duration,
}

struct MessageExpiry;

impl Expiry<MessageId, CachedMessage> for MessageExpiry {
    fn expire_after_create(
        &self,
        _key: &MessageId,
        value: &CachedMessage,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Concrete gateway over the platform's HTTP API.
pub struct AttachmentGateway<D> {
    client: Client,
    pool: Arc<CredentialPool>,
    directory: Arc<D>,
    messages: Cache<MessageId, CachedMessage>,
    config: PlatformConfig,
}

impl<D: CredentialDirectory> AttachmentGateway<D> {
    /// Build the gateway with its HTTP client and message cache.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Http` if the client cannot be constructed.
    pub fn new(
        config: PlatformConfig,
        pool: Arc<CredentialPool>,
        directory: Arc<D>,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        let messages = Cache::builder()
            .max_capacity(MESSAGE_CACHE_CAPACITY)
            .expire_after(MessageExpiry)
            .build();
        Ok(Self {
            client,
            pool,
            directory,
            messages,
            config,
        })
    }

    /// Lazily seed the owner's credential pool from the directory.
    async fn ensure_owner(&self, owner_id: OwnerId) -> Result<(), GatewayError> {
        if self.pool.has_owner(owner_id) {
            return Ok(());
        }
        let credentials = self.directory.owner_credentials(owner_id).await?;
        if credentials.is_empty() {
            return Err(PoolError::UnknownOwner(owner_id).into());
        }
        self.pool.seed_owner(owner_id, credentials);
        Ok(())
    }

    fn channel_messages_url(&self, channel_id: &ChannelId) -> String {
        format!("{}/channels/{channel_id}/messages", self.config.base_url)
    }

    fn message_url(&self, channel_id: &ChannelId, message_id: &MessageId) -> String {
        format!(
            "{}/channels/{channel_id}/messages/{message_id}",
            self.config.base_url
        )
    }

    fn webhook_message_url(webhook_url: &str, message_id: &MessageId) -> String {
        format!("{webhook_url}/messages/{message_id}")
    }

    fn bot_auth(request: RequestBuilder, token: &str) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("Bot {token}"))
    }

    /// Send one request under a pooled credential, rotating to a different
    /// credential on credential-scoped 429s and revoked tokens.
    async fn send_pooled<F>(
        &self,
        owner_id: OwnerId,
        filter: CredentialFilter,
        build: F,
    ) -> Result<(Response, CredentialId), GatewayError>
    where
        F: Fn(&Credential) -> RequestBuilder,
    {
        self.ensure_owner(owner_id).await?;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let lease = self.pool.acquire_filtered(owner_id, filter).await?;
            let credential_id = lease.credential_id();
            let sent = build(lease.credential()).send().await;
            let response = match sent {
                Ok(response) => {
                    self.observe(owner_id, credential_id, &response);
                    drop(lease);
                    response
                }
                Err(err) => return Err(err.into()),
            };
            match self.classify(owner_id, credential_id, response).await {
                Ok(response) => return Ok((response, credential_id)),
                Err(
                    err @ (GatewayError::RateLimited { .. }
                    | GatewayError::AuthorizationRejected(_)),
                ) if attempt <= ROTATE_RETRY_LIMIT => {
                    debug!(%credential_id, %err, attempt, "rotating credential");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Send one request under a specific (author) credential, absorbing
    /// short credential-scoped 429 waits inline.
    async fn send_as_author(
        &self,
        owner_id: OwnerId,
        credential_id: CredentialId,
        request: RequestBuilder,
    ) -> Result<Response, GatewayError> {
        let mut attempt = 0u32;
        let mut request = request;
        loop {
            attempt += 1;
            let retry = request.try_clone();
            let response = request.send().await?;
            self.observe(owner_id, credential_id, &response);
            match self.classify(owner_id, credential_id, response).await {
                Ok(response) => return Ok(response),
                Err(GatewayError::RateLimited { retry_after_secs }) => {
                    let wait = Duration::from_secs(retry_after_secs);
                    match retry {
                        Some(next) if attempt <= AUTHOR_RETRY_LIMIT && wait <= MAX_INLINE_WAIT => {
                            tokio::time::sleep(wait).await;
                            request = next;
                        }
                        _ => return Err(GatewayError::RateLimited { retry_after_secs }),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn observe(&self, owner_id: OwnerId, credential_id: CredentialId, response: &Response) {
        if let Some(observation) = wire::parse_rate_limit(response.headers()) {
            self.pool.observe(owner_id, credential_id, observation);
        }
    }

    /// Map a platform response onto the gateway error taxonomy.
    async fn classify(
        &self,
        owner_id: OwnerId,
        credential_id: CredentialId,
        response: Response,
    ) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                warn!(%credential_id, %status, "credential rejected");
                self.pool.mark_revoked(owner_id, credential_id);
                Err(GatewayError::AuthorizationRejected(credential_id))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let headers = response.headers().clone();
                let body: ErrorBody = response.json().await.unwrap_or_default();
                let retry_after = wire::retry_after(&headers, &body);
                match retry_after {
                    Some(wait) if !body.global => {
                        // Credential-scoped: zero its budget until the window passes.
                        let reset_at = Utc::now()
                            + chrono::Duration::from_std(wait)
                                .unwrap_or_else(|_| chrono::Duration::zero());
                        self.pool.observe(
                            owner_id,
                            credential_id,
                            RateLimitObservation {
                                remaining: 0,
                                reset_at,
                            },
                        );
                        Err(GatewayError::RateLimited {
                            retry_after_secs: wait.as_secs().max(1),
                        })
                    }
                    _ => {
                        let wait = retry_after.unwrap_or(OWNER_BLOCK_FALLBACK);
                        self.pool.mark_blocked(owner_id, wait);
                        Err(PoolError::OwnerBlocked {
                            owner_id,
                            retry_after_secs: wait.as_secs().max(1),
                        }
                        .into())
                    }
                }
            }
            StatusCode::NOT_FOUND => {
                let body: ErrorBody = response.json().await.unwrap_or_default();
                match body.code {
                    Some(wire::ERR_UNKNOWN_WEBHOOK) => {
                        self.pool.mark_revoked(owner_id, credential_id);
                        Err(GatewayError::WebhookRevoked(credential_id))
                    }
                    Some(wire::ERR_UNKNOWN_CHANNEL | wire::ERR_UNKNOWN_MESSAGE) => {
                        Err(GatewayError::PlacementNotFound(
                            body.message
                                .unwrap_or_else(|| "unknown channel or message".to_string()),
                        ))
                    }
                    _ => Err(GatewayError::PlacementNotFound(
                        body.message.unwrap_or_else(|| "not found".to_string()),
                    )),
                }
            }
            _ => {
                let detail: String = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(200)
                    .collect();
                Err(GatewayError::Platform {
                    status: status.as_u16(),
                    detail,
                })
            }
        }
    }

    /// Fetch (through the cache) the attachment URLs of one message.
    async fn message_urls(
        &self,
        owner_id: OwnerId,
        placement: &Placement,
    ) -> Result<Arc<HashMap<AttachmentId, String>>, GatewayError> {
        if let Some(cached) = self.messages.get(&placement.message_id).await {
            return Ok(cached.urls);
        }

        let author = self.directory.author(placement.author_id).await?;
        let response = match &author {
            Some(Credential::Webhook { id, url }) => {
                let request = self
                    .client
                    .get(Self::webhook_message_url(url, &placement.message_id));
                self.send_as_author(owner_id, *id, request).await?
            }
            // Bot-authored (or author unknown): any pooled bot can read it.
            _ => {
                let url = self.message_url(&placement.channel_id, &placement.message_id);
                let (response, _) = self
                    .send_pooled(owner_id, CredentialFilter::BotsOnly, |credential| {
                        match credential {
                            Credential::Bot { token, .. } => {
                                Self::bot_auth(self.client.get(&url), token)
                            }
                            Credential::Webhook { .. } => self.client.get(&url),
                        }
                    })
                    .await?;
                response
            }
        };

        let message: MessageResponse = response.json().await?;
        Ok(self.cache_message(placement.message_id.clone(), &message).await)
    }

    /// Insert a message's attachment URLs into the cache; TTL comes from the
    /// first URL carrying a parseable expiry, else the configured fallback.
    async fn cache_message(
        &self,
        message_id: MessageId,
        message: &MessageResponse,
    ) -> Arc<HashMap<AttachmentId, String>> {
        let now = Utc::now();
        let ttl = message
            .attachments
            .iter()
            .find_map(|a| wire::url_expiry_ttl(&a.url, now))
            .unwrap_or(Duration::from_secs(self.config.fallback_cache_ttl_secs));
        let urls: Arc<HashMap<AttachmentId, String>> = Arc::new(
            message
                .attachments
                .iter()
                .map(|a| (AttachmentId::from(a.id.as_str()), a.url.clone()))
                .collect(),
        );
        self.messages
            .insert(
                message_id,
                CachedMessage {
                    urls: Arc::clone(&urls),
                    ttl,
                },
            )
            .await;
        urls
    }

    /// GET the CDN URL, refreshing the cached message once if the URL went
    /// stale before its advertised expiry.
    async fn fetch_cdn(
        &self,
        owner_id: OwnerId,
        placement: &Placement,
        range: Option<FetchRange>,
    ) -> Result<Response, GatewayError> {
        for refresh in [false, true] {
            if refresh {
                self.messages.invalidate(&placement.message_id).await;
            }
            let urls = self.message_urls(owner_id, placement).await?;
            let url = urls.get(&placement.attachment_id).ok_or_else(|| {
                GatewayError::PlacementNotFound(format!(
                    "attachment {} absent from message {}",
                    placement.attachment_id, placement.message_id
                ))
            })?;

            let mut request = self.client.get(url);
            if let Some(range) = range {
                request = request.header(RANGE, range.header_value());
            }
            let response = request.send().await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            if !refresh && matches!(status, StatusCode::FORBIDDEN | StatusCode::NOT_FOUND) {
                debug!(message_id = %placement.message_id, %status, "stale cdn url, refreshing");
                continue;
            }
            return Err(GatewayError::Platform {
                status: status.as_u16(),
                detail: "cdn fetch failed".to_string(),
            });
        }
        unreachable!("loop returns on second iteration")
    }
}

impl<D: CredentialDirectory> AttachmentPlatform for AttachmentGateway<D> {
    async fn fetch(
        &self,
        owner_id: OwnerId,
        placement: &Placement,
        range: Option<FetchRange>,
    ) -> Result<ByteStream, GatewayError> {
        let response = self.fetch_cdn(owner_id, placement, range).await?;
        Ok(response
            .bytes_stream()
            .map_err(GatewayError::from)
            .boxed())
    }

    async fn create_attachment(
        &self,
        owner_id: OwnerId,
        channel_id: &ChannelId,
        upload: AttachmentUpload,
    ) -> Result<CreatedAttachment, GatewayError> {
        let create_url = self.channel_messages_url(channel_id);
        let upload_timeout = Duration::from_secs(self.config.upload_timeout_secs);

        let (response, author_id) = self
            .send_pooled(owner_id, CredentialFilter::Any, |credential| {
                let size = upload.bytes.len() as u64;
                let part = reqwest::multipart::Part::stream_with_length(
                    reqwest::Body::from(upload.bytes.clone()),
                    size,
                )
                .file_name(upload.filename.clone());
                let form = reqwest::multipart::Form::new().part("files[0]", part);
                let request = match credential {
                    Credential::Bot { token, .. } => {
                        Self::bot_auth(self.client.post(&create_url), token)
                    }
                    Credential::Webhook { url, .. } => self.client.post(format!("{url}?wait=true")),
                };
                request.multipart(form).timeout(upload_timeout)
            })
            .await?;

        let message: MessageResponse = response.json().await?;
        let message_id = MessageId::from(message.id.as_str());
        let attachment = message.attachments.first().ok_or(GatewayError::Platform {
            status: 200,
            detail: "created message carries no attachment".to_string(),
        })?;
        let created = CreatedAttachment {
            message_id: message_id.clone(),
            attachment_id: AttachmentId::from(attachment.id.as_str()),
            size: attachment.size,
            author_id,
        };
        self.cache_message(message_id, &message).await;
        Ok(created)
    }

    async fn patch_attachments(
        &self,
        owner_id: OwnerId,
        message: &MessageRef,
        keep: &[AttachmentId],
    ) -> Result<(), GatewayError> {
        let author = self
            .directory
            .author(message.author_id)
            .await?
            .ok_or(GatewayError::UnknownAuthor(message.author_id))?;
        let body = PatchAttachmentsBody {
            attachments: keep
                .iter()
                .map(|id| AttachmentKeep { id: id.to_string() })
                .collect(),
        };
        let request = match &author {
            Credential::Bot { token, .. } => Self::bot_auth(
                self.client
                    .patch(self.message_url(&message.channel_id, &message.message_id)),
                token,
            ),
            Credential::Webhook { url, .. } => self
                .client
                .patch(Self::webhook_message_url(url, &message.message_id)),
        }
        .json(&body);

        let result = self.send_as_author(owner_id, author.id(), request).await;
        self.messages.invalidate(&message.message_id).await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_already_absent() => {
                debug!(message_id = %message.message_id, "patch target already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn delete_message(
        &self,
        owner_id: OwnerId,
        message: &MessageRef,
    ) -> Result<(), GatewayError> {
        let author = self
            .directory
            .author(message.author_id)
            .await?
            .ok_or(GatewayError::UnknownAuthor(message.author_id))?;
        let request = match &author {
            Credential::Bot { token, .. } => Self::bot_auth(
                self.client
                    .delete(self.message_url(&message.channel_id, &message.message_id)),
                token,
            ),
            Credential::Webhook { url, .. } => self
                .client
                .delete(Self::webhook_message_url(url, &message.message_id)),
        };

        let result = self.send_as_author(owner_id, author.id(), request).await;
        let result = match result {
            // The author lost access but another bot may still hold the
            // manage-messages permission; try once with a pooled alternate.
            Err(GatewayError::AuthorizationRejected(_)) if author.is_bot() => {
                let url = self.message_url(&message.channel_id, &message.message_id);
                self.send_pooled(owner_id, CredentialFilter::BotsOnly, |credential| {
                    match credential {
                        Credential::Bot { token, .. } => {
                            Self::bot_auth(self.client.delete(&url), token)
                        }
                        Credential::Webhook { .. } => self.client.delete(&url),
                    }
                })
                .await
                .map(|(response, _)| response)
            }
            other => other,
        };

        self.messages.invalidate(&message.message_id).await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_already_absent() => {
                debug!(message_id = %message.message_id, "delete target already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
