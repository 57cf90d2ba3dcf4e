//! Wire-level shapes and header parsing for the attachment platform.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Url;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::pool::RateLimitObservation;

/// Platform error code: the channel no longer exists.
pub const ERR_UNKNOWN_CHANNEL: u64 = 10_003;
/// Platform error code: the message no longer exists.
pub const ERR_UNKNOWN_MESSAGE: u64 = 10_008;
/// Platform error code: the webhook no longer exists.
pub const ERR_UNKNOWN_WEBHOOK: u64 = 10_015;

/// A message as returned by create and fetch calls.
#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    /// Message id.
    pub id: String,
    /// Attachments carried by the message.
    #[serde(default)]
    pub attachments: Vec<AttachmentResponse>,
}

/// One attachment within a message response.
#[derive(Debug, Deserialize)]
pub struct AttachmentResponse {
    /// Attachment id, globally unique.
    pub id: String,
    /// CDN URL; carries a hex expiry in its `ex` query parameter.
    pub url: String,
    /// Stored size in bytes.
    #[serde(default)]
    pub size: u64,
}

/// Error body shape shared by 4xx responses.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    /// Platform-specific error code.
    pub code: Option<u64>,
    /// Human-readable message.
    pub message: Option<String>,
    /// Seconds to wait, present on per-route 429s.
    pub retry_after: Option<f64>,
    /// Whether a 429 applies account-wide.
    #[serde(default)]
    pub global: bool,
}

/// PATCH body replacing a message's attachment list.
#[derive(Debug, Serialize)]
pub struct PatchAttachmentsBody {
    /// Attachments to keep.
    pub attachments: Vec<AttachmentKeep>,
}

/// One kept attachment in a patch body.
#[derive(Debug, Serialize)]
pub struct AttachmentKeep {
    /// Attachment id to retain.
    pub id: String,
}

/// Extract the rate-limit window state from response headers.
#[must_use]
pub fn parse_rate_limit(headers: &HeaderMap) -> Option<RateLimitObservation> {
    let remaining: u32 = header_str(headers, "x-ratelimit-remaining")?.parse().ok()?;
    let reset: f64 = header_str(headers, "x-ratelimit-reset")?.parse().ok()?;
    #[allow(clippy::cast_possible_truncation)]
    let reset_at = DateTime::from_timestamp(reset as i64, 0)?;
    Some(RateLimitObservation {
        remaining,
        reset_at,
    })
}

/// Seconds to wait after a 429, from the body or the `Retry-After` header.
#[must_use]
pub fn retry_after(headers: &HeaderMap, body: &ErrorBody) -> Option<Duration> {
    if let Some(secs) = body.retry_after {
        if secs.is_finite() && secs >= 0.0 {
            return Some(Duration::from_secs_f64(secs));
        }
    }
    let secs: u64 = header_str(headers, "retry-after")?.parse().ok()?;
    Some(Duration::from_secs(secs))
}

/// Cache TTL for an attachment URL, from its hex `ex` expiry parameter.
///
/// Returns `None` when the parameter is missing, malformed, or already in
/// the past; callers fall back to a configured default.
#[must_use]
pub fn url_expiry_ttl(url: &str, now: DateTime<Utc>) -> Option<Duration> {
    let parsed = Url::parse(url).ok()?;
    let ex = parsed
        .query_pairs()
        .find(|(k, _)| k == "ex")
        .map(|(_, v)| v.into_owned())?;
    let expires = i64::from_str_radix(&ex, 16).ok()?;
    let expires_at = DateTime::from_timestamp(expires, 0)?;
    (expires_at - now).to_std().ok().filter(|d| !d.is_zero())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}
