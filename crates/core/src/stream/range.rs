//! Byte-range parsing and fragment entry resolution.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

use super::error::StreamError;
use crate::catalog::{FileKind, Fragment, LogicalFile};

/// A requested byte range, half-open when `end` is omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First requested byte.
    pub start: u64,
    /// Last requested byte, inclusive, if bounded.
    pub end: Option<u64>,
}

/// A range clamped against a concrete file size; both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    /// First byte to serve; also the global cipher offset.
    pub start: u64,
    /// Last byte to serve, inclusive.
    pub end: u64,
}

impl ResolvedRange {
    /// Number of bytes the response will carry.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// A resolved range is never empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }
}

/// Parse a `Range` header value of the form `bytes=start-` or
/// `bytes=start-end`.
///
/// Multi-range and suffix (`bytes=-n`) forms are not served; both parse as
/// invalid and callers fall back to a full response.
///
/// # Errors
///
/// Returns `StreamError::InvalidRange`.
pub fn parse_range_header(value: &str) -> Result<ByteRange, StreamError> {
    let invalid = || StreamError::InvalidRange(value.to_string());

    let spec = value.strip_prefix("bytes=").ok_or_else(invalid)?.trim();
    if spec.contains(',') {
        return Err(invalid());
    }
    let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
    let start: u64 = start.trim().parse().map_err(|_| invalid())?;
    let end = match end.trim() {
        "" => None,
        e => Some(e.parse::<u64>().map_err(|_| invalid())?),
    };
    if let Some(end) = end {
        if end < start {
            return Err(invalid());
        }
    }
    Ok(ByteRange { start, end })
}

/// Clamp a parsed range against the file size.
///
/// # Errors
///
/// Returns `StreamError::Unsatisfiable` when the start lies at or beyond
/// the end of the file.
pub fn resolve_range(range: ByteRange, size: u64) -> Result<ResolvedRange, StreamError> {
    if size == 0 || range.start >= size {
        return Err(StreamError::Unsatisfiable {
            start: range.start,
            size,
        });
    }
    let end = range.end.map_or(size - 1, |e| e.min(size - 1));
    Ok(ResolvedRange {
        start: range.start,
        end,
    })
}

/// The fragment a byte position lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Index into the ordered fragment list.
    pub index: usize,
    /// Offset of the position within that fragment.
    pub intra_offset: u64,
}

/// Walk the ordered fragment list to find where `start` lands.
///
/// The cipher is NOT positioned at `intra_offset`; keystream alignment
/// depends on the global file position, which is `start` itself.
#[must_use]
pub fn resolve_entry(fragments: &[Fragment], start: u64) -> Option<Entry> {
    let mut consumed: u64 = 0;
    for (index, fragment) in fragments.iter().enumerate() {
        if start < consumed + fragment.size {
            return Some(Entry {
                index,
                intra_offset: start - consumed,
            });
        }
        consumed += fragment.size;
    }
    None
}

/// One month, the cache lifetime for immutable binary content.
const BINARY_MAX_AGE_SECS: u64 = 2_628_000;

/// RFC 5987 attr-char: everything outside the listed set is pct-encoded.
const ATTR_CHARS: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

/// Everything the HTTP layer needs to shape a streaming response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePlan {
    /// 200 for full responses, 206 for partial.
    pub status: u16,
    /// Exact number of body bytes.
    pub content_length: u64,
    /// `Content-Range` value, present iff partial.
    pub content_range: Option<String>,
    /// `Content-Type` value.
    pub content_type: String,
    /// `Cache-Control` value.
    pub cache_control: String,
    /// `Content-Disposition` value with RFC 5987 encoded filename.
    pub content_disposition: String,
}

impl ResponsePlan {
    /// Build the header plan for serving `resolved` out of `file`.
    ///
    /// `partial` distinguishes a range response from a full one; `inline`
    /// picks the disposition (stream in the browser vs download).
    #[must_use]
    pub fn build(file: &LogicalFile, resolved: ResolvedRange, partial: bool, inline: bool) -> Self {
        let cache_control = if file.kind == FileKind::Text {
            "no-cache".to_string()
        } else {
            format!("public, max-age={BINARY_MAX_AGE_SECS}")
        };
        let disposition = if inline { "inline" } else { "attachment" };
        let filename = utf8_percent_encode(&file.name, ATTR_CHARS);
        Self {
            status: if partial { 206 } else { 200 },
            content_length: resolved.len(),
            content_range: partial.then(|| {
                format!("bytes {}-{}/{}", resolved.start, resolved.end, file.size)
            }),
            content_type: file.mime_type.clone(),
            cache_control,
            content_disposition: format!("{disposition}; filename*=UTF-8''{filename}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rstest::rstest;
    use shardbox_shared::types::{CredentialId, FileId, FragmentId, OwnerId};

    use super::*;
    use crate::catalog::{EncryptionMethod, Placement, PlacementKind};

    fn fragments(sizes: &[u64]) -> Vec<Fragment> {
        let file_id = FileId::new();
        let mut offset = 0;
        sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                let f = Fragment {
                    id: FragmentId::new(),
                    file_id,
                    sequence: u32::try_from(i + 1).unwrap(),
                    offset,
                    size,
                    placement: Placement {
                        channel_id: "1".into(),
                        message_id: format!("m{i}").as_str().into(),
                        attachment_id: format!("a{i}").as_str().into(),
                        size,
                        author_id: CredentialId::new(),
                        kind: PlacementKind::Fragment,
                    },
                    created_at: Utc::now(),
                };
                offset += size;
                f
            })
            .collect()
    }

    #[rstest]
    #[case("bytes=0-", 0, None)]
    #[case("bytes=150-199", 150, Some(199))]
    #[case("bytes= 5-9", 5, Some(9))]
    fn test_parse_range_header(
        #[case] value: &str,
        #[case] start: u64,
        #[case] end: Option<u64>,
    ) {
        assert_eq!(
            parse_range_header(value).unwrap(),
            ByteRange { start, end }
        );
    }

    #[rstest]
    #[case("bytes=-500")]
    #[case("bytes=10-5")]
    #[case("bytes=0-5,10-20")]
    #[case("items=0-5")]
    #[case("bytes=abc-")]
    fn test_parse_range_header_rejects(#[case] value: &str) {
        assert!(matches!(
            parse_range_header(value),
            Err(StreamError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_resolve_range_clamps_end() {
        let r = resolve_range(
            ByteRange {
                start: 10,
                end: Some(10_000),
            },
            100,
        )
        .unwrap();
        assert_eq!(r, ResolvedRange { start: 10, end: 99 });
        assert_eq!(r.len(), 90);
    }

    #[test]
    fn test_resolve_range_unsatisfiable() {
        let err = resolve_range(ByteRange { start: 100, end: None }, 100).unwrap_err();
        assert!(matches!(err, StreamError::Unsatisfiable { start: 100, size: 100 }));
    }

    #[test]
    fn test_resolve_entry_mid_fragment() {
        // 100/100/50: byte 150 lands halfway into the second fragment.
        let frags = fragments(&[100, 100, 50]);
        let entry = resolve_entry(&frags, 150).unwrap();
        assert_eq!(entry, Entry { index: 1, intra_offset: 50 });
    }

    #[test]
    fn test_resolve_entry_exact_boundary() {
        // Byte 150 is the first byte of the third fragment: remainder 0.
        let frags = fragments(&[100, 50, 50]);
        let entry = resolve_entry(&frags, 150).unwrap();
        assert_eq!(entry, Entry { index: 2, intra_offset: 0 });
    }

    #[test]
    fn test_resolve_entry_first_and_last_byte() {
        let frags = fragments(&[100, 100]);
        assert_eq!(resolve_entry(&frags, 0).unwrap(), Entry { index: 0, intra_offset: 0 });
        assert_eq!(
            resolve_entry(&frags, 99).unwrap(),
            Entry { index: 0, intra_offset: 99 }
        );
        assert_eq!(
            resolve_entry(&frags, 199).unwrap(),
            Entry { index: 1, intra_offset: 99 }
        );
        assert_eq!(resolve_entry(&frags, 200), None);
    }

    fn file(kind: FileKind, name: &str, size: u64) -> LogicalFile {
        LogicalFile {
            id: FileId::new(),
            name: name.to_string(),
            mime_type: "application/octet-stream".to_string(),
            kind,
            size,
            crc: None,
            encryption: EncryptionMethod::None,
            key: None,
            iv: None,
            owner_id: OwnerId::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_response_plan_partial() {
        let f = file(FileKind::Video, "clip.mp4", 250);
        let plan = ResponsePlan::build(&f, ResolvedRange { start: 150, end: 199 }, true, true);
        assert_eq!(plan.status, 206);
        assert_eq!(plan.content_length, 50);
        assert_eq!(plan.content_range.as_deref(), Some("bytes 150-199/250"));
        assert_eq!(plan.cache_control, "public, max-age=2628000");
        assert_eq!(plan.content_disposition, "inline; filename*=UTF-8''clip.mp4");
    }

    #[test]
    fn test_response_plan_full_text_no_cache() {
        let f = file(FileKind::Text, "notes café.txt", 10);
        let plan = ResponsePlan::build(&f, ResolvedRange { start: 0, end: 9 }, false, false);
        assert_eq!(plan.status, 200);
        assert_eq!(plan.content_range, None);
        assert_eq!(plan.cache_control, "no-cache");
        assert_eq!(
            plan.content_disposition,
            "attachment; filename*=UTF-8''notes%20caf%C3%A9.txt"
        );
    }
}
