//! Identifier generation and parsing for uploaded images.
//!
//! Every ready image is named `<YYYYMMDD-HHMMSS>-<stem>-<hash8>`:
//!
//! - the timestamp is the upload time in UTC, so sorting ids by name sorts them by
//!   arrival and the rotation order is stable across runs;
//! - the stem is the uploader's filename with unsafe characters dropped;
//! - the hash is the first 8 hex digits of the SHA-256 of the uploaded bytes,
//!   which keeps two same-second uploads of `IMG_0001.HEIC` apart.
//!
//! ## Display Titles
//!
//! [`parse_image_id`] reverses the scheme for CLI output:
//! - `20250118-093012-Beach-Day-3fa9c2d0` → "Beach Day", uploaded 2025-01-18 09:30:12 UTC
//! - `holiday` (hand-placed file, no timestamp) → "holiday", no upload time

use crate::types::ImageId;
use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};

/// Timestamp layout at the front of generated ids.
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const TIMESTAMP_LEN: usize = 15;
const HASH_LEN: usize = 8;
const MAX_STEM_LEN: usize = 48;
const FALLBACK_STEM: &str = "upload";

/// Reduce an uploaded filename to a safe stem.
///
/// Keeps ASCII alphanumerics, `.`, `_` and `-`; drops the extension, leading
/// dots and anything else. Empty results fall back to `upload`.
pub fn sanitize_stem(original_name: &str) -> String {
    let base = original_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(original_name);
    let stem = match base.rfind('.') {
        Some(pos) if pos > 0 => &base[..pos],
        _ => base,
    };
    let cleaned: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    let truncated: String = trimmed.chars().take(MAX_STEM_LEN).collect();
    if truncated.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        truncated
    }
}

/// Build the id for an upload received at `received`.
pub fn generate_id(received: NaiveDateTime, original_name: &str, bytes: &[u8]) -> ImageId {
    let digest = format!("{:x}", Sha256::digest(bytes));
    let raw = format!(
        "{}-{}-{}",
        received.format(TIMESTAMP_FORMAT),
        sanitize_stem(original_name),
        &digest[..HASH_LEN]
    );
    ImageId::from_generated(raw)
}

/// Result of parsing an id back into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedId {
    /// Upload time, if the id carries the generated timestamp prefix.
    pub uploaded_at: Option<NaiveDateTime>,
    /// Stem between timestamp and hash; the full id for hand-placed files.
    pub name: String,
    /// Stem with dashes and underscores turned into spaces.
    pub display_title: String,
}

/// Parse an id following the `<timestamp>-<stem>-<hash8>` convention.
pub fn parse_image_id(id: &ImageId) -> ParsedId {
    let raw = id.as_str();
    let uploaded_at = raw
        .get(..TIMESTAMP_LEN)
        .and_then(|ts| NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok())
        .filter(|_| raw.as_bytes().get(TIMESTAMP_LEN) == Some(&b'-'));

    let name = match uploaded_at {
        Some(_) => {
            let rest = &raw[TIMESTAMP_LEN + 1..];
            strip_hash_suffix(rest).to_string()
        }
        None => raw.to_string(),
    };

    ParsedId {
        uploaded_at,
        display_title: name.replace(['-', '_'], " "),
        name,
    }
}

fn strip_hash_suffix(rest: &str) -> &str {
    match rest.rfind('-') {
        Some(pos)
            if rest.len() - pos - 1 == HASH_LEN
                && rest[pos + 1..].chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            &rest[..pos]
        }
        _ => rest,
    }
}
