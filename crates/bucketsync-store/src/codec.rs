//! Metadata codec: file attributes to object metadata and back.
//!
//! Two reserved entries are always written:
//!
//! - [`MTIME_KEY`] -- original modification time as an HTTP date
//! - [`MODE_KEY`] -- original mode as an octal string with a leading `0`
//!
//! Caller attributes follow verbatim, except that empty values are dropped
//! (several stores reject or silently mangle empty metadata headers).
//!
//! Bulk listings do not return custom metadata, so [`decode_listing`] is
//! best-effort: it reports the store's own modification time and an unknown
//! mode. [`decode`] recovers the original values from a per-object fetch.

use std::collections::BTreeMap;

use bucketsync_types::{FileAttributes, FileEntry, FileMode};
use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use crate::backend::ObjectInfo;
use crate::error::{StoreError, StoreResult};
use crate::key::{KeyKind, KeyTarget};

/// Object metadata as stored: header-safe names to string values.
pub type AttributeMap = BTreeMap<String, String>;

/// Metadata name holding the original modification time.
pub const MTIME_KEY: &str = "original-last-modified";
/// Metadata name holding the original mode bits.
pub const MODE_KEY: &str = "original-file-mode";

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Format seconds since the epoch as an HTTP date (RFC 7231 IMF-fixdate).
///
/// `None` when `secs` is outside the range chrono can represent.
pub fn format_http_date(secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(secs, 0).map(|at| at.format(HTTP_DATE_FORMAT).to_string())
}

/// Parse an HTTP date written by [`format_http_date`].
pub fn parse_http_date(s: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(s.trim(), HTTP_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}

/// Octal rendering with a leading `0`; the unknown mode renders as `0`.
pub fn format_mode(mode: FileMode) -> String {
    if mode.is_unknown() {
        "0".to_string()
    } else {
        format!("0{:o}", mode.bits())
    }
}

/// Encode attributes into object metadata.
///
/// Fails with [`StoreError::InvalidMtime`] when the mtime has no calendar
/// representation.
pub fn encode(attrs: &FileAttributes) -> StoreResult<AttributeMap> {
    let mtime = format_http_date(attrs.mtime).ok_or(StoreError::InvalidMtime(attrs.mtime))?;
    let mut map: AttributeMap = attrs
        .user
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    // Reserved names win over caller attributes of the same name.
    map.insert(MTIME_KEY.to_string(), mtime);
    map.insert(MODE_KEY.to_string(), format_mode(attrs.mode));
    Ok(map)
}

/// Attributes recovered from a per-object metadata fetch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedAttributes {
    /// `None` when the entry is missing or malformed.
    pub mtime: Option<i64>,
    /// `None` when the entry is missing or malformed.
    pub mode: Option<FileMode>,
    /// Every non-reserved entry.
    pub user: AttributeMap,
}

impl DecodedAttributes {
    /// Fill gaps from listing-level values.
    pub fn into_attributes(self, fallback_mtime: i64) -> FileAttributes {
        FileAttributes {
            mtime: self.mtime.unwrap_or(fallback_mtime),
            mode: self.mode.unwrap_or_default(),
            user: self.user,
        }
    }
}

/// Decode object metadata. Malformed reserved values are logged and skipped.
pub fn decode(map: &AttributeMap) -> DecodedAttributes {
    let mut decoded = DecodedAttributes::default();
    for (name, value) in map {
        match name.as_str() {
            MTIME_KEY => {
                decoded.mtime = parse_http_date(value);
                if decoded.mtime.is_none() {
                    warn!(value = %value, "malformed mtime metadata");
                }
            }
            MODE_KEY => match FileMode::parse_octal(value) {
                Ok(mode) => decoded.mode = Some(mode),
                Err(e) => warn!(value = %value, error = %e, "malformed mode metadata"),
            },
            _ => {
                decoded.user.insert(name.clone(), value.clone());
            }
        }
    }
    decoded
}

/// Best-effort entry from a bulk listing record.
///
/// The mtime is the store's own last-modified time, not the encoded original.
/// Plain objects get the unknown mode; directory sentinels get the directory
/// type bits with no permissions.
pub fn decode_listing(info: &ObjectInfo, target: &KeyTarget) -> FileEntry {
    let (size, mode) = match target.kind {
        KeyKind::DirectorySentinel => (0, FileMode::directory(0)),
        KeyKind::Object => (info.size, FileMode::UNKNOWN),
    };
    FileEntry::new(
        target.path.as_bytes().to_vec(),
        size,
        info.last_modified.timestamp(),
        mode,
    )
}
