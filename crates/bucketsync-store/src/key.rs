//! Mapping between relative tree paths and object keys.
//!
//! Keys are `<prefix>/<cleaned relative path>`. Cleaning collapses repeated
//! separators, drops `.` components and resolves `..`; a path that would
//! climb above the prefix is rejected rather than clamped. The tree root
//! (`.`) maps to the prefix itself.
//!
//! ASCII control characters are rejected everywhere: the object store's
//! path type refuses them, so such a key could be written by nobody and
//! listed by nobody.

use crate::error::{StoreError, StoreResult};

/// Reserved file name marking a directory sentinel object.
pub const SENTINEL_NAME: &str = "...";

/// Relative path of the mirrored tree's root.
pub const ROOT_PATH: &str = ".";

/// How a listed key should be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    /// A content object at `path`.
    Object,
    /// The sentinel of the directory at `path`.
    DirectorySentinel,
}

/// The logical target of an object key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyTarget {
    pub path: String,
    pub kind: KeyKind,
}

fn check_printable(path: &str) -> StoreResult<()> {
    match path.chars().find(char::is_ascii_control) {
        Some(c) => Err(StoreError::InvalidPath {
            path: path.to_string(),
            reason: format!("control character {c:?} in path"),
        }),
        None => Ok(()),
    }
}

/// Normalize a configured prefix: no leading, trailing or repeated `/`.
pub fn normalize_prefix(prefix: &str) -> StoreResult<String> {
    check_printable(prefix)?;
    let mut parts = Vec::new();
    for component in prefix.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                return Err(StoreError::InvalidPath {
                    path: prefix.to_string(),
                    reason: "prefix must not contain '..'".into(),
                });
            }
            SENTINEL_NAME => return Err(StoreError::ReservedName(prefix.to_string())),
            other => parts.push(other),
        }
    }
    Ok(parts.join("/"))
}

/// Clean a relative path. Returns [`ROOT_PATH`] for the root.
///
/// Fails with [`StoreError::InvalidPath`] for non-UTF-8 bytes, ASCII
/// control characters, absolute paths and paths climbing above the root.
pub fn clean_relative(path: &[u8]) -> StoreResult<String> {
    let text = std::str::from_utf8(path).map_err(|_| StoreError::InvalidPath {
        path: String::from_utf8_lossy(path).into_owned(),
        reason: "object keys must be valid UTF-8".into(),
    })?;
    check_printable(text)?;
    if text.starts_with('/') {
        return Err(StoreError::InvalidPath {
            path: text.to_string(),
            reason: "path must be relative".into(),
        });
    }

    let mut parts: Vec<&str> = Vec::new();
    for component in text.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(StoreError::InvalidPath {
                        path: text.to_string(),
                        reason: "path escapes the prefix".into(),
                    });
                }
            }
            SENTINEL_NAME => return Err(StoreError::ReservedName(text.to_string())),
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        Ok(ROOT_PATH.to_string())
    } else {
        Ok(parts.join("/"))
    }
}

/// Append one key segment to `base`, which may be empty.
pub fn join_key(base: &str, segment: &str) -> String {
    if base.is_empty() {
        segment.to_string()
    } else {
        format!("{base}/{segment}")
    }
}

/// Map a relative path to its object key under a normalized `prefix`.
pub fn to_key(prefix: &str, path: &[u8]) -> StoreResult<String> {
    let cleaned = clean_relative(path)?;
    if cleaned == ROOT_PATH {
        Ok(prefix.to_string())
    } else {
        Ok(join_key(prefix, &cleaned))
    }
}

/// Map an object key back to its logical target under a normalized `prefix`.
pub fn to_relative_path(prefix: &str, key: &str) -> StoreResult<KeyTarget> {
    check_printable(key)?;
    let rest = if prefix.is_empty() {
        key
    } else if key == prefix {
        ""
    } else {
        key.strip_prefix(prefix)
            .and_then(|r| r.strip_prefix('/'))
            .ok_or_else(|| StoreError::InvalidPath {
                path: key.to_string(),
                reason: format!("key is outside prefix {prefix:?}"),
            })?
    };

    let mut components: Vec<&str> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split('/').collect()
    };

    let kind = if components.last() == Some(&SENTINEL_NAME) {
        components.pop();
        KeyKind::DirectorySentinel
    } else {
        KeyKind::Object
    };

    for component in &components {
        if matches!(*component, "" | "." | ".." | SENTINEL_NAME) {
            return Err(StoreError::InvalidPath {
                path: key.to_string(),
                reason: format!("unexpected key component {component:?}"),
            });
        }
    }

    let path = if components.is_empty() {
        ROOT_PATH.to_string()
    } else {
        components.join("/")
    };
    Ok(KeyTarget { path, kind })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn key_joins_prefix_and_path() {
        assert_eq!(to_key("backup/site1", b"a/b/file.txt").unwrap(), "backup/site1/a/b/file.txt");
        assert_eq!(to_key("", b"file").unwrap(), "file");
    }

    #[test]
    fn key_cleans_path() {
        assert_eq!(to_key("p", b"a//b/./c").unwrap(), "p/a/b/c");
        assert_eq!(to_key("p", b"a/../b").unwrap(), "p/b");
        assert_eq!(to_key("p", b"a/b/").unwrap(), "p/a/b");
    }

    #[test]
    fn root_maps_to_prefix() {
        assert_eq!(to_key("p", b".").unwrap(), "p");
        assert_eq!(to_key("p", b"").unwrap(), "p");
        assert_eq!(to_key("p", b"a/..").unwrap(), "p");
    }

    #[test]
    fn escaping_paths_are_rejected() {
        assert!(matches!(to_key("p", b".."), Err(StoreError::InvalidPath { .. })));
        assert!(matches!(to_key("p", b"a/../../b"), Err(StoreError::InvalidPath { .. })));
        assert!(matches!(to_key("p", b"/etc/passwd"), Err(StoreError::InvalidPath { .. })));
    }

    #[test]
    fn non_utf8_is_rejected() {
        assert!(matches!(to_key("p", b"bad\xff"), Err(StoreError::InvalidPath { .. })));
    }

    #[test]
    fn control_characters_are_rejected() {
        for path in [&b"tab\tname"[..], b"line\nbreak", b"a/\x7f", b"bell\x07"] {
            assert!(matches!(to_key("p", path), Err(StoreError::InvalidPath { .. })));
        }
        assert!(normalize_prefix("back\rup").is_err());
        assert!(to_relative_path("p", "p/tab\tname").is_err());
        // Non-ASCII text is fine.
        assert_eq!(to_key("p", "caf\u{e9}".as_bytes()).unwrap(), "p/caf\u{e9}");
    }

    #[test]
    fn reserved_name_is_rejected() {
        assert!(matches!(to_key("p", b"..."), Err(StoreError::ReservedName(_))));
        assert!(matches!(to_key("p", b"a/.../b"), Err(StoreError::ReservedName(_))));
        // Only the exact name is reserved.
        assert!(to_key("p", b"a/..../b").is_ok());
        assert!(to_key("p", b"a/...x").is_ok());
    }

    #[test]
    fn relative_path_strips_prefix() {
        let target = to_relative_path("backup/site1", "backup/site1/a/b/file.txt").unwrap();
        assert_eq!(target.path, "a/b/file.txt");
        assert_eq!(target.kind, KeyKind::Object);
    }

    #[test]
    fn relative_path_resolves_sentinels() {
        let target = to_relative_path("p", "p/a/b/...").unwrap();
        assert_eq!(target, KeyTarget { path: "a/b".into(), kind: KeyKind::DirectorySentinel });

        let root = to_relative_path("p", "p/...").unwrap();
        assert_eq!(root, KeyTarget { path: ".".into(), kind: KeyKind::DirectorySentinel });
    }

    #[test]
    fn relative_path_rejects_foreign_keys() {
        assert!(to_relative_path("p", "q/file").is_err());
        // Same leading bytes, different segment.
        assert!(to_relative_path("p", "p2/file").is_err());
        assert!(to_relative_path("p", "p/a/.../b").is_err());
        assert!(to_relative_path("p", "p/dir/").is_err());
    }

    #[test]
    fn prefix_normalization() {
        assert_eq!(normalize_prefix("/backup//site1/").unwrap(), "backup/site1");
        assert_eq!(normalize_prefix("").unwrap(), "");
        assert!(normalize_prefix("a/../b").is_err());
        assert!(normalize_prefix("a/...").is_err());
    }

    fn component() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9_ .-]{1,8}".prop_filter("dot-only names are special", |c| {
            !matches!(c.as_str(), "." | ".." | "...")
        })
    }

    proptest! {
        #[test]
        fn key_round_trip(
            prefix in "[a-z]{0,3}(/[a-z]{1,3}){0,2}",
            parts in proptest::collection::vec(component(), 1..5),
        ) {
            let prefix = normalize_prefix(&prefix).unwrap();
            let path = parts.join("/");
            let key = to_key(&prefix, path.as_bytes()).unwrap();
            let target = to_relative_path(&prefix, &key).unwrap();
            prop_assert_eq!(target.path, path);
            prop_assert_eq!(target.kind, KeyKind::Object);
        }
    }
}
