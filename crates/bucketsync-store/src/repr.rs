//! Representation of non-file entries on a flat object store.
//!
//! Layout version 1:
//!
//! - A directory `d` is a zero-byte object at `<key(d)>/...` whose metadata
//!   carries the directory's attributes. Nothing is stored at `<key(d)>`.
//! - A symlink is an object at its own key whose content is the link target
//!   and whose encoded mode carries the symlink type bits.
//! - Everything else is stored as plain content.
//!
//! The name `...` is therefore reserved and never accepted from callers.

use bucketsync_types::FileMode;

use crate::error::{StoreError, StoreResult};
use crate::key::{join_key, to_key, SENTINEL_NAME};

/// Version of the on-store layout described above.
pub const LAYOUT_VERSION: u32 = 1;

/// How an entry is materialized in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Representation {
    Content,
    DirectorySentinel,
    Symlink,
}

impl Representation {
    pub fn for_mode(mode: FileMode) -> Self {
        if mode.is_dir() {
            Self::DirectorySentinel
        } else if mode.is_symlink() {
            Self::Symlink
        } else {
            Self::Content
        }
    }
}

/// Where and how an entry is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectPlan {
    /// The object key to write or delete.
    pub key: String,
    /// The entry's own key; differs from `key` only for directories.
    pub entry_key: String,
    pub repr: Representation,
}

/// Resolve the object that represents `path` with type `mode`.
pub fn plan(prefix: &str, path: &[u8], mode: FileMode) -> StoreResult<ObjectPlan> {
    let entry_key = to_key(prefix, path)?;
    let repr = Representation::for_mode(mode);
    let key = match repr {
        Representation::DirectorySentinel => sentinel_key(&entry_key),
        Representation::Content | Representation::Symlink => {
            if entry_key.is_empty() || entry_key == prefix {
                return Err(StoreError::InvalidPath {
                    path: String::from_utf8_lossy(path).into_owned(),
                    reason: "the tree root can only be a directory".into(),
                });
            }
            entry_key.clone()
        }
    };
    Ok(ObjectPlan { key, entry_key, repr })
}

/// Key of the sentinel for the directory stored at `dir_key`.
pub fn sentinel_key(dir_key: &str) -> String {
    join_key(dir_key, SENTINEL_NAME)
}

/// `true` if `key` lies beneath the directory at `dir_key` and is not its sentinel.
pub fn is_child_key(dir_key: &str, key: &str) -> bool {
    let rest = if dir_key.is_empty() {
        Some(key)
    } else {
        key.strip_prefix(dir_key).and_then(|r| r.strip_prefix('/'))
    };
    matches!(rest, Some(r) if !r.is_empty() && r != SENTINEL_NAME)
}

/// Validate a symlink target before upload.
pub fn check_symlink_target(path: &[u8], target_len: u64) -> StoreResult<()> {
    if target_len == 0 {
        return Err(StoreError::InvalidSymlink(
            String::from_utf8_lossy(path).into_owned(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representation_by_mode() {
        assert_eq!(Representation::for_mode(FileMode::directory(0o755)), Representation::DirectorySentinel);
        assert_eq!(Representation::for_mode(FileMode::symlink()), Representation::Symlink);
        assert_eq!(Representation::for_mode(FileMode::regular(0o644)), Representation::Content);
        assert_eq!(Representation::for_mode(FileMode::UNKNOWN), Representation::Content);
    }

    #[test]
    fn directories_plan_a_sentinel() {
        let plan = plan("p", b"a/b", FileMode::directory(0o755)).unwrap();
        assert_eq!(plan.key, "p/a/b/...");
        assert_eq!(plan.entry_key, "p/a/b");
        assert_eq!(plan.repr, Representation::DirectorySentinel);
    }

    #[test]
    fn root_directory_sentinel() {
        assert_eq!(plan("p", b".", FileMode::directory(0o755)).unwrap().key, "p/...");
        assert_eq!(plan("", b".", FileMode::directory(0o755)).unwrap().key, "...");
    }

    #[test]
    fn root_cannot_be_a_file() {
        assert!(plan("p", b".", FileMode::regular(0o644)).is_err());
        assert!(plan("", b"", FileMode::symlink()).is_err());
    }

    #[test]
    fn files_and_links_use_their_own_key() {
        assert_eq!(plan("p", b"f", FileMode::regular(0o644)).unwrap().key, "p/f");
        let link = plan("p", b"l", FileMode::symlink()).unwrap();
        assert_eq!(link.key, "p/l");
        assert_eq!(link.repr, Representation::Symlink);
    }

    #[test]
    fn child_keys_exclude_the_sentinel() {
        assert!(is_child_key("p/a", "p/a/f"));
        assert!(is_child_key("p/a", "p/a/b/..."));
        assert!(!is_child_key("p/a", "p/a/..."));
        assert!(!is_child_key("p/a", "p/a"));
        assert!(!is_child_key("p/a", "p/ab/f"));
        assert!(is_child_key("", "f"));
        assert!(!is_child_key("", "..."));
    }

    #[test]
    fn empty_symlink_target_is_rejected() {
        assert!(matches!(check_symlink_target(b"l", 0), Err(StoreError::InvalidSymlink(_))));
        assert!(check_symlink_target(b"l", 3).is_ok());
    }
}
