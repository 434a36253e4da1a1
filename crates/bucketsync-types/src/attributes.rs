//! Attributes captured for a single write.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::mode::FileMode;

/// Metadata recorded alongside a file's content.
///
/// `user` holds arbitrary named attributes (ownership, ACL digests, ...). The
/// map is ordered so that encoded metadata is deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttributes {
    /// Modification time in seconds since the UNIX epoch.
    pub mtime: i64,
    /// Type and permission bits.
    pub mode: FileMode,
    /// Named attributes, stored verbatim.
    pub user: BTreeMap<String, String>,
}

impl FileAttributes {
    pub fn new(mtime: i64, mode: FileMode) -> Self {
        Self {
            mtime,
            mode,
            user: BTreeMap::new(),
        }
    }

    /// Builder-style helper to attach one named attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.user.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_attributes() {
        let attrs = FileAttributes::new(1000, FileMode::regular(0o644))
            .with_attr("uid", "1000")
            .with_attr("gid", "100");
        assert_eq!(attrs.user.len(), 2);
        assert_eq!(attrs.user["uid"], "1000");
        assert_eq!(attrs.mtime, 1000);
    }

    #[test]
    fn default_is_unknown_mode() {
        let attrs = FileAttributes::default();
        assert!(attrs.mode.is_unknown());
        assert!(attrs.user.is_empty());
    }
}
