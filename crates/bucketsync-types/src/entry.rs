//! Logical tree entries and the path-ordered list used for diffing.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mode::FileMode;

/// A member of the mirrored tree.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative path, `/` separated, no leading separator. The tree root is `.`.
    pub path: Vec<u8>,
    /// Size in bytes. Directories report zero.
    pub size: u64,
    /// Modification time in seconds since the UNIX epoch.
    pub mtime: i64,
    /// Type and permission bits; zero when the source could not tell.
    pub mode: FileMode,
    /// Link target, only populated by full-metadata listings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlink_target: Option<Vec<u8>>,
}

impl FileEntry {
    pub fn new(path: impl Into<Vec<u8>>, size: u64, mtime: i64, mode: FileMode) -> Self {
        Self {
            path: path.into(),
            size,
            mtime,
            mode,
            symlink_target: None,
        }
    }

    /// Lossy UTF-8 rendering of the path for display and logging.
    pub fn path_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.path)
    }

    /// Byte-wise ordering by path only.
    pub fn cmp_path(&self, other: &Self) -> Ordering {
        self.path.cmp(&other.path)
    }
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("FileEntry");
        s.field("path", &self.path_lossy())
            .field("size", &self.size)
            .field("mtime", &self.mtime)
            .field("mode", &self.mode);
        if let Some(target) = &self.symlink_target {
            s.field("symlink_target", &String::from_utf8_lossy(target));
        }
        s.finish()
    }
}

/// An ordered sequence of [`FileEntry`].
///
/// Lists produced by an inventory are sorted ascending by path (plain byte
/// order) and hold no duplicate paths; [`FileEntryList::is_sorted_unique`]
/// checks that invariant and [`FileEntryList::find`] relies on it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileEntryList(Vec<FileEntry>);

impl FileEntryList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub fn push(&mut self, entry: FileEntry) {
        self.0.push(entry);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileEntry> {
        self.0.iter()
    }

    /// Stable sort by path. Among entries sharing a path, directories come
    /// first, so [`dedup_by_path`](Self::dedup_by_path) keeps them.
    pub fn sort(&mut self) {
        self.0.sort_by(|a, b| {
            a.cmp_path(b)
                .then_with(|| b.mode.is_dir().cmp(&a.mode.is_dir()))
        });
    }

    /// Drop consecutive entries sharing a path, keeping the first of each run.
    ///
    /// Returns the number of entries removed. Call after [`sort`](Self::sort).
    pub fn dedup_by_path(&mut self) -> usize {
        let before = self.0.len();
        self.0.dedup_by(|later, earlier| later.path == earlier.path);
        before - self.0.len()
    }

    /// `true` if paths are strictly ascending.
    pub fn is_sorted_unique(&self) -> bool {
        self.0.windows(2).all(|w| w[0].path < w[1].path)
    }

    /// Binary search by path. The list must be sorted.
    pub fn find(&self, path: &[u8]) -> Option<&FileEntry> {
        self.0
            .binary_search_by(|e| e.path.as_slice().cmp(path))
            .ok()
            .map(|i| &self.0[i])
    }
}

impl From<Vec<FileEntry>> for FileEntryList {
    fn from(entries: Vec<FileEntry>) -> Self {
        Self(entries)
    }
}

impl FromIterator<FileEntry> for FileEntryList {
    fn from_iter<I: IntoIterator<Item = FileEntry>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for FileEntryList {
    type Item = FileEntry;
    type IntoIter = std::vec::IntoIter<FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FileEntryList {
    type Item = &'a FileEntry;
    type IntoIter = std::slice::Iter<'a, FileEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::ops::Index<usize> for FileEntryList {
    type Output = FileEntry;

    fn index(&self, index: usize) -> &FileEntry {
        &self.0[index]
    }
}
