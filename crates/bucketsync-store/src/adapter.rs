//! The object-store file-tree adapter.
//!
//! [`TreeStore`] maps a hierarchical tree onto one bucket and key prefix:
//! plain files and symlinks become objects at their own key, directories
//! become sentinel objects (see [`crate::repr`]), and listings rebuild a
//! sorted [`FileEntryList`] from the flat key space.

use std::io::{self, Read};

use bucketsync_types::{FileAttributes, FileEntry, FileEntryList, FileMode};
use tracing::{debug, info, warn};

use crate::backend::{ObjectBackend, ObjectInfo, ObjectListing};
use crate::codec;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::key::{self, KeyKind};
use crate::remote::RemoteBackend;
use crate::repr::{self, Representation, LAYOUT_VERSION};
use crate::traits::FileStorage;

/// Listing behaviour.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Fetch each object's metadata to recover the original mtime and mode,
    /// and read symlink targets. One extra request per object.
    pub fetch_metadata: bool,
}

/// File-tree view over one bucket and prefix.
pub struct TreeStore<B: ObjectBackend> {
    backend: B,
    prefix: String,
    list_options: ListOptions,
    closed: bool,
}

impl TreeStore<RemoteBackend> {
    /// Connect to the S3-compatible service described by `config`.
    pub fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let backend = RemoteBackend::connect(config)?;
        Ok(Self::open(backend, &config.prefix)?.with_list_options(ListOptions {
            fetch_metadata: config.fetch_metadata,
        }))
    }
}

impl<B: ObjectBackend> TreeStore<B> {
    /// Bind to `prefix` within the backend's bucket, creating the bucket if
    /// it does not exist yet.
    pub fn open(backend: B, prefix: &str) -> StoreResult<Self> {
        let prefix = key::normalize_prefix(prefix)?;
        ensure_bucket(&backend)?;
        debug!(
            bucket = backend.bucket(),
            prefix = %prefix,
            layout = LAYOUT_VERSION,
            "tree store opened"
        );
        Ok(Self {
            backend,
            prefix,
            list_options: ListOptions::default(),
            closed: false,
        })
    }

    /// Default options used by [`list`](Self::list).
    pub fn with_list_options(mut self, options: ListOptions) -> Self {
        self.list_options = options;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Store one entry.
    ///
    /// Files upload `size` bytes from `content`. Symlinks upload their target
    /// from `content`. Directories write only their sentinel and report zero
    /// bytes; `content` is not read.
    pub fn put(
        &self,
        path: impl AsRef<[u8]>,
        content: &mut dyn Read,
        size: u64,
        attrs: &FileAttributes,
    ) -> StoreResult<u64> {
        self.check_open()?;
        let path = path.as_ref();
        let plan = repr::plan(&self.prefix, path, attrs.mode)?;
        let metadata = codec::encode(attrs)?;
        match plan.repr {
            Representation::DirectorySentinel => {
                self.backend.put_object(&plan.key, &mut io::empty(), 0, &metadata)?;
                debug!(key = %plan.key, "directory sentinel written");
                Ok(0)
            }
            Representation::Symlink => {
                repr::check_symlink_target(path, size)?;
                let written = self.backend.put_object(&plan.key, content, size, &metadata)?;
                debug!(key = %plan.key, size, "symlink written");
                Ok(written)
            }
            Representation::Content => {
                let written = self.backend.put_object(&plan.key, content, size, &metadata)?;
                debug!(key = %plan.key, size, "object written");
                Ok(written)
            }
        }
    }

    /// Store a symlink pointing at `target`.
    pub fn put_symlink(
        &self,
        path: impl AsRef<[u8]>,
        target: &[u8],
        attrs: &FileAttributes,
    ) -> StoreResult<u64> {
        let attrs = FileAttributes {
            mode: FileMode::from_bits(FileMode::SYMLINK | attrs.mode.permissions()),
            ..attrs.clone()
        };
        self.put(path, &mut io::Cursor::new(target), target.len() as u64, &attrs)
    }

    /// Remove one entry.
    ///
    /// Removing something that is not there succeeds. A directory is removed
    /// by deleting its sentinel, which is only allowed once nothing else is
    /// stored beneath it.
    pub fn delete(&self, path: impl AsRef<[u8]>, mode: FileMode) -> StoreResult<()> {
        self.check_open()?;
        let path = path.as_ref();
        let plan = repr::plan(&self.prefix, path, mode)?;
        if plan.repr == Representation::DirectorySentinel && self.has_children(&plan.entry_key)? {
            return Err(StoreError::DirectoryNotEmpty(
                String::from_utf8_lossy(path).into_owned(),
            ));
        }
        self.backend.delete_object(&plan.key)?;
        debug!(key = %plan.key, "object deleted");
        Ok(())
    }

    /// Inventory of everything under the prefix, using the default options.
    pub fn list(&self) -> StoreResult<FileEntryList> {
        self.list_with(self.list_options)
    }

    /// Inventory of everything under the prefix.
    ///
    /// The result is sorted by path without duplicates. If the listing
    /// stream fails part-way, the error is [`StoreError::PartialList`] and
    /// carries every entry collected before the failure.
    pub fn list_with(&self, options: ListOptions) -> StoreResult<FileEntryList> {
        self.check_open()?;
        let mut entries = FileEntryList::with_capacity(1 << 10);
        let listing = ListingGuard::open(&self.backend, &self.prefix)?;
        for record in listing {
            let entry = record.and_then(|info| self.entry_from_listing(&info, options));
            match entry {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(source) => {
                    warn!(collected = entries.len(), error = %source, "listing interrupted");
                    return Err(StoreError::PartialList {
                        entries: finalize(entries),
                        source: Box::new(source),
                    });
                }
            }
        }
        Ok(finalize(entries))
    }

    /// Full-fidelity lookup of a single entry.
    ///
    /// A directory sentinel takes precedence over an object stored at the
    /// same path, matching [`list`](Self::list).
    pub fn stat(&self, path: impl AsRef<[u8]>) -> StoreResult<Option<FileEntry>> {
        self.check_open()?;
        let path = path.as_ref();
        let entry_key = key::to_key(&self.prefix, path)?;
        let is_root = entry_key == self.prefix;
        let mut candidates = vec![repr::sentinel_key(&entry_key)];
        if !is_root {
            candidates.push(entry_key);
        }
        for object_key in candidates {
            if let Some(head) = self.backend.head_object(&object_key)? {
                let target = key::to_relative_path(&self.prefix, &object_key)?;
                let mut entry = codec::decode_listing(&head.info, &target);
                apply_metadata(&mut entry, &head.metadata);
                if entry.mode.is_symlink() {
                    entry.symlink_target = self.backend.get_object(&object_key)?;
                }
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// The stored target of the symlink at `path`.
    pub fn read_link(&self, path: impl AsRef<[u8]>) -> StoreResult<Vec<u8>> {
        self.check_open()?;
        let path = path.as_ref();
        let plan = repr::plan(&self.prefix, path, FileMode::symlink())?;
        self.backend
            .get_object(&plan.key)?
            .ok_or_else(|| StoreError::NotFound(String::from_utf8_lossy(path).into_owned()))
    }

    /// Release the backend. Later calls fail with [`StoreError::Closed`].
    pub fn close(&mut self) -> StoreResult<()> {
        if self.closed {
            return Ok(());
        }
        self.backend.close()?;
        self.closed = true;
        debug!(bucket = self.backend.bucket(), prefix = %self.prefix, "tree store closed");
        Ok(())
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn has_children(&self, dir_key: &str) -> StoreResult<bool> {
        for record in ListingGuard::open(&self.backend, dir_key)? {
            if repr::is_child_key(dir_key, &record?.key) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn entry_from_listing(
        &self,
        info: &ObjectInfo,
        options: ListOptions,
    ) -> StoreResult<Option<FileEntry>> {
        let target = match key::to_relative_path(&self.prefix, &info.key) {
            Ok(target) => target,
            Err(e) => {
                warn!(key = %info.key, error = %e, "skipping object outside the tree layout");
                return Ok(None);
            }
        };
        let mut entry = codec::decode_listing(info, &target);
        if options.fetch_metadata {
            if let Some(head) = self.backend.head_object(&info.key)? {
                apply_metadata(&mut entry, &head.metadata);
            }
            if target.kind == KeyKind::Object && entry.mode.is_symlink() {
                entry.symlink_target = self.backend.get_object(&info.key)?;
            }
        }
        Ok(Some(entry))
    }
}

impl<B: ObjectBackend> FileStorage for TreeStore<B> {
    fn put(
        &self,
        path: &[u8],
        content: &mut dyn Read,
        size: u64,
        attrs: &FileAttributes,
    ) -> StoreResult<u64> {
        TreeStore::put(self, path, content, size, attrs)
    }

    fn delete(&self, path: &[u8], mode: FileMode) -> StoreResult<()> {
        TreeStore::delete(self, path, mode)
    }

    fn list(&self) -> StoreResult<FileEntryList> {
        TreeStore::list(self)
    }

    fn close(&mut self) -> StoreResult<()> {
        TreeStore::close(self)
    }
}

impl<B: ObjectBackend + std::fmt::Debug> std::fmt::Debug for TreeStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeStore")
            .field("backend", &self.backend)
            .field("prefix", &self.prefix)
            .field("list_options", &self.list_options)
            .field("closed", &self.closed)
            .finish()
    }
}

/// Create the bucket, or confirm it already exists.
fn ensure_bucket<B: ObjectBackend>(backend: &B) -> StoreResult<()> {
    let bucket = backend.bucket().to_string();
    match backend.create_namespace() {
        Ok(()) => {
            info!(bucket = %bucket, "created bucket");
            Ok(())
        }
        Err(StoreError::NamespaceExists(_)) => {
            info!(bucket = %bucket, "bucket already exists");
            Ok(())
        }
        Err(create_err) => match backend.namespace_exists() {
            Ok(true) => {
                info!(bucket = %bucket, reason = %create_err, "using existing bucket");
                Ok(())
            }
            Ok(false) => Err(StoreError::Construction {
                bucket,
                source: Box::new(create_err),
            }),
            Err(check_err) => {
                warn!(bucket = %bucket, error = %check_err, "bucket existence check failed");
                Err(StoreError::Construction {
                    bucket,
                    source: Box::new(create_err),
                })
            }
        },
    }
}

/// Replace best-effort values with those recovered from object metadata.
///
/// A missing or unknown mode keeps the listing's mode, so sentinels stay
/// directories.
fn apply_metadata(entry: &mut FileEntry, metadata: &codec::AttributeMap) {
    let recovered = codec::decode(metadata).into_attributes(entry.mtime);
    entry.mtime = recovered.mtime;
    if !recovered.mode.is_unknown() {
        entry.mode = recovered.mode;
    }
}

/// Sort by path and drop duplicates, preferring directory entries.
fn finalize(mut list: FileEntryList) -> FileEntryList {
    list.sort();
    let dropped = list.dedup_by_path();
    if dropped > 0 {
        warn!(dropped, "listing held objects sharing a path with a directory");
    }
    list
}

/// Owns a listing stream for the duration of one scan.
///
/// The stream is released when the guard drops, on every exit path.
struct ListingGuard<'a> {
    listing: ObjectListing<'a>,
    prefix: String,
    records: usize,
}

impl<'a> ListingGuard<'a> {
    fn open<B: ObjectBackend>(backend: &'a B, prefix: &str) -> StoreResult<Self> {
        Ok(Self {
            listing: backend.list_objects(prefix)?,
            prefix: prefix.to_string(),
            records: 0,
        })
    }
}

impl Iterator for ListingGuard<'_> {
    type Item = StoreResult<ObjectInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.listing.next()?;
        self.records += 1;
        Some(record)
    }
}

impl Drop for ListingGuard<'_> {
    fn drop(&mut self) {
        debug!(prefix = %self.prefix, records = self.records, "listing stream released");
    }
}
