//! Mirror a file tree into an S3-compatible object store.
//!
//! The store is flat: every object lives under a single key in one bucket.
//! This crate maps a hierarchical tree (files, directories, symlinks) onto
//! that key space beneath a configurable prefix, and rebuilds a sorted
//! inventory of the tree from a bulk listing.
//!
//! # Layers
//!
//! - [`TreeStore`] -- the file-tree adapter (put, delete, list, stat)
//! - [`ObjectBackend`] -- wire-level operations on one bucket
//! - [`RemoteBackend`] -- backend over `object_store`, S3 by default
//! - [`BucketAdmin`] -- bucket creation through the AWS SDK
//! - [`MemoryBackend`] -- `BTreeMap`-based backend for tests and embedding
//!
//! # Layout
//!
//! - A file or symlink at `a/b` is the object `<prefix>/a/b`.
//! - A directory at `a` is the zero-byte sentinel `<prefix>/a/...`.
//! - Original mtime and mode travel as object metadata (see [`codec`]).
//!
//! # Design Rules
//!
//! 1. Writes are last-writer-wins; nothing is retried.
//! 2. Listings are sorted by path and free of duplicates.
//! 3. A failed listing is never mistaken for an empty tree.
//! 4. All transport errors are propagated, never silently ignored.

pub mod adapter;
pub mod admin;
pub mod backend;
pub mod codec;
pub mod config;
pub mod error;
pub mod key;
pub mod memory;
pub mod remote;
pub mod repr;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use adapter::{ListOptions, TreeStore};
pub use admin::{BucketAdmin, S3BucketAdmin};
pub use backend::{ObjectBackend, ObjectHead, ObjectInfo, ObjectListing};
pub use codec::{AttributeMap, MODE_KEY, MTIME_KEY};
pub use config::{StoreConfig, StoreTarget};
pub use error::{StoreError, StoreResult};
pub use key::{KeyKind, KeyTarget, ROOT_PATH, SENTINEL_NAME};
pub use memory::MemoryBackend;
pub use remote::RemoteBackend;
pub use repr::LAYOUT_VERSION;
pub use traits::FileStorage;

pub use bucketsync_types::{FileAttributes, FileEntry, FileEntryList, FileMode};
