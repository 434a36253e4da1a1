//! Foundation types for bucketsync.
//!
//! This crate provides the logical file-tree model shared by the object-store
//! adapter and whatever synchronization logic consumes its inventory.
//!
//! # Key Types
//!
//! - [`FileMode`] -- POSIX type and permission bits (`0` means unknown)
//! - [`FileAttributes`] -- mtime, mode, and named attributes captured for a write
//! - [`FileEntry`] -- a logical tree member (path, size, mtime, mode)
//! - [`FileEntryList`] -- entries ordered by path, the currency of diffing

pub mod attributes;
pub mod entry;
pub mod error;
pub mod mode;

pub use attributes::FileAttributes;
pub use entry::{FileEntry, FileEntryList};
pub use error::TypeError;
pub use mode::FileMode;
