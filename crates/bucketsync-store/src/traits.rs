use std::io::Read;

use bucketsync_types::{FileAttributes, FileEntryList, FileMode};

use crate::error::StoreResult;

/// Destination storage as seen by a synchronization client.
///
/// All implementations must satisfy these invariants:
/// - `put` stores exactly `size` bytes or fails; it never commits a
///   truncated object.
/// - `delete` of an entry that does not exist succeeds.
/// - `list` returns entries sorted by path with no duplicates; an error
///   means the inventory is incomplete, never that it is empty.
/// - `close` is idempotent.
pub trait FileStorage {
    /// Store one entry, returning the number of content bytes written.
    fn put(
        &self,
        path: &[u8],
        content: &mut dyn Read,
        size: u64,
        attrs: &FileAttributes,
    ) -> StoreResult<u64>;

    /// Remove one entry of the given type.
    fn delete(&self, path: &[u8], mode: FileMode) -> StoreResult<()>;

    /// Inventory of everything currently stored.
    fn list(&self) -> StoreResult<FileEntryList>;

    /// Release owned resources.
    fn close(&mut self) -> StoreResult<()>;
}
