use std::io::Read;

use chrono::{DateTime, Utc};

use crate::codec::AttributeMap;
use crate::error::{StoreError, StoreResult};

/// One record of a bulk listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object key.
    pub key: String,
    /// Content length in bytes.
    pub size: u64,
    /// The store's own modification time for the object.
    pub last_modified: DateTime<Utc>,
}

/// Listing record plus the object's custom metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectHead {
    pub info: ObjectInfo,
    pub metadata: AttributeMap,
}

/// A live listing. Dropping it terminates the underlying stream.
pub type ObjectListing<'a> = Box<dyn Iterator<Item = StoreResult<ObjectInfo>> + 'a>;

/// Wire-level operations of a flat key/value object store bound to one bucket.
///
/// All implementations must satisfy these invariants:
/// - Each call is a single remote operation; no retries are performed.
/// - Writes to a key replace the previous object (last writer wins).
/// - `list_objects(p)` yields every object whose key starts with `p/`, in
///   ascending key order where the store supports it. An empty `p` lists the
///   whole bucket.
/// - All transport errors are propagated, never silently ignored.
pub trait ObjectBackend: Send + Sync {
    /// Name of the bucket this backend is bound to.
    fn bucket(&self) -> &str;

    /// Create the bucket.
    ///
    /// Returns [`StoreError::NamespaceExists`] if it already exists and
    /// [`StoreError::NotSupported`] if the backend cannot create buckets.
    fn create_namespace(&self) -> StoreResult<()>;

    /// Check whether the bucket exists and is reachable.
    fn namespace_exists(&self) -> StoreResult<bool>;

    /// Upload exactly `size` bytes from `content` under `key`.
    ///
    /// Returns the number of bytes written. A stream of any other length
    /// fails with [`StoreError::SizeMismatch`] and leaves no object behind.
    fn put_object(
        &self,
        key: &str,
        content: &mut dyn Read,
        size: u64,
        metadata: &AttributeMap,
    ) -> StoreResult<u64>;

    /// Fetch the listing record and custom metadata of one object.
    fn head_object(&self, key: &str) -> StoreResult<Option<ObjectHead>>;

    /// Fetch the full content of one object.
    fn get_object(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Delete one object. Deleting a missing key succeeds.
    fn delete_object(&self, key: &str) -> StoreResult<()>;

    /// Open a listing of everything beneath `prefix`.
    fn list_objects(&self, prefix: &str) -> StoreResult<ObjectListing<'_>>;

    /// Release owned connections. Must be idempotent.
    fn close(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

/// Read exactly `size` bytes, failing if the stream is shorter or longer.
pub fn read_declared(content: &mut dyn Read, size: u64) -> StoreResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(usize::try_from(size).unwrap_or(0).min(1 << 20));
    content.take(size.saturating_add(1)).read_to_end(&mut buf)?;
    let actual = buf.len() as u64;
    if actual != size {
        return Err(StoreError::SizeMismatch { expected: size, actual });
    }
    Ok(buf)
}

/// `true` if `key` lies beneath `prefix`.
pub fn key_in_prefix(prefix: &str, key: &str) -> bool {
    prefix.is_empty()
        || key
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
