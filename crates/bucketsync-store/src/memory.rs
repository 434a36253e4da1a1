use std::collections::BTreeMap;
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::backend::{key_in_prefix, read_declared, ObjectBackend, ObjectHead, ObjectInfo, ObjectListing};
use crate::codec::AttributeMap;
use crate::error::{StoreError, StoreResult};

#[derive(Clone, Debug)]
struct MemoryObject {
    data: Vec<u8>,
    metadata: AttributeMap,
    last_modified: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    bucket_exists: bool,
    objects: BTreeMap<String, MemoryObject>,
}

/// Failures to inject into subsequent calls.
#[derive(Debug, Default)]
struct Faults {
    create_namespace: Option<String>,
    namespace_exists: Option<String>,
    put: Option<String>,
    delete: Option<String>,
    list_after: Option<usize>,
}

/// In-memory, BTreeMap-based object backend for one bucket.
///
/// Intended for tests and embedding. Objects are held behind a `RwLock`
/// and cloned on read. Failures can be injected per operation to exercise
/// error paths of the adapter, and the modification clock can be pinned.
pub struct MemoryBackend {
    bucket: String,
    state: RwLock<MemoryState>,
    faults: Mutex<Faults>,
    clock: Option<DateTime<Utc>>,
    open_listings: Arc<AtomicUsize>,
    closed: bool,
}

impl MemoryBackend {
    /// A backend whose bucket does not exist yet.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            state: RwLock::new(MemoryState::default()),
            faults: Mutex::new(Faults::default()),
            clock: None,
            open_listings: Arc::new(AtomicUsize::new(0)),
            closed: false,
        }
    }

    /// A backend whose bucket already exists.
    pub fn with_existing_bucket(bucket: impl Into<String>) -> Self {
        let backend = Self::new(bucket);
        backend.state.write().expect("lock poisoned").bucket_exists = true;
        backend
    }

    /// Stamp every write with `at` instead of the wall clock.
    pub fn with_clock(mut self, at: DateTime<Utc>) -> Self {
        self.clock = Some(at);
        self
    }

    /// Make bucket creation fail with a transport error.
    pub fn fail_create_namespace(&self, reason: impl Into<String>) {
        self.faults.lock().expect("lock poisoned").create_namespace = Some(reason.into());
    }

    /// Make the bucket existence check fail with a transport error.
    pub fn fail_namespace_exists(&self, reason: impl Into<String>) {
        self.faults.lock().expect("lock poisoned").namespace_exists = Some(reason.into());
    }

    /// Make every upload fail with a transport error.
    pub fn fail_puts(&self, reason: impl Into<String>) {
        self.faults.lock().expect("lock poisoned").put = Some(reason.into());
    }

    /// Make every delete fail with a transport error.
    pub fn fail_deletes(&self, reason: impl Into<String>) {
        self.faults.lock().expect("lock poisoned").delete = Some(reason.into());
    }

    /// Make listings fail after yielding `count` records.
    pub fn fail_list_after(&self, count: usize) {
        self.faults.lock().expect("lock poisoned").list_after = Some(count);
    }

    /// Clear all injected failures.
    pub fn clear_faults(&self) {
        *self.faults.lock().expect("lock poisoned") = Faults::default();
    }

    /// Store an object directly, bypassing validation.
    pub fn insert_raw(&self, key: impl Into<String>, data: Vec<u8>, metadata: AttributeMap) {
        let object = MemoryObject {
            data,
            metadata,
            last_modified: self.now(),
        };
        self.state
            .write()
            .expect("lock poisoned")
            .objects
            .insert(key.into(), object);
    }

    /// Number of objects currently stored.
    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").objects.len()
    }

    /// Returns `true` if no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.state.read().expect("lock poisoned").objects.is_empty()
    }

    /// All keys in ascending order.
    pub fn keys(&self) -> Vec<String> {
        self.state
            .read()
            .expect("lock poisoned")
            .objects
            .keys()
            .cloned()
            .collect()
    }

    /// Content and metadata of one object.
    pub fn object(&self, key: &str) -> Option<(Vec<u8>, AttributeMap)> {
        self.state
            .read()
            .expect("lock poisoned")
            .objects
            .get(key)
            .map(|o| (o.data.clone(), o.metadata.clone()))
    }

    /// Listings handed out and not yet dropped.
    pub fn open_listings(&self) -> usize {
        self.open_listings.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.unwrap_or_else(Utc::now)
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.closed {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn check_bucket(&self) -> StoreResult<()> {
        self.check_open()?;
        if !self.state.read().expect("lock poisoned").bucket_exists {
            return Err(StoreError::Transport(format!("no such bucket: {}", self.bucket)));
        }
        Ok(())
    }

    fn injected(&self, select: impl FnOnce(&Faults) -> Option<String>) -> StoreResult<()> {
        let faults = self.faults.lock().expect("lock poisoned");
        match select(&faults) {
            Some(reason) => Err(StoreError::Transport(reason)),
            None => Ok(()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_existing_bucket("memory")
    }
}

impl ObjectBackend for MemoryBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn create_namespace(&self) -> StoreResult<()> {
        self.check_open()?;
        self.injected(|f| f.create_namespace.clone())?;
        let mut state = self.state.write().expect("lock poisoned");
        if state.bucket_exists {
            return Err(StoreError::NamespaceExists(self.bucket.clone()));
        }
        state.bucket_exists = true;
        Ok(())
    }

    fn namespace_exists(&self) -> StoreResult<bool> {
        self.check_open()?;
        self.injected(|f| f.namespace_exists.clone())?;
        Ok(self.state.read().expect("lock poisoned").bucket_exists)
    }

    fn put_object(
        &self,
        key: &str,
        content: &mut dyn Read,
        size: u64,
        metadata: &AttributeMap,
    ) -> StoreResult<u64> {
        self.check_bucket()?;
        self.injected(|f| f.put.clone())?;
        let data = read_declared(content, size)?;
        let object = MemoryObject {
            data,
            metadata: metadata.clone(),
            last_modified: self.now(),
        };
        self.state
            .write()
            .expect("lock poisoned")
            .objects
            .insert(key.to_string(), object);
        Ok(size)
    }

    fn head_object(&self, key: &str) -> StoreResult<Option<ObjectHead>> {
        self.check_bucket()?;
        let state = self.state.read().expect("lock poisoned");
        Ok(state.objects.get(key).map(|o| ObjectHead {
            info: ObjectInfo {
                key: key.to_string(),
                size: o.data.len() as u64,
                last_modified: o.last_modified,
            },
            metadata: o.metadata.clone(),
        }))
    }

    fn get_object(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check_bucket()?;
        let state = self.state.read().expect("lock poisoned");
        Ok(state.objects.get(key).map(|o| o.data.clone()))
    }

    fn delete_object(&self, key: &str) -> StoreResult<()> {
        self.check_bucket()?;
        self.injected(|f| f.delete.clone())?;
        self.state.write().expect("lock poisoned").objects.remove(key);
        Ok(())
    }

    fn list_objects(&self, prefix: &str) -> StoreResult<ObjectListing<'_>> {
        self.check_bucket()?;
        let records: Vec<ObjectInfo> = {
            let state = self.state.read().expect("lock poisoned");
            state
                .objects
                .iter()
                .filter(|(key, _)| key_in_prefix(prefix, key))
                .map(|(key, o)| ObjectInfo {
                    key: key.clone(),
                    size: o.data.len() as u64,
                    last_modified: o.last_modified,
                })
                .collect()
        };
        let fail_after = self.faults.lock().expect("lock poisoned").list_after;
        self.open_listings.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryListing {
            records: records.into_iter(),
            fail_after,
            yielded: 0,
            finished: false,
            open: Arc::clone(&self.open_listings),
        }))
    }

    fn close(&mut self) -> StoreResult<()> {
        self.closed = true;
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("bucket", &self.bucket)
            .field("object_count", &self.len())
            .field("open_listings", &self.open_listings())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Snapshot listing with an optional injected mid-stream failure.
struct MemoryListing {
    records: std::vec::IntoIter<ObjectInfo>,
    fail_after: Option<usize>,
    yielded: usize,
    finished: bool,
    open: Arc<AtomicUsize>,
}

impl Drop for MemoryListing {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Iterator for MemoryListing {
    type Item = StoreResult<ObjectInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.fail_after == Some(self.yielded) {
            self.finished = true;
            return Some(Err(StoreError::Transport(format!(
                "listing connection reset after {} records",
                self.yielded
            ))));
        }
        let record = self.records.next();
        match record {
            Some(info) => {
                self.yielded += 1;
                Some(Ok(info))
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Cursor;

    fn put(backend: &MemoryBackend, key: &str, data: &[u8]) -> StoreResult<u64> {
        backend.put_object(key, &mut Cursor::new(data.to_vec()), data.len() as u64, &AttributeMap::new())
    }

    // -----------------------------------------------------------------------
    // Bucket lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn create_then_exists() {
        let backend = MemoryBackend::new("b");
        assert!(!backend.namespace_exists().unwrap());
        backend.create_namespace().unwrap();
        assert!(backend.namespace_exists().unwrap());
        assert!(matches!(backend.create_namespace(), Err(StoreError::NamespaceExists(_))));
    }

    #[test]
    fn operations_need_a_bucket() {
        let backend = MemoryBackend::new("b");
        assert!(matches!(put(&backend, "k", b"x"), Err(StoreError::Transport(_))));
    }

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[test]
    fn put_head_get_delete() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let backend = MemoryBackend::with_existing_bucket("b").with_clock(at);
        let mut meta = AttributeMap::new();
        meta.insert("owner".into(), "alice".into());

        let written = backend
            .put_object("p/f", &mut Cursor::new(b"data".to_vec()), 4, &meta)
            .unwrap();
        assert_eq!(written, 4);

        let head = backend.head_object("p/f").unwrap().expect("should exist");
        assert_eq!(head.info.size, 4);
        assert_eq!(head.info.last_modified, at);
        assert_eq!(head.metadata["owner"], "alice");
        assert_eq!(backend.get_object("p/f").unwrap().unwrap(), b"data");

        backend.delete_object("p/f").unwrap();
        assert!(backend.head_object("p/f").unwrap().is_none());
        // Deleting again is fine.
        backend.delete_object("p/f").unwrap();
    }

    #[test]
    fn size_mismatch_stores_nothing() {
        let backend = MemoryBackend::default();
        let err = backend
            .put_object("k", &mut Cursor::new(b"abc".to_vec()), 5, &AttributeMap::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::SizeMismatch { .. }));
        assert!(backend.is_empty());
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    #[test]
    fn list_filters_by_prefix_segments() {
        let backend = MemoryBackend::default();
        for key in ["p/a", "p/b/c", "p2/x", "q"] {
            put(&backend, key, b"1").unwrap();
        }
        let keys: Vec<String> = backend
            .list_objects("p")
            .unwrap()
            .map(|r| r.unwrap().key)
            .collect();
        assert_eq!(keys, ["p/a", "p/b/c"]);
    }

    #[test]
    fn injected_list_failure_after_records() {
        let backend = MemoryBackend::default();
        for key in ["a", "b", "c"] {
            put(&backend, key, b"1").unwrap();
        }
        backend.fail_list_after(2);
        let results: Vec<_> = backend.list_objects("").unwrap().collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(StoreError::Transport(_))));

        backend.clear_faults();
        assert_eq!(backend.list_objects("").unwrap().count(), 3);
    }

    #[test]
    fn open_listings_are_counted_until_dropped() {
        let backend = MemoryBackend::default();
        put(&backend, "a", b"1").unwrap();
        let first = backend.list_objects("").unwrap();
        let second = backend.list_objects("").unwrap();
        assert_eq!(backend.open_listings(), 2);
        drop(first);
        assert_eq!(backend.open_listings(), 1);
        drop(second);
        assert_eq!(backend.open_listings(), 0);
    }

    // -----------------------------------------------------------------------
    // Injected failures and close
    // -----------------------------------------------------------------------

    #[test]
    fn injected_put_and_delete_failures() {
        let backend = MemoryBackend::default();
        backend.fail_puts("denied");
        assert!(matches!(put(&backend, "k", b"x"), Err(StoreError::Transport(m)) if m == "denied"));
        backend.clear_faults();
        put(&backend, "k", b"x").unwrap();
        backend.fail_deletes("denied");
        assert!(backend.delete_object("k").is_err());
        assert_eq!(backend.len(), 1);
    }

    #[test]
    fn close_is_idempotent_and_final() {
        let mut backend = MemoryBackend::default();
        backend.close().unwrap();
        backend.close().unwrap();
        assert!(backend.is_closed());
        assert!(matches!(backend.list_objects(""), Err(StoreError::Closed)));
    }

    #[test]
    fn debug_format() {
        let backend = MemoryBackend::default();
        put(&backend, "x", b"x").unwrap();
        let debug = format!("{backend:?}");
        assert!(debug.contains("MemoryBackend"));
        assert!(debug.contains("object_count"));
    }
}
