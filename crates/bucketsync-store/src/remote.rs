//! Backend driving any `object_store::ObjectStore`, S3-compatible by default.
//!
//! The adapter is synchronous, so the backend owns a current-thread tokio
//! runtime and blocks on each remote future. Listings wrap the store's
//! `BoxStream`; dropping the listing drops the stream, which cancels any
//! page request still in flight.
//!
//! Keys come back through `object_store::path::Path`, which has its own
//! rules. A trailing `/` is stripped, so a "folder marker" object written
//! by another tool as `prefix/folder/` lists as a zero-byte file `folder`.
//! A key with a `.` or `..` segment or an ASCII control character cannot
//! be represented at all; the listing page holding it fails, and the
//! adapter reports a partial list.

use std::borrow::Cow;
use std::io::Read;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, GetResult, ObjectMeta, ObjectStore,
    PutMultipartOptions, PutOptions, PutPayload, WriteMultipart,
};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, warn};

use crate::admin::{BucketAdmin, S3BucketAdmin};
use crate::backend::{read_declared, ObjectBackend, ObjectHead, ObjectInfo, ObjectListing};
use crate::codec::AttributeMap;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// Read buffer used when streaming multipart uploads.
const UPLOAD_CHUNK: usize = 1024 * 1024;
/// Parts allowed in flight during a multipart upload.
const MAX_PARTS_IN_FLIGHT: usize = 4;

/// Object backend over an `object_store` implementation.
///
/// Every method blocks on the backend's own runtime. Calling one from a
/// task already running on a tokio runtime would panic inside tokio, so
/// such calls fail with [`StoreError::NotSupported`] instead; move them to
/// `tokio::task::spawn_blocking` or a plain thread.
///
/// Bucket creation needs a [`BucketAdmin`]. [`connect`](Self::connect)
/// installs one when credentials are configured; without one,
/// `create_namespace` reports [`StoreError::NotSupported`].
pub struct RemoteBackend {
    bucket: String,
    store: Arc<dyn ObjectStore>,
    admin: Option<Arc<dyn BucketAdmin>>,
    runtime: Option<Runtime>,
    multipart_threshold: u64,
}

impl RemoteBackend {
    /// Build an S3 client from explicit configuration.
    pub fn connect(config: &StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_allow_http(!config.secure)
            .with_virtual_hosted_style_request(false);
        if let Some(endpoint) = config.endpoint_url() {
            builder = builder.with_endpoint(endpoint);
        }
        if !config.access_key_id.is_empty() {
            builder = builder
                .with_access_key_id(&config.access_key_id)
                .with_secret_access_key(&config.secret_access_key);
        }
        let store = builder.build()?;
        debug!(bucket = %config.bucket, endpoint = %config.endpoint, "S3 client built");
        let mut backend = Self::from_store(config.bucket.clone(), Arc::new(store))?
            .with_multipart_threshold(config.multipart_threshold);
        if let Some(admin) = S3BucketAdmin::from_config(config) {
            backend = backend.with_admin(Arc::new(admin));
        }
        Ok(backend)
    }

    /// Wrap an already-configured store bound to `bucket`.
    pub fn from_store(bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> StoreResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            bucket: bucket.into(),
            store,
            admin: None,
            runtime: Some(runtime),
            multipart_threshold: StoreConfig::default().multipart_threshold,
        })
    }

    /// Uploads above `bytes` go through multipart upload.
    pub fn with_multipart_threshold(mut self, bytes: u64) -> Self {
        self.multipart_threshold = bytes;
        self
    }

    /// Use `admin` for bucket creation.
    pub fn with_admin(mut self, admin: Arc<dyn BucketAdmin>) -> Self {
        self.admin = Some(admin);
        self
    }

    fn runtime(&self) -> StoreResult<&Runtime> {
        let runtime = self.runtime.as_ref().ok_or(StoreError::Closed)?;
        if Handle::try_current().is_ok() {
            return Err(StoreError::NotSupported(
                "blocking store call from within an async runtime".into(),
            ));
        }
        Ok(runtime)
    }

    fn put_single(
        &self,
        runtime: &Runtime,
        path: &Path,
        content: &mut dyn Read,
        size: u64,
        attributes: Attributes,
    ) -> StoreResult<u64> {
        let data = read_declared(content, size)?;
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        runtime.block_on(self.store.put_opts(path, PutPayload::from(data), opts))?;
        Ok(size)
    }

    fn put_multipart(
        &self,
        runtime: &Runtime,
        path: &Path,
        content: &mut dyn Read,
        size: u64,
        attributes: Attributes,
    ) -> StoreResult<u64> {
        runtime.block_on(upload_multipart(self.store.as_ref(), path, content, size, attributes))
    }
}

/// Stream `size` bytes through a multipart upload, aborting it on failure.
async fn upload_multipart(
    store: &dyn ObjectStore,
    path: &Path,
    content: &mut dyn Read,
    size: u64,
    attributes: Attributes,
) -> StoreResult<u64> {
    let opts = PutMultipartOptions {
        attributes,
        ..Default::default()
    };
    let upload = store.put_multipart_opts(path, opts).await?;
    let mut writer = WriteMultipart::new(upload);
    match stream_parts(content, size, &mut writer).await {
        Ok(()) => {
            writer.finish().await?;
            Ok(size)
        }
        Err(e) => {
            if let Err(abort) = writer.abort().await {
                warn!(path = %path, error = %abort, "failed to abort multipart upload");
            }
            Err(e)
        }
    }
}

/// Copy exactly `size` bytes into the multipart writer.
async fn stream_parts(
    content: &mut dyn Read,
    size: u64,
    writer: &mut WriteMultipart,
) -> StoreResult<()> {
    let mut buf = vec![0u8; UPLOAD_CHUNK];
    let mut total: u64 = 0;
    loop {
        let n = content.read(&mut buf)?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > size {
            break;
        }
        writer.wait_for_capacity(MAX_PARTS_IN_FLIGHT).await?;
        writer.write(&buf[..n]);
    }
    if total != size {
        return Err(StoreError::SizeMismatch {
            expected: size,
            actual: total,
        });
    }
    Ok(())
}

fn to_path(key: &str) -> StoreResult<Path> {
    Path::parse(key).map_err(|e| StoreError::InvalidPath {
        path: key.to_string(),
        reason: e.to_string(),
    })
}

fn to_attributes(metadata: &AttributeMap) -> Attributes {
    let mut attributes = Attributes::new();
    for (name, value) in metadata {
        attributes.insert(
            Attribute::Metadata(Cow::Owned(name.clone())),
            AttributeValue::from(value.clone()),
        );
    }
    attributes
}

fn from_attributes(attributes: &Attributes) -> AttributeMap {
    let mut metadata = AttributeMap::new();
    for (attribute, value) in attributes.iter() {
        if let Attribute::Metadata(name) = attribute {
            let value: &str = value.as_ref();
            metadata.insert(name.to_string(), value.to_string());
        }
    }
    metadata
}

fn object_info(meta: ObjectMeta) -> ObjectInfo {
    ObjectInfo {
        key: meta.location.to_string(),
        size: meta.size,
        last_modified: meta.last_modified,
    }
}

impl ObjectBackend for RemoteBackend {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn create_namespace(&self) -> StoreResult<()> {
        let runtime = self.runtime()?;
        match &self.admin {
            Some(admin) => runtime.block_on(admin.create_bucket(&self.bucket)),
            None => Err(StoreError::NotSupported(format!(
                "bucket creation through {}",
                self.store
            ))),
        }
    }

    fn namespace_exists(&self) -> StoreResult<bool> {
        let runtime = self.runtime()?;
        let first = runtime.block_on(async { self.store.list(None).next().await });
        match first {
            None | Some(Ok(_)) => Ok(true),
            Some(Err(object_store::Error::NotFound { .. })) => Ok(false),
            Some(Err(e)) => Err(e.into()),
        }
    }

    fn put_object(
        &self,
        key: &str,
        content: &mut dyn Read,
        size: u64,
        metadata: &AttributeMap,
    ) -> StoreResult<u64> {
        let runtime = self.runtime()?;
        let path = to_path(key)?;
        let attributes = to_attributes(metadata);
        if size > self.multipart_threshold {
            debug!(key, size, "multipart upload");
            self.put_multipart(runtime, &path, content, size, attributes)
        } else {
            self.put_single(runtime, &path, content, size, attributes)
        }
    }

    fn head_object(&self, key: &str) -> StoreResult<Option<ObjectHead>> {
        let runtime = self.runtime()?;
        let path = to_path(key)?;
        let opts = GetOptions {
            head: true,
            ..Default::default()
        };
        match runtime.block_on(self.store.get_opts(&path, opts)) {
            Ok(GetResult {
                meta, attributes, ..
            }) => Ok(Some(ObjectHead {
                info: object_info(meta),
                metadata: from_attributes(&attributes),
            })),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn get_object(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let runtime = self.runtime()?;
        let path = to_path(key)?;
        let fetched: object_store::Result<_> = runtime.block_on(async {
            let result = self.store.get(&path).await?;
            result.bytes().await
        });
        match fetched {
            Ok(bytes) => Ok(Some(bytes.to_vec())),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_object(&self, key: &str) -> StoreResult<()> {
        let runtime = self.runtime()?;
        let path = to_path(key)?;
        match runtime.block_on(self.store.delete(&path)) {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_objects(&self, prefix: &str) -> StoreResult<ObjectListing<'_>> {
        let runtime = self.runtime()?;
        let stream = if prefix.is_empty() {
            self.store.list(None)
        } else {
            let path = to_path(prefix)?;
            self.store.list(Some(&path))
        };
        Ok(Box::new(RemoteListing { runtime, stream }))
    }

    fn close(&mut self) -> StoreResult<()> {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
            debug!(bucket = %self.bucket, "remote backend closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("bucket", &self.bucket)
            .field("store", &format_args!("{}", self.store))
            .field("admin", &self.admin)
            .field("closed", &self.runtime.is_none())
            .finish()
    }
}

/// Blocking iterator over an `object_store` listing stream.
struct RemoteListing<'a> {
    runtime: &'a Runtime,
    stream: BoxStream<'static, object_store::Result<ObjectMeta>>,
}

impl Iterator for RemoteListing<'_> {
    type Item = StoreResult<ObjectInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.runtime.block_on(self.stream.next())?;
        Some(item.map(object_info).map_err(StoreError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use object_store::memory::InMemory;
    use std::io::Cursor;
    use std::sync::Mutex;

    fn backend() -> RemoteBackend {
        RemoteBackend::from_store("mirror", Arc::new(InMemory::new())).unwrap()
    }

    fn put(backend: &RemoteBackend, key: &str, data: &[u8], metadata: &AttributeMap) -> StoreResult<u64> {
        backend.put_object(key, &mut Cursor::new(data.to_vec()), data.len() as u64, metadata)
    }

    /// Records created buckets; a second creation reports the bucket exists.
    #[derive(Debug, Default)]
    struct RecordingAdmin {
        created: Mutex<Vec<String>>,
    }

    impl BucketAdmin for RecordingAdmin {
        fn create_bucket<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StoreResult<()>> {
            Box::pin(async move {
                let mut created = self.created.lock().unwrap();
                if created.iter().any(|b| b == bucket) {
                    return Err(StoreError::NamespaceExists(bucket.to_string()));
                }
                created.push(bucket.to_string());
                Ok(())
            })
        }
    }

    #[test]
    fn creates_bucket_through_admin() {
        let admin = Arc::new(RecordingAdmin::default());
        let backend = backend().with_admin(admin.clone());
        backend.create_namespace().unwrap();
        assert_eq!(*admin.created.lock().unwrap(), ["mirror"]);
        assert!(matches!(
            backend.create_namespace(),
            Err(StoreError::NamespaceExists(ref b)) if b == "mirror"
        ));
    }

    #[test]
    fn without_admin_creation_is_unsupported() {
        let backend = backend();
        assert!(matches!(backend.create_namespace(), Err(StoreError::NotSupported(_))));
        assert!(backend.namespace_exists().unwrap());
    }

    #[test]
    fn calls_from_inside_a_runtime_fail_cleanly() {
        let backend = backend();
        let outer = Builder::new_current_thread().build().unwrap();
        let result = outer.block_on(async { backend.head_object("k") });
        assert!(matches!(result, Err(StoreError::NotSupported(_))));
        // Still usable from a plain thread.
        assert!(backend.head_object("k").unwrap().is_none());
    }

    #[test]
    fn put_then_head_returns_metadata() {
        let backend = backend();
        let mut meta = AttributeMap::new();
        meta.insert("original-file-mode".into(), "0100644".into());
        meta.insert("owner".into(), "alice".into());

        assert_eq!(put(&backend, "p/a.txt", b"hello world", &meta).unwrap(), 11);

        let head = backend.head_object("p/a.txt").unwrap().expect("should exist");
        assert_eq!(head.info.key, "p/a.txt");
        assert_eq!(head.info.size, 11);
        assert_eq!(head.metadata, meta);
        assert_eq!(backend.get_object("p/a.txt").unwrap().unwrap(), b"hello world");
    }

    #[test]
    fn missing_objects() {
        let backend = backend();
        assert!(backend.head_object("nope").unwrap().is_none());
        assert!(backend.get_object("nope").unwrap().is_none());
        backend.delete_object("nope").unwrap();
    }

    #[test]
    fn list_by_prefix() {
        let backend = backend();
        for key in ["p/a", "p/b/...", "p2/c", "q"] {
            put(&backend, key, b"x", &AttributeMap::new()).unwrap();
        }
        let mut keys: Vec<String> = backend
            .list_objects("p")
            .unwrap()
            .map(|r| r.unwrap().key)
            .collect();
        keys.sort();
        assert_eq!(keys, ["p/a", "p/b/..."]);
        assert_eq!(backend.list_objects("").unwrap().count(), 4);
    }

    #[test]
    fn delete_removes_object() {
        let backend = backend();
        put(&backend, "k", b"x", &AttributeMap::new()).unwrap();
        backend.delete_object("k").unwrap();
        assert!(backend.head_object("k").unwrap().is_none());
    }

    #[test]
    fn single_put_size_mismatch() {
        let backend = backend();
        let err = backend
            .put_object("k", &mut Cursor::new(b"abc".to_vec()), 4, &AttributeMap::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::SizeMismatch { expected: 4, actual: 3 }));
        assert!(backend.head_object("k").unwrap().is_none());
    }

    #[test]
    fn multipart_upload_above_threshold() {
        let backend = backend().with_multipart_threshold(4);
        let mut meta = AttributeMap::new();
        meta.insert("owner".into(), "bob".into());
        let data = vec![7u8; 3 * 1024];
        assert_eq!(put(&backend, "big", &data, &meta).unwrap(), data.len() as u64);
        assert_eq!(backend.get_object("big").unwrap().unwrap(), data);
        assert_eq!(backend.head_object("big").unwrap().unwrap().metadata["owner"], "bob");
    }

    #[test]
    fn multipart_size_mismatch_aborts() {
        let backend = backend().with_multipart_threshold(4);
        let err = backend
            .put_object("big", &mut Cursor::new(vec![1u8; 10]), 20, &AttributeMap::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::SizeMismatch { expected: 20, actual: 10 }));
        assert!(backend.head_object("big").unwrap().is_none());
    }

    #[test]
    fn invalid_keys_are_rejected() {
        let backend = backend();
        assert!(matches!(
            put(&backend, "a//b", b"x", &AttributeMap::new()),
            Err(StoreError::InvalidPath { .. })
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let mut backend = backend();
        backend.close().unwrap();
        backend.close().unwrap();
        assert!(matches!(backend.list_objects(""), Err(StoreError::Closed)));
        assert!(matches!(backend.head_object("k"), Err(StoreError::Closed)));
    }

    #[test]
    fn attribute_conversion_keeps_only_metadata() {
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, AttributeValue::from("text/plain"));
        attributes.insert(Attribute::Metadata(Cow::Borrowed("k")), AttributeValue::from("v"));
        let metadata = from_attributes(&attributes);
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata["k"], "v");
    }
}
