use bucketsync_types::FileEntryList;

/// Errors from the object-store adapter and its backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The bucket could neither be created nor found at construction time.
    #[error("cannot provision bucket {bucket}: {source}")]
    Construction {
        bucket: String,
        #[source]
        source: Box<StoreError>,
    },

    /// The backend reports that the bucket already exists.
    #[error("bucket already exists: {0}")]
    NamespaceExists(String),

    /// Network, authentication or backend failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Failure reported by an `object_store` backend.
    #[error("remote store error: {0}")]
    Remote(#[from] object_store::Error),

    /// The listing stream failed after `entries` had been collected.
    ///
    /// The entries are sorted but the inventory is incomplete.
    #[error("listing interrupted after {} entries: {source}", entries.len())]
    PartialList {
        entries: FileEntryList,
        #[source]
        source: Box<StoreError>,
    },

    /// The requested entry does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend cannot perform the requested operation.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// A relative path or object key failed validation.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A path component uses the reserved directory-sentinel name `...`.
    #[error("path {0:?} uses the reserved name \"...\"")]
    ReservedName(String),

    /// A symlink was written without a target.
    #[error("symlink {0:?} has an empty target")]
    InvalidSymlink(String),

    /// Directory deletion was requested while children still exist.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// The content stream length differs from the declared size.
    #[error("size mismatch: declared {expected} bytes, read {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// A modification time outside the representable calendar range.
    #[error("modification time {0} is out of range")]
    InvalidMtime(i64),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The adapter or backend has already been closed.
    #[error("store is closed")]
    Closed,

    /// Local I/O error while reading content.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Entries salvaged from an interrupted listing, if this is one.
    pub fn partial_entries(&self) -> Option<&FileEntryList> {
        match self {
            Self::PartialList { entries, .. } => Some(entries),
            _ => None,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
