use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::key::normalize_prefix;

/// Connection and layout settings for a mirrored tree.
///
/// Everything the adapter needs is passed in explicitly; nothing is read
/// from the process environment.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Host (and optional port or scheme) of an S3-compatible service.
    /// Empty selects the provider's default endpoint.
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Use TLS for the endpoint.
    pub secure: bool,
    pub region: String,
    pub bucket: String,
    /// Key prefix under which the tree is stored.
    pub prefix: String,
    /// Issue a metadata fetch per object when listing.
    pub fetch_metadata: bool,
    /// Uploads larger than this many bytes use multipart upload.
    pub multipart_threshold: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            secure: true,
            region: "us-east-1".into(),
            bucket: String::new(),
            prefix: String::new(),
            fetch_metadata: false,
            multipart_threshold: 64 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Load a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Point the config at a parsed `bucket/prefix` destination.
    pub fn with_target(mut self, target: StoreTarget) -> Self {
        self.bucket = target.bucket;
        self.prefix = target.prefix;
        self
    }

    /// Endpoint URL with a scheme derived from `secure` when none is given.
    pub fn endpoint_url(&self) -> Option<String> {
        if self.endpoint.is_empty() {
            None
        } else if self.endpoint.contains("://") {
            Some(self.endpoint.clone())
        } else {
            let scheme = if self.secure { "https" } else { "http" };
            Some(format!("{scheme}://{}", self.endpoint))
        }
    }

    /// Check required fields and return the normalized prefix.
    pub fn validate(&self) -> StoreResult<String> {
        validate_bucket(&self.bucket)?;
        if self.access_key_id.is_empty() != self.secret_access_key.is_empty() {
            return Err(StoreError::Config(
                "access key id and secret access key must be given together".into(),
            ));
        }
        if self.multipart_threshold == 0 {
            return Err(StoreError::Config("multipart threshold must be positive".into()));
        }
        normalize_prefix(&self.prefix)
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("secure", &self.secure)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("fetch_metadata", &self.fetch_metadata)
            .field("multipart_threshold", &self.multipart_threshold)
            .finish()
    }
}

/// A `bucket/prefix/path` destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreTarget {
    pub bucket: String,
    pub prefix: String,
}

impl StoreTarget {
    /// Split a destination into bucket and normalized prefix.
    ///
    /// ```
    /// use bucketsync_store::StoreTarget;
    ///
    /// let target = StoreTarget::parse("mirror/backup/site1/").unwrap();
    /// assert_eq!(target.bucket, "mirror");
    /// assert_eq!(target.prefix, "backup/site1");
    /// assert!(StoreTarget::parse("/").is_err());
    /// ```
    pub fn parse(dest: &str) -> StoreResult<Self> {
        let trimmed = dest.trim_start_matches('/');
        let (bucket, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));
        validate_bucket(bucket)?;
        Ok(Self {
            bucket: bucket.to_string(),
            prefix: normalize_prefix(rest)?,
        })
    }
}

fn validate_bucket(bucket: &str) -> StoreResult<()> {
    if bucket.is_empty() {
        return Err(StoreError::Config("bucket name must not be empty".into()));
    }
    if bucket.contains('/') || bucket.chars().any(char::is_whitespace) {
        return Err(StoreError::Config(format!("invalid bucket name: {bucket:?}")));
    }
    Ok(())
}
