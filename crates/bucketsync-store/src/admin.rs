//! Bucket administration against an S3-compatible endpoint.
//!
//! `object_store` only speaks to objects inside an existing bucket, so
//! bucket creation goes through the AWS SDK. [`RemoteBackend`] drives a
//! [`BucketAdmin`] from its own runtime.
//!
//! [`RemoteBackend`]: crate::remote::RemoteBackend

use std::fmt;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use futures::future::BoxFuture;
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// Region that rejects an explicit location constraint.
const DEFAULT_REGION: &str = "us-east-1";

/// Service error codes meaning the bucket is already there.
const EXISTS_CODES: [&str; 2] = ["BucketAlreadyOwnedByYou", "BucketAlreadyExists"];

/// Bucket-level operations the object API does not cover.
pub trait BucketAdmin: Send + Sync + fmt::Debug {
    /// Create `bucket`. An existing bucket is [`StoreError::NamespaceExists`].
    fn create_bucket<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StoreResult<()>>;
}

/// [`BucketAdmin`] issuing `CreateBucket` through the AWS SDK.
pub struct S3BucketAdmin {
    client: Client,
    region: String,
}

impl S3BucketAdmin {
    /// Build a client for the endpoint, region and credentials in `config`.
    ///
    /// Returns `None` without explicit credentials; the caller then relies
    /// on the bucket already existing.
    pub fn from_config(config: &StoreConfig) -> Option<Self> {
        if config.access_key_id.is_empty() {
            debug!(bucket = %config.bucket, "no explicit credentials, bucket creation disabled");
            return None;
        }
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "bucketsync",
        );
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(true);
        if let Some(endpoint) = config.endpoint_url() {
            builder = builder.endpoint_url(endpoint);
        }
        Some(Self {
            client: Client::from_conf(builder.build()),
            region: config.region.clone(),
        })
    }
}

impl BucketAdmin for S3BucketAdmin {
    fn create_bucket<'a>(&'a self, bucket: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let mut request = self.client.create_bucket().bucket(bucket);
            if !self.region.is_empty() && self.region != DEFAULT_REGION {
                let location = CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build();
                request = request.create_bucket_configuration(location);
            }
            match request.send().await {
                Ok(_) => Ok(()),
                Err(err) => Err(classify(
                    bucket,
                    err.code(),
                    DisplayErrorContext(&err).to_string(),
                )),
            }
        })
    }
}

impl fmt::Debug for S3BucketAdmin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3BucketAdmin")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Map a failed `CreateBucket` onto the store's error type.
fn classify(bucket: &str, code: Option<&str>, detail: String) -> StoreError {
    match code {
        Some(code) if EXISTS_CODES.contains(&code) => StoreError::NamespaceExists(bucket.to_string()),
        _ => StoreError::Transport(format!("create bucket {bucket}: {detail}")),
    }
}
