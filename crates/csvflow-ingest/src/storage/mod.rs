//! Object storage façade
//!
//! The pipeline only needs a handful of bucket operations. [`ObjectStore`] is
//! implemented by [`S3ObjectStore`] for S3-compatible backends and by
//! in-memory doubles in tests.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

pub mod config;
pub mod s3;

pub use s3::S3ObjectStore;

/// Address of one object: bucket plus key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: i64,
}

/// Result of a copy request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyResult {
    /// The backend acknowledged the destination object
    pub confirmed: bool,
}

impl CopyResult {
    pub fn confirmed() -> Self {
        Self { confirmed: true }
    }

    pub fn unconfirmed() -> Self {
        Self { confirmed: false }
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects in `bucket`, optionally restricted to a key prefix
    async fn list(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectMeta>>;

    async fn copy(&self, source: &ObjectRef, destination: &ObjectRef) -> Result<CopyResult>;

    async fn delete(&self, object: &ObjectRef) -> Result<()>;

    async fn exists(&self, object: &ObjectRef) -> Result<bool>;

    /// Fetch an object's bytes
    async fn download(&self, object: &ObjectRef) -> Result<Vec<u8>>;
}
