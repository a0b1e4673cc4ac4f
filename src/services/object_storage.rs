//! Object storage capability consumed by the upload, manifest and thumbnail
//! services. The disk backend lives in `disk_storage`; tests use an
//! in-memory fake.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

use crate::services::url_signer::SignatureError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("object `{key}` already exists in bucket `{bucket}`")]
    ObjectAlreadyExists { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("bucket `{0}` is not public")]
    NotPublic(String),
    #[error(transparent)]
    Signature(#[from] SignatureError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Options for a single object write.
#[derive(Clone, Debug)]
pub struct UploadOptions {
    /// `Cache-Control` max-age, in seconds, served with the object.
    pub cache_control: String,
    pub content_type: String,
    /// Overwrite an existing object at the same path instead of failing.
    pub upsert: bool,
}

impl UploadOptions {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            cache_control: "3600".into(),
            content_type: content_type.into(),
            upsert: false,
        }
    }

    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Write `data` at `path` inside `bucket`.
    ///
    /// With `upsert` set this never fails because content already exists.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        options: UploadOptions,
    ) -> StorageResult<()>;

    /// Unsigned URL for an object in a public bucket. Does not check existence.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// Time-limited URL granting read access to a private object.
    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expiry_secs: u64,
    ) -> StorageResult<String>;

    /// Remove objects. Paths that do not exist are ignored.
    async fn remove(&self, bucket: &str, paths: &[String]) -> StorageResult<()>;

    /// Cheap round trip used by the readiness probe.
    async fn ping(&self) -> StorageResult<()>;
}
