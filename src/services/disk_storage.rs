//! src/services/disk_storage.rs
//!
//! DiskObjectStorage: the local object storage backend. Object payloads are
//! written to disk sharded beneath `base_path/{bucket}/{shard}/{shard}/{key}`
//! and catalogued in SQLite so they can be served with their content type and
//! cache headers. Public and signed URLs point back at this process.

use crate::{
    models::{bucket::Bucket, object::StoredObject},
    services::{
        object_storage::{ObjectStorage, StorageError, StorageResult, UploadOptions},
        url_signer::UrlSigner,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, warn};
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(Clone)]
pub struct DiskObjectStorage {
    /// Shared SQLite connection pool used for the object catalogue.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Externally reachable origin of this service, without trailing slash.
    public_base_url: String,

    signer: UrlSigner,
}

impl DiskObjectStorage {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        public_base_url: impl Into<String>,
        signer: UrlSigner,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            signer,
        }
    }

    /// Rejects keys that are empty, too long, absolute, contain `..` or
    /// control characters.
    fn ensure_key_safe(&self, key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }
        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// First two bytes of MD5(bucket/key) as lowercase hex, used as two
    /// directory levels to keep per-directory file counts low.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, Bucket>(
            "SELECT id, name, public, created_at FROM buckets WHERE name = ?",
        )
        .bind(bucket)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::BucketNotFound(bucket.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StorageResult<Option<StoredObject>> {
        let object = sqlx::query_as::<_, StoredObject>(
            "SELECT id, bucket_id, key, content_type, cache_control, size_bytes, etag, last_modified
             FROM objects
             WHERE key = ? AND bucket_id = ?",
        )
        .bind(key)
        .bind(bucket.id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(object)
    }

    /// Create the bucket if missing and set its visibility.
    pub async fn ensure_bucket(&self, name: &str, public: bool) -> StorageResult<Bucket> {
        self.ensure_bucket_name_safe(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        let bucket = sqlx::query_as::<_, Bucket>(
            "INSERT INTO buckets (id, name, public, created_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET public = excluded.public
             RETURNING id, name, public, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(public)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        debug!(bucket = %bucket.name, public = bucket.public, "bucket ready");
        Ok(bucket)
    }

    /// Write a payload to disk and upsert its catalogue row.
    ///
    /// Bytes go to a temp file that is fsynced and then renamed into place,
    /// so a reader never sees a partially written object.
    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        options: UploadOptions,
    ) -> StorageResult<StoredObject> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        if !options.upsert && self.fetch_object(&bucket_rec, key).await?.is_some() {
            return Err(StorageError::ObjectAlreadyExists {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        if let Err(err) = write_synced(&tmp_path, &data).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        let etag = format!("{:x}", md5::compute(&data));
        let insert_result = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, content_type, cache_control, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                content_type = excluded.content_type,
                cache_control = excluded.cache_control,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, bucket_id, key, content_type, cache_control, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(bucket_rec.id)
        .bind(key)
        .bind(&options.content_type)
        .bind(&options.cache_control)
        .bind(data.len() as i64)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(obj) => Ok(obj),
            Err(err) => {
                let _ = fs::remove_file(&file_path).await;
                Err(StorageError::Sqlx(err))
            }
        }
    }

    async fn open_object(&self, bucket_rec: &Bucket, key: &str) -> StorageResult<(StoredObject, File)> {
        let not_found = || StorageError::ObjectNotFound {
            bucket: bucket_rec.name.clone(),
            key: key.to_string(),
        };

        let object = self.fetch_object(bucket_rec, key).await?.ok_or_else(not_found)?;
        let file_path = self.object_path(&bucket_rec.name, key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                not_found()
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Open an object for serving without a signature. Only public buckets
    /// allow this.
    pub async fn open_public(&self, bucket: &str, key: &str) -> StorageResult<(StoredObject, File)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        if !bucket_rec.public {
            return Err(StorageError::NotPublic(bucket.to_string()));
        }
        self.open_object(&bucket_rec, key).await
    }

    /// Open an object addressed by a signed URL after verifying it.
    pub async fn open_signed(
        &self,
        bucket: &str,
        key: &str,
        exp: i64,
        sig: &str,
    ) -> StorageResult<(StoredObject, File)> {
        self.ensure_key_safe(key)?;
        self.signer.verify(bucket, key, exp, sig)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        self.open_object(&bucket_rec, key).await
    }

    async fn remove_object(&self, bucket_rec: &Bucket, key: &str) -> StorageResult<()> {
        self.ensure_key_safe(key)?;
        sqlx::query("DELETE FROM objects WHERE key = ? AND bucket_id = ?")
            .bind(key)
            .bind(bucket_rec.id)
            .execute(&*self.db)
            .await?;

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket_rec.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    /// Remove empty directories from `start` up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStorage for DiskObjectStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        options: UploadOptions,
    ) -> StorageResult<()> {
        let object = self.write_object(bucket, path, data, options).await?;
        debug!(bucket, path, size_bytes = object.size_bytes, "object stored");
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.public_base_url, bucket, path
        )
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expiry_secs: u64,
    ) -> StorageResult<String> {
        self.ensure_key_safe(path)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        if self.fetch_object(&bucket_rec, path).await?.is_none() {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: path.to_string(),
            });
        }

        let (exp, sig) = self.signer.sign(bucket, path, expiry_secs);
        Ok(format!(
            "{}/storage/v1/object/sign/{}/{}?exp={}&sig={}",
            self.public_base_url, bucket, path, exp, sig
        ))
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> StorageResult<()> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        for path in paths {
            if let Err(err) = self.remove_object(&bucket_rec, path).await {
                warn!(bucket, path = %path, error = %err, "failed to remove object");
                return Err(err);
            }
        }
        Ok(())
    }

    /// Runs `SELECT 1` and a write/read/delete round trip under `base_path`.
    async fn ping(&self) -> StorageResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;

        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read? != b"readyz" {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "file content mismatch",
            )));
        }
        Ok(())
    }
}

async fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
