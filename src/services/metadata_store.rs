//! Metadata store capability: the `chunked_uploads` descriptor table and the
//! externally owned `media` table.
//!
//! Descriptor writes are single-statement upserts, so they either land whole
//! or not at all. Concurrent writers for the same id are last-write-wins;
//! nothing here versions a row.

use crate::models::{
    chunked_upload::{ChunkedUpload, ChunkedUploadRow},
    media::{MediaPatch, MediaRecord, MediaRow},
};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("stored record `{id}` is invalid: {reason}")]
    InvalidRecord { id: String, reason: String },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or fully replace the descriptor with `upload.id`.
    async fn upsert_chunked_upload(&self, upload: &ChunkedUpload) -> MetadataResult<()>;

    async fn get_chunked_upload(&self, id: &str) -> MetadataResult<Option<ChunkedUpload>>;

    /// Returns `false` when no descriptor has this id.
    async fn delete_chunked_upload(&self, id: &str) -> MetadataResult<bool>;

    /// Media row whose `metadata.chunked_upload_id` equals `upload_id`.
    async fn find_media_by_upload_id(&self, upload_id: &str) -> MetadataResult<Option<MediaRecord>>;

    /// Apply `patch` to the media row and return the updated row.
    async fn update_media(&self, media_id: &str, patch: &MediaPatch) -> MetadataResult<Option<MediaRecord>>;

    async fn ping(&self) -> MetadataResult<()>;
}

#[derive(Clone)]
pub struct SqliteMetadataStore {
    pub db: Arc<SqlitePool>,
}

const UPLOAD_COLUMNS: &str = "id, original_filename, file_size, mime_type, total_chunks, \
     chunk_size, chunk_files, storage_bucket, base_path, status, created_at";

const MEDIA_COLUMNS: &str = "id, title, url, thumbnail_url, duration, metadata, created_at";

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    fn decode_upload(row: ChunkedUploadRow) -> MetadataResult<ChunkedUpload> {
        let id = row.id.clone();
        ChunkedUpload::try_from(row).map_err(|reason| {
            warn!(upload_id = %id, %reason, "rejecting invalid chunked upload row");
            MetadataError::InvalidRecord { id, reason }
        })
    }

    fn decode_media(row: MediaRow) -> MetadataResult<MediaRecord> {
        let id = row.id.clone();
        MediaRecord::try_from(row).map_err(|err| {
            warn!(media_id = %id, error = %err, "rejecting media row with invalid metadata");
            MetadataError::InvalidRecord {
                id,
                reason: err.to_string(),
            }
        })
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn upsert_chunked_upload(&self, upload: &ChunkedUpload) -> MetadataResult<()> {
        let chunk_files = serde_json::to_string(&upload.chunk_files)?;

        sqlx::query(
            r#"
            INSERT INTO chunked_uploads (
                id, original_filename, file_size, mime_type, total_chunks,
                chunk_size, chunk_files, storage_bucket, base_path, status, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                original_filename = excluded.original_filename,
                file_size = excluded.file_size,
                mime_type = excluded.mime_type,
                total_chunks = excluded.total_chunks,
                chunk_size = excluded.chunk_size,
                chunk_files = excluded.chunk_files,
                storage_bucket = excluded.storage_bucket,
                base_path = excluded.base_path,
                status = excluded.status
            "#,
        )
        .bind(&upload.id)
        .bind(&upload.original_filename)
        .bind(upload.file_size)
        .bind(&upload.mime_type)
        .bind(upload.total_chunks)
        .bind(upload.chunk_size)
        .bind(chunk_files)
        .bind(&upload.storage_bucket)
        .bind(&upload.base_path)
        .bind(upload.status)
        .bind(upload.created_at)
        .execute(&*self.db)
        .await?;

        debug!(upload_id = %upload.id, status = %upload.status, "chunked upload upserted");
        Ok(())
    }

    async fn get_chunked_upload(&self, id: &str) -> MetadataResult<Option<ChunkedUpload>> {
        let row = sqlx::query_as::<_, ChunkedUploadRow>(&format!(
            "SELECT {} FROM chunked_uploads WHERE id = ?",
            UPLOAD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        row.map(Self::decode_upload).transpose()
    }

    async fn delete_chunked_upload(&self, id: &str) -> MetadataResult<bool> {
        let result = sqlx::query("DELETE FROM chunked_uploads WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_media_by_upload_id(&self, upload_id: &str) -> MetadataResult<Option<MediaRecord>> {
        let row = sqlx::query_as::<_, MediaRow>(&format!(
            "SELECT {} FROM media
             WHERE json_extract(metadata, '$.chunked_upload_id') = ?
             ORDER BY created_at ASC
             LIMIT 1",
            MEDIA_COLUMNS
        ))
        .bind(upload_id)
        .fetch_optional(&*self.db)
        .await?;

        row.map(Self::decode_media).transpose()
    }

    async fn update_media(&self, media_id: &str, patch: &MediaPatch) -> MetadataResult<Option<MediaRecord>> {
        let row = sqlx::query_as::<_, MediaRow>(&format!(
            "UPDATE media SET
                thumbnail_url = COALESCE(?, thumbnail_url),
                duration = COALESCE(?, duration)
             WHERE id = ?
             RETURNING {}",
            MEDIA_COLUMNS
        ))
        .bind(patch.thumbnail_url.as_deref())
        .bind(patch.duration)
        .bind(media_id)
        .fetch_optional(&*self.db)
        .await?;

        row.map(Self::decode_media).transpose()
    }

    async fn ping(&self) -> MetadataResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }
}
