//! Descriptor for a video persisted as an ordered set of chunk objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Lifecycle of a chunked upload.
///
/// A descriptor only reaches `Complete` after every chunk has been stored.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Complete,
    Error,
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Complete => "complete",
            UploadStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// The single source of truth for the chunk layout of one logical video.
///
/// Chunk `i` spans bytes `[i * chunk_size, min((i + 1) * chunk_size, file_size))`
/// and is stored at `chunk_files[i]`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChunkedUpload {
    /// Stable identifier, also the public video identifier.
    pub id: String,

    /// Name of the source file as supplied by the uploader.
    pub original_filename: String,

    /// Size of the source file in bytes.
    pub file_size: i64,

    /// MIME type of the source file.
    pub mime_type: String,

    /// Number of chunks the source was split into.
    pub total_chunks: i64,

    /// Nominal chunk size in bytes (the last chunk may be shorter).
    pub chunk_size: i64,

    /// Storage paths, index-aligned with chunk order.
    pub chunk_files: Vec<String>,

    /// Bucket holding every chunk of this upload.
    pub storage_bucket: String,

    /// Path prefix shared by every chunk of this upload.
    pub base_path: String,

    pub status: UploadStatus,

    pub created_at: DateTime<Utc>,
}

impl ChunkedUpload {
    /// Check the invariants a stored descriptor must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("id must not be empty".into());
        }
        if self.total_chunks < 0 || self.chunk_size < 0 || self.file_size < 0 {
            return Err("sizes and counts must not be negative".into());
        }
        if self.status == UploadStatus::Complete
            && self.chunk_files.len() as i64 != self.total_chunks
        {
            return Err(format!(
                "complete upload lists {} chunk files but total_chunks is {}",
                self.chunk_files.len(),
                self.total_chunks
            ));
        }
        Ok(())
    }
}

/// Raw `chunked_uploads` row; `chunk_files` is a JSON array of strings.
#[derive(FromRow, Debug)]
pub struct ChunkedUploadRow {
    pub id: String,
    pub original_filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub total_chunks: i64,
    pub chunk_size: i64,
    pub chunk_files: String,
    pub storage_bucket: String,
    pub base_path: String,
    pub status: UploadStatus,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ChunkedUploadRow> for ChunkedUpload {
    type Error = String;

    fn try_from(row: ChunkedUploadRow) -> Result<Self, Self::Error> {
        let chunk_files: Vec<String> = serde_json::from_str(&row.chunk_files)
            .map_err(|err| format!("chunk_files is not a JSON string array: {}", err))?;

        let upload = ChunkedUpload {
            id: row.id,
            original_filename: row.original_filename,
            file_size: row.file_size,
            mime_type: row.mime_type,
            total_chunks: row.total_chunks,
            chunk_size: row.chunk_size,
            chunk_files,
            storage_bucket: row.storage_bucket,
            base_path: row.base_path,
            status: row.status,
            created_at: row.created_at,
        };
        upload.validate()?;
        Ok(upload)
    }
}
