use crate::services::{metadata_store::MetadataError, object_storage::StorageError};
use std::io;
use thiserror::Error;

/// Errors from the upload, manifest and thumbnail services.
///
/// Storage and metadata failures pass through untouched so callers see the
/// backend's own message.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("video `{0}` not found")]
    NotFound(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("upload `{upload_id}` failed for chunks {failed:?}")]
    ChunksFailed { upload_id: String, failed: Vec<usize> },
    #[error("failed to read upload source: {0}")]
    Read(#[source] io::Error),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

pub type MediaResult<T> = Result<T, MediaError>;
