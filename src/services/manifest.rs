//! Builds playback manifests from stored chunk descriptors.
//!
//! URLs are signed per request rather than at upload time because they
//! expire.

use crate::{
    models::{chunked_upload::UploadStatus, video::StreamManifest},
    services::{
        media_error::{MediaError, MediaResult},
        metadata_store::MetadataStore,
        object_storage::ObjectStorage,
    },
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_EXPIRY_SECS: u64 = 86_400;

pub struct ManifestBuilder {
    storage: Arc<dyn ObjectStorage>,
    store: Arc<dyn MetadataStore>,
    default_expiry: u64,
}

impl ManifestBuilder {
    pub fn new(storage: Arc<dyn ObjectStorage>, store: Arc<dyn MetadataStore>) -> Self {
        Self {
            storage,
            store,
            default_expiry: DEFAULT_EXPIRY_SECS,
        }
    }

    pub fn with_default_expiry(mut self, secs: u64) -> Self {
        self.default_expiry = secs;
        self
    }

    /// Sign every chunk of `video_id` and return them in chunk order.
    ///
    /// An unknown id, or an upload that has not completed, fails before any
    /// URL is signed. A chunk whose signing fails is logged and left out; the
    /// rest keep their relative order.
    pub async fn build(&self, video_id: &str, expiry_secs: Option<u64>) -> MediaResult<StreamManifest> {
        let upload = self
            .store
            .get_chunked_upload(video_id)
            .await?
            .ok_or_else(|| MediaError::NotFound(video_id.to_string()))?;
        if upload.status != UploadStatus::Complete {
            debug!(video_id, status = %upload.status, "upload not complete, no manifest");
            return Err(MediaError::NotFound(video_id.to_string()));
        }
        let expiry = expiry_secs.unwrap_or(self.default_expiry);

        let signed = join_all(upload.chunk_files.iter().enumerate().map(|(index, path)| {
            let bucket = upload.storage_bucket.as_str();
            async move {
                match self.storage.create_signed_url(bucket, path, expiry).await {
                    Ok(url) => Some(url),
                    Err(err) => {
                        warn!(video_id, bucket, path = %path, index, error = %err, "dropping chunk from manifest");
                        None
                    }
                }
            }
        }))
        .await;

        let chunks: Vec<String> = signed.into_iter().flatten().collect();
        debug!(
            video_id,
            signed = chunks.len(),
            total = upload.chunk_files.len(),
            "manifest built"
        );

        Ok(StreamManifest {
            manifest_url: format!("/api/stream/{}", video_id),
            chunks,
        })
    }
}
