//! Persists client-extracted video frames as poster images and links them to
//! the media row of the upload.

use crate::{
    models::{
        media::{MediaPatch, MediaRecord},
        video::{StoredThumbnail, ThumbnailAsset},
    },
    services::{
        media_error::MediaResult,
        metadata_store::MetadataStore,
        object_storage::{ObjectStorage, UploadOptions},
    },
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const THUMBNAIL_PREFIX: &str = "thumbnails";
const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

pub struct ThumbnailPipeline {
    storage: Arc<dyn ObjectStorage>,
    store: Arc<dyn MetadataStore>,
    bucket: String,
}

/// `thumbnails/{stem}-{index}-{random}.jpg`, where `stem` is the video file
/// name without extension reduced to `[a-z0-9_-]`.
pub fn thumbnail_path(video_name: &str, index: usize) -> String {
    let stem = video_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(video_name);
    let mut slug: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if slug.trim_matches('-').is_empty() {
        slug = "video".into();
    }
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}/{}-{}-{}.jpg", THUMBNAIL_PREFIX, slug, index, &suffix[..8])
}

impl ThumbnailPipeline {
    pub fn new(storage: Arc<dyn ObjectStorage>, store: Arc<dyn MetadataStore>, bucket: impl Into<String>) -> Self {
        Self {
            storage,
            store,
            bucket: bucket.into(),
        }
    }

    /// Upload every asset concurrently and return their public URLs in input
    /// order.
    ///
    /// All or nothing: if one upload fails, the ones that succeeded are
    /// removed again and the first error is returned.
    pub async fn upload_thumbnails(
        &self,
        video_name: &str,
        assets: Vec<ThumbnailAsset>,
    ) -> MediaResult<Vec<StoredThumbnail>> {
        let planned: Vec<(String, ThumbnailAsset)> = assets
            .into_iter()
            .enumerate()
            .map(|(index, asset)| (thumbnail_path(video_name, index), asset))
            .collect();

        let results = join_all(planned.iter().enumerate().map(|(index, (path, asset))| {
            let options = UploadOptions::new(THUMBNAIL_CONTENT_TYPE).upsert(true);
            async move {
                self.storage
                    .upload(&self.bucket, path, asset.blob.clone(), options)
                    .await
                    .map_err(|err| {
                        error!(bucket = %self.bucket, path = %path, index, error = %err, "thumbnail upload failed");
                        err
                    })
            }
        }))
        .await;

        if results.iter().any(Result::is_err) {
            let written: Vec<String> = planned
                .iter()
                .zip(&results)
                .filter(|(_, result)| result.is_ok())
                .map(|((path, _), _)| path.clone())
                .collect();
            if !written.is_empty() {
                if let Err(err) = self.storage.remove(&self.bucket, &written).await {
                    warn!(bucket = %self.bucket, error = %err, "failed to clean up partial thumbnail set");
                }
            }
            let first = results.into_iter().find_map(Result::err);
            if let Some(err) = first {
                return Err(err.into());
            }
        }

        let stored: Vec<StoredThumbnail> = planned
            .into_iter()
            .map(|(path, asset)| StoredThumbnail {
                url: self.storage.public_url(&self.bucket, &path),
                timestamp: asset.timestamp,
                is_vertical: asset.is_vertical,
            })
            .collect();
        info!(video_name, count = stored.len(), "thumbnails stored");
        Ok(stored)
    }

    /// Patch the media row that references `upload_id`.
    ///
    /// Returns `Ok(None)` when no media row references the upload yet or
    /// there is nothing to patch.
    pub async fn link_to_media(
        &self,
        upload_id: &str,
        thumbnail_url: Option<String>,
        duration: Option<f64>,
    ) -> MediaResult<Option<MediaRecord>> {
        let patch = MediaPatch {
            thumbnail_url,
            duration,
        };
        if patch.is_empty() {
            return Ok(None);
        }

        let Some(media) = self.store.find_media_by_upload_id(upload_id).await? else {
            debug!(upload_id, "no media row references this upload");
            return Ok(None);
        };

        let updated = self.store.update_media(&media.id, &patch).await?;
        if updated.is_some() {
            info!(upload_id, media_id = %media.id, "media linked to thumbnails");
        }
        Ok(updated)
    }
}
