//! Values handed back to callers of the upload, manifest and thumbnail paths.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Result of a completed chunked upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedVideo {
    pub video_id: String,
    /// Application-internal reference (`/api/video/{id}`), not an object URL.
    pub video_url: String,
}

impl UploadedVideo {
    pub fn new(video_id: impl Into<String>) -> Self {
        let video_id = video_id.into();
        Self {
            video_url: format!("/api/video/{}", video_id),
            video_id,
        }
    }
}

/// Ordered, time-limited chunk URLs for sequential playback.
///
/// `chunks` is best effort: chunks whose signing failed are absent, and the
/// remaining ones keep their original relative order.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamManifest {
    pub manifest_url: String,
    pub chunks: Vec<String>,
}

/// A video frame extracted by the client, not yet persisted.
#[derive(Clone, Debug)]
pub struct ThumbnailAsset {
    pub blob: Bytes,
    /// Offset into the source video, in seconds.
    pub timestamp: f64,
    pub is_vertical: bool,
}

/// A thumbnail after it has been written to the media bucket.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredThumbnail {
    pub url: String,
    pub timestamp: f64,
    pub is_vertical: bool,
}
