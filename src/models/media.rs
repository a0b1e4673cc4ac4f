//! Media rows owned by the content backend.
//!
//! This service never creates or deletes media; it only finds the row that
//! points at a chunked upload and patches its poster and duration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::FromRow;

/// Typed view of the `media.metadata` JSON blob.
///
/// Unknown keys are kept so a patch never drops data written by other tools.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct MediaMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunked_upload_id: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct MediaRecord {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Duration of the video in seconds.
    pub duration: Option<f64>,
    pub metadata: MediaMetadata,
    pub created_at: DateTime<Utc>,
}

/// Raw `media` row with the metadata column still encoded.
#[derive(FromRow, Debug)]
pub struct MediaRow {
    pub id: String,
    pub title: String,
    pub url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration: Option<f64>,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<MediaRow> for MediaRecord {
    type Error = serde_json::Error;

    fn try_from(row: MediaRow) -> Result<Self, Self::Error> {
        Ok(MediaRecord {
            metadata: serde_json::from_str(&row.metadata)?,
            id: row.id,
            title: row.title,
            url: row.url,
            thumbnail_url: row.thumbnail_url,
            duration: row.duration,
            created_at: row.created_at,
        })
    }
}

/// Fields the thumbnail pipeline may update. `None` leaves a column untouched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MediaPatch {
    pub thumbnail_url: Option<String>,
    pub duration: Option<f64>,
}

impl MediaPatch {
    pub fn is_empty(&self) -> bool {
        self.thumbnail_url.is_none() && self.duration.is_none()
    }
}
