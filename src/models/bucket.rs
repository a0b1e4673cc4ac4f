//! Represents a logical bucket - a top-level container for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage bucket.
///
/// Objects in a public bucket can be fetched through their public URL; every
/// other bucket is only reachable through signed URLs.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Unique identifier for this bucket (UUID for internal DB use).
    pub id: Uuid,

    /// Bucket name (lowercase letters, digits, dots and hyphens).
    pub name: String,

    /// Whether objects may be served without a signature.
    pub public: bool,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
