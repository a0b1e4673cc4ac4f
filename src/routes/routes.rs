//! Defines routes for the video and object-serving APIs.
//!
//! ## Structure
//! - **Video endpoints**
//!   - `POST   /api/videos`                 - chunked upload of the raw request body
//!   - `GET    /api/video/{id}`             - chunked upload descriptor
//!   - `DELETE /api/video/{id}`             - remove chunks and descriptor
//!   - `POST   /api/video/{id}/thumbnails`  - store poster frames, link media
//!   - `GET    /api/stream/{id}`            - signed playback manifest
//!
//! - **Object endpoints**
//!   - `GET /storage/v1/object/public/{bucket}/{*key}` - public bucket objects
//!   - `GET /storage/v1/object/sign/{bucket}/{*key}`   - signed URL objects
//!
//! The wildcard `*key` allows nested keys like `videos/{id}/chunk_00000`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        object_handlers::{get_public_object, get_signed_object},
        video_handlers::{
            delete_video, get_video, stream_manifest, upload_thumbnails, upload_video,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

const THUMBNAIL_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Build the router. Every handler shares `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Video routes
        .route(
            "/api/videos",
            post(upload_video).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/video/{id}", get(get_video).delete(delete_video))
        .route(
            "/api/video/{id}/thumbnails",
            post(upload_thumbnails).layer(DefaultBodyLimit::max(THUMBNAIL_BODY_LIMIT)),
        )
        .route("/api/stream/{id}", get(stream_manifest))
        // Object routes
        .route(
            "/storage/v1/object/public/{bucket}/{*key}",
            get(get_public_object),
        )
        .route(
            "/storage/v1/object/sign/{bucket}/{*key}",
            get(get_signed_object),
        )
}
