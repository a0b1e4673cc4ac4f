//! HTTP handlers for chunked video upload, manifests and thumbnails.

use crate::{
    errors::AppError,
    models::{
        chunked_upload::ChunkedUpload,
        video::{StoredThumbnail, StreamManifest, ThumbnailAsset, UploadedVideo},
    },
    services::uploader::UploadSource,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::io;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub filename: String,
    pub chunk_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailInput {
    /// Base64-encoded JPEG.
    pub data: String,
    pub timestamp: f64,
    #[serde(default)]
    pub is_vertical: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailBatchRequest {
    pub video_name: String,
    pub duration: Option<f64>,
    pub thumbnails: Vec<ThumbnailInput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailBatchResponse {
    pub thumbnails: Vec<StoredThumbnail>,
    pub linked_media_id: Option<String>,
}

/// `POST /api/videos?filename=&chunk_size=` - raw request body is the video.
pub async fn upload_video(
    State(state): State<AppState>,
    Query(q): Query<UploadQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<UploadedVideo>), AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let expected_size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let source = UploadSource {
        filename: q.filename,
        content_type,
        expected_size,
        chunk_size: q.chunk_size,
    };
    let video = state.uploader.upload_stream(source, stream).await?;
    Ok((StatusCode::CREATED, Json(video)))
}

/// `GET /api/video/{id}` - the descriptor behind an opaque video reference.
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Result<Json<ChunkedUpload>, AppError> {
    let upload = state
        .store
        .get_chunked_upload(&video_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("video `{}` not found", video_id)))?;
    Ok(Json(upload))
}

/// `DELETE /api/video/{id}`
pub async fn delete_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.uploader.delete_upload(&video_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/stream/{id}?expires_in=`
pub async fn stream_manifest(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    Query(q): Query<StreamQuery>,
) -> Result<Json<StreamManifest>, AppError> {
    let manifest = state.manifests.build(&video_id, q.expires_in).await?;
    Ok(Json(manifest))
}

/// `POST /api/video/{id}/thumbnails` - store poster frames and attach the
/// first one (plus duration) to the media row referencing this upload.
pub async fn upload_thumbnails(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    Json(req): Json<ThumbnailBatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.thumbnails.is_empty() {
        return Err(AppError::bad_request("at least one thumbnail is required"));
    }

    let assets = req
        .thumbnails
        .into_iter()
        .enumerate()
        .map(|(index, input)| {
            let blob = general_purpose::STANDARD
                .decode(input.data.as_bytes())
                .map_err(|err| {
                    AppError::bad_request(format!("thumbnail {} is not valid base64: {}", index, err))
                })?;
            Ok(ThumbnailAsset {
                blob: Bytes::from(blob),
                timestamp: input.timestamp,
                is_vertical: input.is_vertical,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    let thumbnails = state
        .thumbnails
        .upload_thumbnails(&req.video_name, assets)
        .await?;

    let poster = thumbnails.first().map(|t| t.url.clone());
    let linked = state
        .thumbnails
        .link_to_media(&video_id, poster, req.duration)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ThumbnailBatchResponse {
            thumbnails,
            linked_media_id: linked.map(|m| m.id),
        }),
    ))
}
