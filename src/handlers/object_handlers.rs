//! Serves stored objects through their public or signed URLs.
//! Bodies are streamed from disk rather than buffered.

use crate::{
    errors::AppError, models::object::StoredObject, services::disk_storage::DiskObjectStorage,
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub exp: i64,
    pub sig: String,
}

fn disk(state: &AppState) -> Result<&Arc<DiskObjectStorage>, AppError> {
    state
        .disk
        .as_ref()
        .ok_or_else(|| AppError::not_found("object serving is not enabled"))
}

/// `GET /storage/v1/object/public/{bucket}/{*key}`
pub async fn get_public_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let (meta, file) = disk(&state)?.open_public(&bucket, &key).await?;
    Ok(object_response(&meta, file))
}

/// `GET /storage/v1/object/sign/{bucket}/{*key}?exp=&sig=`
pub async fn get_signed_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<SignedQuery>,
) -> Result<Response, AppError> {
    let (meta, file) = disk(&state)?
        .open_signed(&bucket, &key, q.exp, &q.sig)
        .await?;
    Ok(object_response(&meta, file))
}

fn object_response(meta: &StoredObject, file: File) -> Response {
    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), meta);
    response
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    let content_type = meta
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes.max(0)));

    if let Some(max_age) = meta.cache_control.as_deref() {
        if let Ok(value) = HeaderValue::from_str(&format!("max-age={}", max_age)) {
            headers.insert(header::CACHE_CONTROL, value);
        }
    }

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
