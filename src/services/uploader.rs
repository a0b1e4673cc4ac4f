//! Chunk uploader and metadata recorder.
//!
//! A source is split into fixed-size chunks, each chunk is written to object
//! storage at `{base_path}/chunk_{index:05}`, and once every chunk is stored a
//! single descriptor is upserted with `status = complete`.

use crate::{
    models::{
        chunked_upload::{ChunkedUpload, UploadStatus},
        video::UploadedVideo,
    },
    services::{
        chunker::{ChunkPlan, chunk_file, split_into_chunks},
        media_error::{MediaError, MediaResult},
        metadata_store::MetadataStore,
        object_storage::{ObjectStorage, UploadOptions},
    },
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use std::{io, path::Path, sync::Arc};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct UploaderSettings {
    /// Bucket receiving every chunk.
    pub bucket: String,
    /// Default chunk size in bytes.
    pub chunk_size: usize,
    /// Largest chunk size a caller may ask for.
    pub max_chunk_size: usize,
    /// Maximum chunk uploads in flight for one source.
    pub concurrency: usize,
}

/// Provenance of the bytes being uploaded.
#[derive(Clone, Debug)]
pub struct UploadSource {
    pub filename: String,
    pub content_type: String,
    /// Size announced by the caller (e.g. `Content-Length`), if known.
    pub expected_size: Option<u64>,
    /// Overrides [`UploaderSettings::chunk_size`].
    pub chunk_size: Option<usize>,
}

/// Everything the recorder needs to describe a fully uploaded chunk set.
#[derive(Clone, Debug)]
pub struct RecordUpload {
    pub original_filename: String,
    pub file_size: u64,
    pub bucket: String,
    /// Prefix of every chunk path; its last segment becomes the video id.
    pub base_path: String,
    /// Chunk paths in chunk order, stored exactly as given.
    pub chunk_files: Vec<String>,
    pub total_chunks: u64,
    pub chunk_size: u64,
    pub content_type: String,
}

pub struct ChunkUploader {
    storage: Arc<dyn ObjectStorage>,
    store: Arc<dyn MetadataStore>,
    settings: UploaderSettings,
}

/// Storage path of chunk `index` under `base_path`.
pub fn chunk_path(base_path: &str, index: usize) -> String {
    format!("{}/chunk_{:05}", base_path.trim_end_matches('/'), index)
}

/// Last non-empty segment of `base_path`.
pub fn video_id_from_base_path(base_path: &str) -> Option<&str> {
    base_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

impl ChunkUploader {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        store: Arc<dyn MetadataStore>,
        settings: UploaderSettings,
    ) -> Self {
        Self {
            storage,
            store,
            settings,
        }
    }

    /// Chunk a local file and upload it.
    pub async fn upload_file(&self, path: &Path, content_type: &str) -> MediaResult<UploadedVideo> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (size, chunks) = chunk_file(path, self.settings.chunk_size)
            .await
            .map_err(MediaError::Read)?;

        let source = UploadSource {
            filename,
            content_type: content_type.to_string(),
            expected_size: Some(size),
            chunk_size: None,
        };
        self.upload_chunks(source, self.settings.chunk_size, chunks).await
    }

    /// Split `body` into chunks, upload them and record the descriptor.
    pub async fn upload_stream<S>(&self, source: UploadSource, body: S) -> MediaResult<UploadedVideo>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let chunk_size = source.chunk_size.unwrap_or(self.settings.chunk_size);
        if chunk_size == 0 {
            return Err(MediaError::InvalidRequest("chunk size must be positive".into()));
        }
        if chunk_size > self.settings.max_chunk_size {
            return Err(MediaError::InvalidRequest(format!(
                "chunk size {} exceeds the maximum of {} bytes",
                chunk_size, self.settings.max_chunk_size
            )));
        }
        let chunks = split_into_chunks(body, chunk_size);
        self.upload_chunks(source, chunk_size, chunks).await
    }

    async fn upload_chunks<S>(
        &self,
        source: UploadSource,
        chunk_size: usize,
        chunks: S,
    ) -> MediaResult<UploadedVideo>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        if source.filename.trim().is_empty() {
            return Err(MediaError::InvalidRequest("filename must not be empty".into()));
        }

        let video_id = Uuid::new_v4().to_string();
        let base_path = format!("videos/{}", video_id);
        let bucket = self.settings.bucket.clone();

        let expected = ChunkPlan::new(source.expected_size.unwrap_or(0), chunk_size as u64)
            .ok_or_else(|| MediaError::InvalidRequest("chunk size must be positive".into()))?;
        let pending = ChunkedUpload {
            id: video_id.clone(),
            original_filename: source.filename.clone(),
            file_size: expected.file_size() as i64,
            mime_type: source.content_type.clone(),
            total_chunks: expected.total_chunks() as i64,
            chunk_size: chunk_size as i64,
            chunk_files: Vec::new(),
            storage_bucket: bucket.clone(),
            base_path: base_path.clone(),
            status: UploadStatus::Uploading,
            created_at: Utc::now(),
        };
        self.store.upsert_chunked_upload(&pending).await?;
        info!(video_id = %video_id, filename = %source.filename, "chunked upload started");

        // `buffered` keeps results in chunk order while up to `concurrency`
        // uploads run at once.
        let outcomes: Vec<MediaResult<(String, u64)>> = chunks
            .enumerate()
            .map(|(index, chunk)| {
                let storage = Arc::clone(&self.storage);
                let bucket = bucket.clone();
                let path = chunk_path(&base_path, index);
                let options = UploadOptions::new(source.content_type.clone()).upsert(true);
                async move {
                    let data = chunk.map_err(MediaError::Read)?;
                    let len = data.len() as u64;
                    storage
                        .upload(&bucket, &path, data, options)
                        .await
                        .map_err(|err| {
                            error!(bucket = %bucket, path = %path, index, error = %err, "chunk upload failed");
                            MediaError::Storage(err)
                        })?;
                    Ok((path, len))
                }
            })
            .buffered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let attempted = outcomes.len() as u64;
        let mut chunk_files = Vec::with_capacity(outcomes.len());
        let mut failed = Vec::new();
        let mut read_error = None;
        let mut file_size = 0u64;
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok((path, len)) => {
                    file_size += len;
                    chunk_files.push(path);
                }
                Err(MediaError::Read(err)) => read_error = Some(err),
                Err(_) => failed.push(index),
            }
        }

        let failure = if let Some(err) = read_error {
            Some(MediaError::Read(err))
        } else if !failed.is_empty() {
            Some(MediaError::ChunksFailed {
                upload_id: video_id.clone(),
                failed,
            })
        } else if chunk_files.is_empty() {
            Some(MediaError::InvalidRequest("upload source is empty".into()))
        } else {
            None
        };

        if let Some(err) = failure {
            warn!(video_id = %video_id, error = %err, "chunked upload aborted");
            // Keep the chunks that did land so the upload can still be deleted.
            let errored = ChunkedUpload {
                file_size: pending.file_size.max(file_size as i64),
                total_chunks: pending.total_chunks.max(attempted as i64),
                chunk_files,
                status: UploadStatus::Error,
                ..pending
            };
            if let Err(status_err) = self.store.upsert_chunked_upload(&errored).await {
                error!(video_id = %video_id, error = %status_err, "failed to mark upload as errored");
            }
            return Err(err);
        }

        let total_chunks = chunk_files.len() as u64;
        self.record_upload(RecordUpload {
            original_filename: source.filename,
            file_size,
            bucket,
            base_path,
            chunk_files,
            total_chunks,
            chunk_size: chunk_size as u64,
            content_type: source.content_type,
        })
        .await
    }

    /// Write the descriptor for an already uploaded chunk set.
    ///
    /// Chunk existence is not re-checked. Calling this again for the same
    /// base path replaces the previous descriptor; two concurrent calls for
    /// one id race and the last write wins.
    pub async fn record_upload(&self, record: RecordUpload) -> MediaResult<UploadedVideo> {
        let video_id = video_id_from_base_path(&record.base_path)
            .ok_or_else(|| {
                MediaError::InvalidRequest(format!("base path `{}` has no id segment", record.base_path))
            })?
            .to_string();

        if record.chunk_files.len() as u64 != record.total_chunks {
            return Err(MediaError::InvalidRequest(format!(
                "{} chunk files given for {} chunks",
                record.chunk_files.len(),
                record.total_chunks
            )));
        }
        let planned = ChunkPlan::new(record.file_size, record.chunk_size)
            .map(|plan| plan.total_chunks())
            .ok_or_else(|| MediaError::InvalidRequest("chunk size must be positive".into()))?;
        if planned != record.total_chunks {
            return Err(MediaError::InvalidRequest(format!(
                "{} bytes in chunks of {} make {} chunks, not {}",
                record.file_size, record.chunk_size, planned, record.total_chunks
            )));
        }

        let descriptor = ChunkedUpload {
            id: video_id.clone(),
            original_filename: record.original_filename,
            file_size: record.file_size as i64,
            mime_type: record.content_type,
            total_chunks: record.total_chunks as i64,
            chunk_size: record.chunk_size as i64,
            chunk_files: record.chunk_files,
            storage_bucket: record.bucket,
            base_path: record.base_path,
            status: UploadStatus::Complete,
            created_at: Utc::now(),
        };

        if let Err(err) = self.store.upsert_chunked_upload(&descriptor).await {
            error!(video_id = %video_id, error = %err, "failed to record chunked upload");
            return Err(err.into());
        }

        info!(
            video_id = %video_id,
            total_chunks = descriptor.total_chunks,
            file_size = descriptor.file_size,
            "chunked upload complete"
        );
        Ok(UploadedVideo::new(video_id))
    }

    /// Remove every chunk of an upload, then its descriptor.
    ///
    /// An upload that never completed may have chunks missing from its
    /// list, so every path its chunk count allows for is removed as well.
    pub async fn delete_upload(&self, video_id: &str) -> MediaResult<()> {
        let upload = self
            .store
            .get_chunked_upload(video_id)
            .await?
            .ok_or_else(|| MediaError::NotFound(video_id.to_string()))?;

        let mut paths = upload.chunk_files.clone();
        if upload.status != UploadStatus::Complete {
            for index in 0..upload.total_chunks.max(0) as usize {
                let path = chunk_path(&upload.base_path, index);
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }

        if !paths.is_empty() {
            self.storage
                .remove(&upload.storage_bucket, &paths)
                .await
                .map_err(|err| {
                    error!(video_id, bucket = %upload.storage_bucket, error = %err, "failed to remove chunks");
                    err
                })?;
        }
        self.store.delete_chunked_upload(video_id).await?;
        info!(video_id, chunks = paths.len(), "chunked upload deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::{MemoryMetadataStore, MemoryStorage};
    use futures::stream;

    const MB: usize = 1024 * 1024;

    fn uploader(storage: Arc<MemoryStorage>, store: Arc<MemoryMetadataStore>) -> ChunkUploader {
        ChunkUploader::new(
            storage,
            store,
            UploaderSettings {
                bucket: "videos".into(),
                chunk_size: 10 * MB,
                max_chunk_size: 64 * MB,
                concurrency: 3,
            },
        )
    }

    fn body(data: Vec<u8>, piece: usize) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let pieces: Vec<io::Result<Bytes>> = data
            .chunks(piece)
            .map(|p| Ok(Bytes::copy_from_slice(p)))
            .collect();
        stream::iter(pieces)
    }

    fn source(size: usize, chunk_size: Option<usize>) -> UploadSource {
        UploadSource {
            filename: "showreel.mp4".into(),
            content_type: "video/mp4".into(),
            expected_size: Some(size as u64),
            chunk_size,
        }
    }

    #[test]
    fn derives_id_from_last_segment() {
        assert_eq!(video_id_from_base_path("videos/abc"), Some("abc"));
        assert_eq!(video_id_from_base_path("videos/abc/"), Some("abc"));
        assert_eq!(video_id_from_base_path("abc"), Some("abc"));
        assert_eq!(video_id_from_base_path(""), None);
        assert_eq!(chunk_path("videos/abc/", 7), "videos/abc/chunk_00007");
    }

    #[tokio::test]
    async fn uploads_25mb_as_three_chunks() {
        let storage = Arc::new(MemoryStorage::default());
        let store = Arc::new(MemoryMetadataStore::default());
        let uploader = uploader(storage.clone(), store.clone());

        let data: Vec<u8> = (0..25 * MB).map(|i| (i % 253) as u8).collect();
        let video = uploader
            .upload_stream(source(data.len(), None), body(data.clone(), 64 * 1024))
            .await
            .unwrap();

        assert_eq!(video.video_url, format!("/api/video/{}", video.video_id));
        let upload = store.upload(&video.video_id).unwrap();
        assert_eq!(upload.status, UploadStatus::Complete);
        assert_eq!(upload.total_chunks, 3);
        assert_eq!(upload.chunk_files.len(), 3);
        assert_eq!(upload.file_size, 25 * MB as i64);
        assert_eq!(upload.chunk_size, 10 * MB as i64);
        assert_eq!(upload.base_path, format!("videos/{}", video.video_id));

        let mut rebuilt = Vec::new();
        for path in &upload.chunk_files {
            rebuilt.extend_from_slice(&storage.object("videos", path).unwrap());
            let options = storage.options("videos", path).unwrap();
            assert!(options.upsert);
            assert_eq!(options.content_type, "video/mp4");
        }
        assert_eq!(rebuilt, data);

        let statuses: Vec<UploadStatus> =
            store.upserts.lock().unwrap().iter().map(|u| u.status).collect();
        assert_eq!(statuses, vec![UploadStatus::Uploading, UploadStatus::Complete]);
    }

    #[tokio::test]
    async fn recorder_keeps_chunk_order_verbatim() {
        let store = Arc::new(MemoryMetadataStore::default());
        let uploader = uploader(Arc::new(MemoryStorage::default()), store.clone());
        let files = vec![
            "videos/abc/chunk_00002".to_string(),
            "videos/abc/chunk_00000".to_string(),
            "videos/abc/chunk_00000".to_string(),
            "videos/abc/chunk_00001".to_string(),
        ];

        let video = uploader
            .record_upload(RecordUpload {
                original_filename: "reel.mov".into(),
                file_size: 35,
                bucket: "videos".into(),
                base_path: "videos/abc".into(),
                chunk_files: files.clone(),
                total_chunks: 4,
                chunk_size: 10,
                content_type: "video/quicktime".into(),
            })
            .await
            .unwrap();

        assert_eq!(video, UploadedVideo::new("abc"));
        let upload = store.upload("abc").unwrap();
        assert_eq!(upload.chunk_files, files);
        assert_eq!(upload.status, UploadStatus::Complete);
        assert_eq!(upload.mime_type, "video/quicktime");
    }

    #[tokio::test]
    async fn recorder_rejects_count_mismatch_and_surfaces_store_errors() {
        let store = Arc::new(MemoryMetadataStore::default());
        let uploader = uploader(Arc::new(MemoryStorage::default()), store.clone());
        let record = RecordUpload {
            original_filename: "reel.mp4".into(),
            file_size: 10,
            bucket: "videos".into(),
            base_path: "videos/abc".into(),
            chunk_files: vec!["videos/abc/chunk_00000".into()],
            total_chunks: 2,
            chunk_size: 10,
            content_type: "video/mp4".into(),
        };
        let err = uploader.record_upload(record.clone()).await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidRequest(_)));

        store.fail_upserts();
        let err = uploader
            .record_upload(RecordUpload { total_chunks: 1, ..record })
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Metadata(_)));
        assert!(store.upload("abc").is_none());
    }

    #[tokio::test]
    async fn failed_chunks_are_reported_and_upload_marked_error() {
        let storage = Arc::new(MemoryStorage::default());
        let store = Arc::new(MemoryMetadataStore::default());
        storage.fail_uploads_containing("chunk_00001");
        storage.fail_uploads_containing("chunk_00003");
        let uploader = uploader(storage.clone(), store.clone());

        let err = uploader
            .upload_stream(source(50, Some(10)), body(vec![7u8; 50], 8))
            .await
            .unwrap_err();

        let (upload_id, failed) = match err {
            MediaError::ChunksFailed { upload_id, failed } => (upload_id, failed),
            other => panic!("unexpected error: {other:?}"),
        };
        assert_eq!(failed, vec![1, 3]);
        let upload = store.upload(&upload_id).unwrap();
        assert_eq!(upload.status, UploadStatus::Error);
        assert_eq!(upload.total_chunks, 5);
        let landed: Vec<String> = [0, 2, 4]
            .iter()
            .map(|&i| chunk_path(&upload.base_path, i))
            .collect();
        assert_eq!(upload.chunk_files, landed);
        // every chunk was attempted even after the first failure
        assert_eq!(storage.upload_calls.load(std::sync::atomic::Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn deleting_a_failed_upload_removes_landed_chunks() {
        let storage = Arc::new(MemoryStorage::default());
        let store = Arc::new(MemoryMetadataStore::default());
        storage.fail_uploads_containing("chunk_00001");
        let uploader = uploader(storage.clone(), store.clone());

        // no announced size, so the uploading descriptor counts zero chunks
        let mut unsized_source = source(30, Some(10));
        unsized_source.expected_size = None;
        let upload_id = match uploader
            .upload_stream(unsized_source, body(vec![5u8; 30], 10))
            .await
            .unwrap_err()
        {
            MediaError::ChunksFailed { upload_id, failed } => {
                assert_eq!(failed, vec![1]);
                upload_id
            }
            other => panic!("unexpected error: {other:?}"),
        };
        assert_eq!(storage.paths("videos").len(), 2);

        uploader.delete_upload(&upload_id).await.unwrap();
        assert!(storage.paths("videos").is_empty());
        assert!(store.upload(&upload_id).is_none());
    }

    #[tokio::test]
    async fn deleting_an_unfinished_upload_removes_every_planned_chunk() {
        let storage = Arc::new(MemoryStorage::default());
        let store = Arc::new(MemoryMetadataStore::default());
        let uploader = uploader(storage.clone(), store.clone());

        for index in 0..2 {
            storage
                .upload(
                    "videos",
                    &chunk_path("videos/stalled", index),
                    Bytes::from_static(b"partial"),
                    UploadOptions::new("video/mp4"),
                )
                .await
                .unwrap();
        }
        store
            .upsert_chunked_upload(&ChunkedUpload {
                id: "stalled".into(),
                original_filename: "reel.mp4".into(),
                file_size: 30,
                mime_type: "video/mp4".into(),
                total_chunks: 3,
                chunk_size: 10,
                chunk_files: Vec::new(),
                storage_bucket: "videos".into(),
                base_path: "videos/stalled".into(),
                status: UploadStatus::Uploading,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        uploader.delete_upload("stalled").await.unwrap();
        assert!(storage.paths("videos").is_empty());
        assert_eq!(storage.removed().len(), 3);
    }

    #[tokio::test]
    async fn read_error_aborts_upload() {
        let store = Arc::new(MemoryMetadataStore::default());
        let uploader = uploader(Arc::new(MemoryStorage::default()), store.clone());
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"0123456789")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);

        let err = uploader.upload_stream(source(20, Some(4)), body).await.unwrap_err();
        assert!(matches!(err, MediaError::Read(_)));
        let upload = store.upserts.lock().unwrap()[0].clone();
        assert_eq!(store.upload(&upload.id).unwrap().status, UploadStatus::Error);
    }

    #[tokio::test]
    async fn rejects_empty_source_and_bad_parameters() {
        let store = Arc::new(MemoryMetadataStore::default());
        let uploader = uploader(Arc::new(MemoryStorage::default()), store.clone());

        let err = uploader
            .upload_stream(source(0, None), stream::iter(Vec::<io::Result<Bytes>>::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidRequest(_)));

        let err = uploader
            .upload_stream(source(10, Some(0)), body(vec![1; 10], 4))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidRequest(_)));

        let err = uploader
            .upload_stream(source(10, Some(usize::MAX)), body(vec![1; 10], 4))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidRequest(_)));

        let err = uploader
            .upload_stream(source(10, Some(64 * MB + 1)), body(vec![1; 10], 4))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::InvalidRequest(_)));

        let mut unnamed = source(10, None);
        unnamed.filename = "  ".into();
        let err = uploader.upload_stream(unnamed, body(vec![1; 10], 4)).await.unwrap_err();
        assert!(matches!(err, MediaError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn uploads_a_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("teaser.mp4");
        tokio::fs::write(&path, vec![3u8; 2500]).await.unwrap();

        let storage = Arc::new(MemoryStorage::default());
        let store = Arc::new(MemoryMetadataStore::default());
        let uploader = ChunkUploader::new(
            storage.clone(),
            store.clone(),
            UploaderSettings {
                bucket: "videos".into(),
                chunk_size: 1000,
                max_chunk_size: 64 * MB,
                concurrency: 2,
            },
        );

        let video = uploader.upload_file(&path, "video/mp4").await.unwrap();
        let upload = store.upload(&video.video_id).unwrap();
        assert_eq!(upload.original_filename, "teaser.mp4");
        assert_eq!(upload.total_chunks, 3);
        assert_eq!(storage.paths("videos"), upload.chunk_files);
    }

    #[tokio::test]
    async fn delete_removes_chunks_and_descriptor() {
        let storage = Arc::new(MemoryStorage::default());
        let store = Arc::new(MemoryMetadataStore::default());
        let uploader = uploader(storage.clone(), store.clone());

        let video = uploader
            .upload_stream(source(30, Some(10)), body(vec![9; 30], 7))
            .await
            .unwrap();
        let files = store.upload(&video.video_id).unwrap().chunk_files;

        uploader.delete_upload(&video.video_id).await.unwrap();
        assert!(storage.paths("videos").is_empty());
        assert_eq!(storage.removed(), files);
        assert!(store.upload(&video.video_id).is_none());

        let err = uploader.delete_upload(&video.video_id).await.unwrap_err();
        assert!(matches!(err, MediaError::NotFound(_)));
    }
}
