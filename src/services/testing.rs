//! In-memory fakes for the storage and metadata capabilities, with failure
//! injection and call counters.

use crate::{
    models::{
        chunked_upload::ChunkedUpload,
        media::{MediaPatch, MediaRecord},
    },
    services::{
        metadata_store::{MetadataError, MetadataResult, MetadataStore},
        object_storage::{ObjectStorage, StorageError, StorageResult, UploadOptions},
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{HashMap, HashSet},
    io,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<(String, String), (Bytes, UploadOptions)>>,
    failing_uploads: Mutex<Vec<String>>,
    failing_signs: Mutex<HashSet<String>>,
    removed: Mutex<Vec<String>>,
    pub upload_calls: AtomicUsize,
    pub sign_calls: AtomicUsize,
}

impl MemoryStorage {
    /// Every upload whose path contains `needle` fails.
    pub fn fail_uploads_containing(&self, needle: &str) {
        self.failing_uploads.lock().unwrap().push(needle.to_string());
    }

    /// Signing `path` fails.
    pub fn fail_signing(&self, path: &str) {
        self.failing_signs.lock().unwrap().insert(path.to_string());
    }

    pub fn object(&self, bucket: &str, path: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), path.to_string()))
            .map(|(data, _)| data.clone())
    }

    pub fn options(&self, bucket: &str, path: &str) -> Option<UploadOptions> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), path.to_string()))
            .map(|(_, options)| options.clone())
    }

    /// Sorted paths currently stored in `bucket`.
    pub fn paths(&self, bucket: &str) -> Vec<String> {
        let mut paths: Vec<String> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, p)| p.clone())
            .collect();
        paths.sort();
        paths
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        options: UploadOptions,
    ) -> StorageResult<()> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let fails = self
            .failing_uploads
            .lock()
            .unwrap()
            .iter()
            .any(|needle| path.contains(needle.as_str()));
        if fails {
            return Err(StorageError::Io(io::Error::other(format!(
                "injected upload failure for {}",
                path
            ))));
        }

        let key = (bucket.to_string(), path.to_string());
        let mut objects = self.objects.lock().unwrap();
        if !options.upsert && objects.contains_key(&key) {
            return Err(StorageError::ObjectAlreadyExists {
                bucket: bucket.to_string(),
                key: path.to_string(),
            });
        }
        objects.insert(key, (data, options));
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://public/{}/{}", bucket, path)
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expiry_secs: u64,
    ) -> StorageResult<String> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        let missing = !self
            .objects
            .lock()
            .unwrap()
            .contains_key(&(bucket.to_string(), path.to_string()));
        if missing || self.failing_signs.lock().unwrap().contains(path) {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: path.to_string(),
            });
        }
        Ok(format!(
            "memory://signed/{}/{}?expires={}",
            bucket, path, expiry_secs
        ))
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> StorageResult<()> {
        let mut objects = self.objects.lock().unwrap();
        let mut removed = self.removed.lock().unwrap();
        for path in paths {
            objects.remove(&(bucket.to_string(), path.clone()));
            removed.push(path.clone());
        }
        Ok(())
    }

    async fn ping(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    uploads: Mutex<HashMap<String, ChunkedUpload>>,
    media: Mutex<Vec<MediaRecord>>,
    fail_upserts: AtomicBool,
    pub upserts: Mutex<Vec<ChunkedUpload>>,
}

impl MemoryMetadataStore {
    pub fn fail_upserts(&self) {
        self.fail_upserts.store(true, Ordering::SeqCst);
    }

    pub fn insert_media(&self, record: MediaRecord) {
        self.media.lock().unwrap().push(record);
    }

    pub fn media(&self, id: &str) -> Option<MediaRecord> {
        self.media.lock().unwrap().iter().find(|m| m.id == id).cloned()
    }

    pub fn upload(&self, id: &str) -> Option<ChunkedUpload> {
        self.uploads.lock().unwrap().get(id).cloned()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn upsert_chunked_upload(&self, upload: &ChunkedUpload) -> MetadataResult<()> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(MetadataError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        self.upserts.lock().unwrap().push(upload.clone());
        self.uploads
            .lock()
            .unwrap()
            .insert(upload.id.clone(), upload.clone());
        Ok(())
    }

    async fn get_chunked_upload(&self, id: &str) -> MetadataResult<Option<ChunkedUpload>> {
        Ok(self.upload(id))
    }

    async fn delete_chunked_upload(&self, id: &str) -> MetadataResult<bool> {
        Ok(self.uploads.lock().unwrap().remove(id).is_some())
    }

    async fn find_media_by_upload_id(&self, upload_id: &str) -> MetadataResult<Option<MediaRecord>> {
        Ok(self
            .media
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.metadata.chunked_upload_id.as_deref() == Some(upload_id))
            .cloned())
    }

    async fn update_media(&self, media_id: &str, patch: &MediaPatch) -> MetadataResult<Option<MediaRecord>> {
        let mut media = self.media.lock().unwrap();
        let Some(record) = media.iter_mut().find(|m| m.id == media_id) else {
            return Ok(None);
        };
        if let Some(url) = &patch.thumbnail_url {
            record.thumbnail_url = Some(url.clone());
        }
        if let Some(duration) = patch.duration {
            record.duration = Some(duration);
        }
        Ok(Some(record.clone()))
    }

    async fn ping(&self) -> MetadataResult<()> {
        Ok(())
    }
}
