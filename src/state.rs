//! Shared state handed to every handler.

use crate::services::{
    disk_storage::DiskObjectStorage,
    manifest::ManifestBuilder,
    metadata_store::MetadataStore,
    object_storage::ObjectStorage,
    thumbnails::ThumbnailPipeline,
    uploader::{ChunkUploader, UploaderSettings},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub uploader: Arc<ChunkUploader>,
    pub manifests: Arc<ManifestBuilder>,
    pub thumbnails: Arc<ThumbnailPipeline>,
    pub storage: Arc<dyn ObjectStorage>,
    pub store: Arc<dyn MetadataStore>,
    /// Backend serving `/storage/v1/object/*`, when this process owns one.
    pub disk: Option<Arc<DiskObjectStorage>>,
}

impl AppState {
    /// Wire the services around one storage and one metadata capability.
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        store: Arc<dyn MetadataStore>,
        uploader_settings: UploaderSettings,
        media_bucket: &str,
        signed_url_expiry: u64,
    ) -> Self {
        Self {
            uploader: Arc::new(ChunkUploader::new(
                storage.clone(),
                store.clone(),
                uploader_settings,
            )),
            manifests: Arc::new(
                ManifestBuilder::new(storage.clone(), store.clone())
                    .with_default_expiry(signed_url_expiry),
            ),
            thumbnails: Arc::new(ThumbnailPipeline::new(
                storage.clone(),
                store.clone(),
                media_bucket,
            )),
            storage,
            store,
            disk: None,
        }
    }

    pub fn with_disk(mut self, disk: Arc<DiskObjectStorage>) -> Self {
        self.disk = Some(disk);
        self
    }
}
