pub mod chunker;
pub mod disk_storage;
pub mod manifest;
pub mod media_error;
pub mod metadata_store;
pub mod object_storage;
#[cfg(test)]
pub mod testing;
pub mod thumbnails;
pub mod uploader;
pub mod url_signer;
