//! Core data models.
//!
//! Storage catalogue rows (`bucket`, `object`), the chunked upload descriptor,
//! the media rows it links to, and the values returned to callers.

pub mod bucket;
pub mod chunked_upload;
pub mod media;
pub mod object;
pub mod video;
