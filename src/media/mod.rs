//! Media handling for uploads
//!
//! This module provides:
//! - Classification of uploads by extension and content type
//! - Magic-byte validation of declared kinds
//! - The blob store collaborator that persists accepted payloads

pub mod blob;
pub mod kind;

pub use blob::{BlobStore, FsBlobStore, StoredBlob};
pub use kind::{
    classify_content_type, classify_filename, content_type_for_filename, sniff, validate_upload,
};
