//! Blob store
//!
//! Persists accepted uploads, one directory per [`EventKind`], deduplicated
//! by content hash. The broadcast path does not depend on it; the server only
//! calls it so that every broadcast payload also exists on disk.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;

use crate::error::Result;
use crate::protocol::EventKind;

use super::kind::extension_for;

/// Outcome of storing one payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Stable name under the kind's directory
    pub filename: String,
    /// Hex content hash
    pub content_hash: String,
    /// False when identical content was already stored
    pub is_new: bool,
}

/// Storage collaborator for accepted uploads
pub trait BlobStore: Send + Sync {
    /// Store `data`, returning the stable filename
    ///
    /// `original_name` is used as a suffix when present; otherwise the name is
    /// derived from the content type.
    fn put(
        &self,
        data: &[u8],
        kind: EventKind,
        content_type: &str,
        original_name: Option<&str>,
    ) -> Result<StoredBlob>;

    /// Fetch a stored payload, `None` if unknown
    fn get(&self, kind: EventKind, filename: &str) -> Result<Option<Bytes>>;
}

/// Filesystem blob store
///
/// Layout: `<root>/images`, `<root>/videos`, `<root>/audios`.
pub struct FsBlobStore {
    root: PathBuf,
    seen: Mutex<HashSet<String>>,
}

impl FsBlobStore {
    /// Open (and create) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for kind in EventKind::ALL {
            fs::create_dir_all(root.join(Self::folder(kind)))?;
        }

        Ok(Self {
            root,
            seen: Mutex::new(HashSet::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder(kind: EventKind) -> &'static str {
        match kind {
            EventKind::Image => "images",
            EventKind::Video => "videos",
            EventKind::Audio => "audios",
        }
    }

    fn path_for(&self, kind: EventKind, filename: &str) -> Option<PathBuf> {
        // Reject anything that is not a bare file name
        let name = Path::new(filename).file_name()?.to_str()?;
        if name != filename {
            return None;
        }
        Some(self.root.join(Self::folder(kind)).join(name))
    }
}

fn blob_name(hash: &str, content_type: &str, original_name: Option<&str>) -> String {
    let original = original_name
        .and_then(|n| Path::new(n).file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty());

    match original {
        Some(name) => format!("{}_{}", hash, name),
        None => format!("{}.{}", hash, extension_for(content_type)),
    }
}

impl BlobStore for FsBlobStore {
    fn put(
        &self,
        data: &[u8],
        kind: EventKind,
        content_type: &str,
        original_name: Option<&str>,
    ) -> Result<StoredBlob> {
        let hash = hex::encode(blake3::hash(data).as_bytes());
        let filename = blob_name(&hash, content_type, original_name);
        let path = self.root.join(Self::folder(kind)).join(&filename);

        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let is_new = !seen.contains(&hash) || !path.exists();
        if is_new {
            fs::write(&path, data)?;
            seen.insert(hash.clone());
        }

        tracing::debug!(
            kind = %kind,
            filename = %filename,
            size = data.len(),
            is_new = is_new,
            "Blob stored"
        );

        Ok(StoredBlob {
            filename,
            content_hash: hash,
            is_new,
        })
    }

    fn get(&self, kind: EventKind, filename: &str) -> Result<Option<Bytes>> {
        let Some(path) = self.path_for(kind, filename) else {
            return Ok(None);
        };

        match fs::read(&path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
