//! Persistent cache of face encodings, keyed by photo filename.
//!
//! Entries remember the photo's modification time and length so a replaced
//! photo is re-encoded, and the model version so a model swap invalidates
//! everything computed by the old one.

use guestlens_core::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;

const CACHE_FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing cache: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Identity of a photo file's contents at the time it was encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    /// Modification time in milliseconds since the Unix epoch.
    pub modified_ms: u64,
    pub len: u64,
}

impl FileStamp {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self { modified_ms, len: meta.len() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub stamp: FileStamp,
    pub model_version: String,
    pub face_count: usize,
    pub encodings: Vec<Embedding>,
}

impl CacheEntry {
    fn is_fresh(&self, stamp: FileStamp, model_version: &str) -> bool {
        self.stamp.modified_ms >= stamp.modified_ms
            && self.stamp.len == stamp.len
            && self.model_version == model_version
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: BTreeMap<String, CacheEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub cached_images: usize,
    pub total_encodings: usize,
    pub cache_file_exists: bool,
}

/// In-memory view of the cache file.
#[derive(Debug)]
pub struct EncodingCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
    dirty: bool,
}

impl EncodingCache {
    /// Load the cache from `path`.
    ///
    /// A missing file gives an empty cache. An unreadable or corrupt file is
    /// logged and also gives an empty cache; it is overwritten on next save.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read(&path) {
            Ok(raw) => match serde_json::from_slice::<CacheFile>(&raw) {
                Ok(file) if file.version == CACHE_FORMAT_VERSION => file.entries,
                Ok(file) => {
                    tracing::warn!(path = %path.display(), version = file.version, "unsupported cache version, starting empty");
                    BTreeMap::new()
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt cache file, starting empty");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read cache file, starting empty");
                BTreeMap::new()
            }
        };
        tracing::info!(path = %path.display(), cached = entries.len(), "loaded encoding cache");
        Self { path, entries, dirty: false }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached encodings for `name`, if still valid for the file and model.
    pub fn lookup(&self, name: &str, stamp: FileStamp, model_version: &str) -> Option<&[Embedding]> {
        self.entries
            .get(name)
            .filter(|entry| entry.is_fresh(stamp, model_version))
            .map(|entry| entry.encodings.as_slice())
    }

    pub fn insert(&mut self, name: &str, stamp: FileStamp, model_version: &str, encodings: Vec<Embedding>) {
        self.entries.insert(
            name.to_string(),
            CacheEntry {
                stamp,
                model_version: model_version.to_string(),
                face_count: encodings.len(),
                encodings,
            },
        );
        self.dirty = true;
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        self.dirty |= removed;
        removed
    }

    /// Drop entries for photos not in `existing`. Returns how many were dropped.
    pub fn retain_existing(&mut self, existing: &HashSet<String>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|name, _| existing.contains(name));
        let pruned = before - self.entries.len();
        if pruned > 0 {
            tracing::info!(pruned, "pruned cache entries for deleted photos");
            self.dirty = true;
        }
        pruned
    }

    /// Empty the cache and delete the cache file.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        self.dirty = false;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(CacheError::Io { path: self.path.display().to_string(), source });
            }
        }
        tracing::info!("face encodings cache cleared");
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            cached_images: self.entries.len(),
            total_encodings: self.entries.values().map(|e| e.face_count).sum(),
            cache_file_exists: self.path.exists(),
        }
    }

    /// Serialized snapshot if there are unsaved changes. Clears the dirty flag.
    pub fn take_snapshot(&mut self) -> Result<Option<Vec<u8>>, CacheError> {
        if !self.dirty {
            return Ok(None);
        }
        let file = CacheFile { version: CACHE_FORMAT_VERSION, entries: self.entries.clone() };
        let bytes = serde_json::to_vec(&file)?;
        self.dirty = false;
        Ok(Some(bytes))
    }

    /// Flag the in-memory state as unsaved, e.g. after a failed write.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

/// Replace `path` with `bytes` via a temporary sibling and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io { path: path.display().to_string(), source };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}
