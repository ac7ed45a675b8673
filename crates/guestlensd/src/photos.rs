//! File-system storage for event photos and temporary guest selfies.

use chrono::Local;
use guestlens_core::imaging;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("invalid filename: {0:?}")]
    InvalidName(String),
    #[error("file type not allowed: {0}")]
    NotAllowed(String),
    #[error("not a PNG, JPEG or GIF image: {0}")]
    NotAnImage(String),
    #[error("photo not found: {0}")]
    NotFound(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// URL prefix under which stored photos are served.
pub const PHOTO_URL_PREFIX: &str = "/static/uploads/wedding_photos";

/// Public URL of a stored photo.
pub fn photo_url(name: &str) -> String {
    format!("{PHOTO_URL_PREFIX}/{name}")
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PhotoError + '_ {
    move |source| PhotoError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Reduce a client-supplied filename to a safe single path component.
///
/// Directory parts are dropped, whitespace becomes `_`, anything other than
/// ASCII alphanumerics, `.`, `-` and `_` is removed, and leading dots are
/// stripped. `None` when nothing usable remains.
pub fn secure_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_whitespace() => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches(['.', '_']).to_string();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Split a filename into stem and extension (with the dot).
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Event photos in one directory, temporary selfies in another.
#[derive(Debug, Clone)]
pub struct PhotoStore {
    photos_dir: PathBuf,
    guest_dir: PathBuf,
}

impl PhotoStore {
    /// Open the store, creating both directories if needed.
    pub fn open(photos_dir: PathBuf, guest_dir: PathBuf) -> Result<Self, PhotoError> {
        for dir in [&photos_dir, &guest_dir] {
            std::fs::create_dir_all(dir).map_err(io_error(dir))?;
        }
        Ok(Self { photos_dir, guest_dir })
    }

    pub fn photos_dir(&self) -> &Path {
        &self.photos_dir
    }

    /// Validate an upload and store it under a timestamped name.
    ///
    /// Returns the stored filename.
    pub async fn save_upload(&self, original: &str, bytes: &[u8]) -> Result<String, PhotoError> {
        let name = validate_upload(original, bytes)?;
        let (stem, ext) = split_extension(&name);
        let stamp = Local::now().format("%Y%m%d_%H%M%S");

        let mut candidate = format!("{stem}_{stamp}{ext}");
        let mut n = 1;
        loop {
            let path = self.photos_dir.join(&candidate);
            match tokio::fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
                Ok(mut file) => {
                    use tokio::io::AsyncWriteExt;
                    file.write_all(bytes).await.map_err(io_error(&path))?;
                    file.flush().await.map_err(io_error(&path))?;
                    tracing::info!(file = %candidate, bytes = bytes.len(), "stored photo");
                    return Ok(candidate);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    candidate = format!("{stem}_{stamp}_{n}{ext}");
                    n += 1;
                }
                Err(e) => return Err(io_error(&path)(e)),
            }
        }
    }

    /// Filenames of all stored photos with an allowed extension, sorted.
    pub async fn list(&self) -> Result<Vec<String>, PhotoError> {
        let dir = &self.photos_dir;
        let mut entries = tokio::fs::read_dir(dir).await.map_err(io_error(dir))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(dir))? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if is_file && imaging::is_allowed_extension(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn count(&self) -> Result<usize, PhotoError> {
        Ok(self.list().await?.len())
    }

    /// Resolve a stored photo by name.
    ///
    /// Any name `list` can return is accepted as is; only names that would
    /// leave the photo directory (separators, `.`, `..`, roots) are rejected.
    pub fn path_of(&self, name: &str) -> Result<PathBuf, PhotoError> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) if !name.contains(['/', '\\']) => {
                Ok(self.photos_dir.join(part))
            }
            _ => Err(PhotoError::InvalidName(name.to_string())),
        }
    }

    /// Resolve a stored photo and require it to exist.
    pub async fn existing(&self, name: &str) -> Result<PathBuf, PhotoError> {
        let path = self.path_of(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(PhotoError::NotFound(name.to_string())),
        }
    }

    pub async fn remove(&self, name: &str) -> Result<(), PhotoError> {
        let path = self.path_of(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(file = name, "removed photo");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(PhotoError::NotFound(name.to_string())),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    /// Write a guest selfie to a temporary file that is deleted on drop.
    pub async fn save_guest(&self, original: &str, bytes: &[u8]) -> Result<GuestPhoto, PhotoError> {
        let name = validate_upload(original, bytes)?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = self
            .guest_dir
            .join(format!("temp_{stamp}_{}_{name}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&path, bytes).await.map_err(io_error(&path))?;
        Ok(GuestPhoto { path })
    }
}

fn validate_upload(original: &str, bytes: &[u8]) -> Result<String, PhotoError> {
    let name = secure_filename(original).ok_or_else(|| PhotoError::InvalidName(original.to_string()))?;
    if !imaging::is_allowed_extension(&name) {
        return Err(PhotoError::NotAllowed(name));
    }
    if imaging::sniff_format(bytes).is_none() {
        return Err(PhotoError::NotAnImage(name));
    }
    Ok(name)
}

/// A selfie on disk for the duration of one request.
#[derive(Debug)]
pub struct GuestPhoto {
    path: PathBuf,
}

impl GuestPhoto {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for GuestPhoto {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to delete guest photo");
            }
        }
    }
}
