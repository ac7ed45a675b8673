use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Daemon configuration.
///
/// Built from defaults, then an optional TOML file, then `GUESTLENS_*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub host: String,
    pub port: u16,
    /// Root for uploaded files; event photos and guest selfies live below it.
    pub data_dir: PathBuf,
    /// Face encoding cache file.
    pub cache_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD model file name inside `model_dir`.
    pub detector_model: String,
    /// ArcFace model file name inside `model_dir`.
    pub recognizer_model: String,
    /// Maximum face distance (`1 - cosine similarity`) that may count as a match.
    pub tolerance: f32,
    /// Minimum confidence (`1 - distance`) for a match to be accepted.
    pub min_confidence: f32,
    /// Minimum SCRFD score for a detection.
    pub detection_threshold: f32,
    /// Images are reduced so their longest side is at most this many pixels.
    pub max_image_side: u32,
    /// Request body limit for uploads.
    pub max_upload_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            data_dir: PathBuf::from("static/uploads"),
            cache_path: PathBuf::from("face_encodings_cache.json"),
            model_dir: guestlens_core::default_model_dir(),
            detector_model: "det_10g.onnx".to_string(),
            recognizer_model: "w600k_r50.onnx".to_string(),
            tolerance: 0.60,
            min_confidence: 0.40,
            detection_threshold: guestlens_core::detector::SCRFD_DEFAULT_CONFIDENCE,
            max_image_side: guestlens_core::imaging::DEFAULT_MAX_SIDE,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then `path` if it exists, then environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse { path: display, source })
    }

    /// Override fields from `GUESTLENS_*` environment variables.
    pub fn apply_env(&mut self) {
        self.host = env_or("GUESTLENS_HOST", std::mem::take(&mut self.host));
        self.port = env_parse("GUESTLENS_PORT", self.port);
        self.data_dir = env_or("GUESTLENS_DATA_DIR", self.data_dir.clone());
        self.cache_path = env_or("GUESTLENS_CACHE_PATH", self.cache_path.clone());
        self.model_dir = env_or("GUESTLENS_MODEL_DIR", self.model_dir.clone());
        self.detector_model = env_or("GUESTLENS_DETECTOR_MODEL", std::mem::take(&mut self.detector_model));
        self.recognizer_model = env_or("GUESTLENS_RECOGNIZER_MODEL", std::mem::take(&mut self.recognizer_model));
        self.tolerance = env_parse("GUESTLENS_TOLERANCE", self.tolerance);
        self.min_confidence = env_parse("GUESTLENS_MIN_CONFIDENCE", self.min_confidence);
        self.detection_threshold = env_parse("GUESTLENS_DETECTION_THRESHOLD", self.detection_threshold);
        self.max_image_side = env_parse("GUESTLENS_MAX_IMAGE_SIDE", self.max_image_side);
        self.max_upload_bytes = env_parse("GUESTLENS_MAX_UPLOAD_BYTES", self.max_upload_bytes);
    }

    /// Directory holding the photographer's event photos.
    pub fn photos_dir(&self) -> PathBuf {
        self.data_dir.join("wedding_photos")
    }

    /// Directory for temporary guest selfies.
    pub fn guest_dir(&self) -> PathBuf {
        self.data_dir.join("guest_photos")
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.recognizer_model)
    }
}

fn env_or<T: From<String>>(key: &str, default: T) -> T {
    std::env::var(key).map(T::from).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "invalid value in environment, keeping default");
            default
        }),
        Err(_) => default,
    }
}
