//! guestlens-core: face detection and recognition engine.
//!
//! Uses SCRFD for face detection and ArcFace for face recognition,
//! both running via ONNX Runtime for CPU inference.

pub mod alignment;
pub mod detector;
pub mod imaging;
pub mod pipeline;
pub mod recognizer;
pub mod types;

pub use detector::FaceDetector;
pub use pipeline::{FacePipeline, OnnxPipeline, PipelineError};
pub use recognizer::FaceRecognizer;
pub use types::{best_match, face_distance, BoundingBox, Embedding, FaceLocation, MatchCriteria, MatchOutcome};

/// Default directory holding the ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("models")
}
