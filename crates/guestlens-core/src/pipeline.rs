//! Detection + recognition behind a single seam.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("{0}")]
    Other(String),
}

/// Turns an upright RGB image into face locations and encodings.
///
/// Implementations own their inference sessions and need exclusive access.
pub trait FacePipeline {
    /// Faces in the image, most confident first.
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, PipelineError>;

    /// One embedding per face, in the order given.
    fn encode(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, PipelineError>;

    /// Version tag stored alongside embeddings so stale ones can be recognised.
    fn model_version(&self) -> &str;
}

/// SCRFD detection followed by ArcFace recognition.
pub struct OnnxPipeline {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxPipeline {
    pub fn load(
        detector_path: &Path,
        recognizer_path: &Path,
        detection_threshold: f32,
    ) -> Result<Self, PipelineError> {
        let detector = FaceDetector::load(detector_path)?.with_confidence_threshold(detection_threshold);
        let recognizer = FaceRecognizer::load(recognizer_path)?;
        Ok(Self { detector, recognizer })
    }
}

impl FacePipeline for OnnxPipeline {
    fn locate(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, PipelineError> {
        Ok(self.detector.detect(image)?)
    }

    fn encode(&mut self, image: &RgbImage, faces: &[BoundingBox]) -> Result<Vec<Embedding>, PipelineError> {
        faces
            .iter()
            .map(|face| self.recognizer.extract(image, face).map_err(PipelineError::from))
            .collect()
    }

    fn model_version(&self) -> &str {
        self.recognizer.model_version()
    }
}
