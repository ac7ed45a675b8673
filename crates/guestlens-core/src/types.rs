use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Coordinates are in pixels of the image the detector was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Integer `top/right/bottom/left` box clamped to the image bounds.
    pub fn location(&self, image_width: u32, image_height: u32) -> FaceLocation {
        let clamp_x = |v: f32| v.round().clamp(0.0, image_width as f32) as u32;
        let clamp_y = |v: f32| v.round().clamp(0.0, image_height as f32) as u32;
        FaceLocation {
            top: clamp_y(self.y),
            right: clamp_x(self.x + self.width),
            bottom: clamp_y(self.y + self.height),
            left: clamp_x(self.x),
        }
    }
}

/// Face rectangle in `top, right, bottom, left` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceLocation {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance in [0, 2]: `1 - similarity`. Lower = more similar.
    pub fn distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Face distance between a probe and a candidate encoding.
pub fn face_distance(probe: &Embedding, candidate: &Embedding) -> f32 {
    probe.distance(candidate)
}

/// Confidence derived from a face distance.
pub fn confidence(distance: f32) -> f32 {
    1.0 - distance
}

/// Acceptance thresholds for a match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchCriteria {
    /// Maximum face distance that may count as the same person.
    pub tolerance: f32,
    /// Minimum confidence (`1 - distance`) required on top of the tolerance.
    pub min_confidence: f32,
}

/// Outcome of comparing one probe against every face found in a photo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOutcome {
    /// Best accepted face in the photo.
    Matched { confidence: f32, distance: f32 },
    /// A face was within tolerance but none reached the minimum confidence.
    LowConfidence { confidence: f32 },
    NoMatch,
}

/// Compare a probe against every candidate and keep the most confident accepted face.
///
/// All candidates are visited; ties keep the earliest face.
pub fn best_match(probe: &Embedding, candidates: &[Embedding], criteria: MatchCriteria) -> MatchOutcome {
    let mut best: Option<(f32, f32)> = None;
    let mut low_confidence: Option<f32> = None;

    for candidate in candidates {
        let distance = face_distance(probe, candidate);
        if distance > criteria.tolerance {
            continue;
        }
        let conf = confidence(distance);
        if conf < criteria.min_confidence {
            low_confidence.get_or_insert(conf);
            continue;
        }
        let better = match best {
            None => true,
            Some((best_conf, _)) => conf > best_conf,
        };
        if better {
            best = Some((conf, distance));
        }
    }

    match (best, low_confidence) {
        (Some((confidence, distance)), _) => MatchOutcome::Matched { confidence, distance },
        (None, Some(confidence)) => MatchOutcome::LowConfidence { confidence },
        (None, None) => MatchOutcome::NoMatch,
    }
}
