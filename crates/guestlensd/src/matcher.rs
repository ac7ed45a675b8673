//! Face matching over the event photo collection.
//!
//! Encodings come from the cache when the photo is unchanged and from the
//! engine otherwise. A guest's first detected face is compared against every
//! face of every photo.

use crate::cache::{write_atomic, CacheError, CacheStats, EncodingCache, FileStamp};
use crate::engine::{EngineError, EngineHandle};
use crate::photos::{photo_url, GuestPhoto, PhotoError, PhotoStore};
use guestlens_core::{best_match, Embedding, FaceLocation, MatchCriteria, MatchOutcome};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("No face detected in the guest photo. Please upload a clear photo with a visible face.")]
    NoFaceInSelfie,
    #[error(transparent)]
    Photo(#[from] PhotoError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Serialize)]
pub struct PhotoMatch {
    pub filename: String,
    pub path: String,
    pub confidence: f32,
    pub face_distance: f32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MatchStats {
    pub total_photos_processed: usize,
    pub total_faces_found: usize,
    pub rejected_low_confidence: usize,
    pub errors: usize,
    pub average_confidence: f32,
    pub tolerance_used: f32,
    pub min_confidence_used: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    pub matches: Vec<PhotoMatch>,
    pub total_matches: usize,
    pub stats: MatchStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub total_files: usize,
    pub processed: usize,
    pub errors: usize,
    pub total_faces_found: usize,
    pub cache_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceInfo {
    pub face_id: usize,
    pub location: FaceLocation,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct FaceDebug {
    pub filename: String,
    pub faces_detected: usize,
    pub faces_info: Vec<FaceInfo>,
    pub encodings_count: usize,
}

/// Matching service shared by all request handlers.
pub struct FaceMatcher {
    photos: PhotoStore,
    engine: EngineHandle,
    cache: Arc<Mutex<EncodingCache>>,
    /// Serialises writes of the cache file.
    save_lock: tokio::sync::Mutex<()>,
    criteria: MatchCriteria,
}

impl FaceMatcher {
    pub fn new(photos: PhotoStore, engine: EngineHandle, cache: EncodingCache, criteria: MatchCriteria) -> Self {
        tracing::info!(
            tolerance = criteria.tolerance,
            min_confidence = criteria.min_confidence,
            model = engine.model_version(),
            "face matcher ready"
        );
        Self {
            photos,
            engine,
            cache: Arc::new(Mutex::new(cache)),
            save_lock: tokio::sync::Mutex::new(()),
            criteria,
        }
    }

    pub fn photos(&self) -> &PhotoStore {
        &self.photos
    }

    fn lock_cache(&self) -> MutexGuard<'_, EncodingCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encodings of a stored photo, computing and caching them on a miss.
    pub async fn encodings_for(&self, name: &str) -> Result<Vec<Embedding>, MatchError> {
        let path = self.photos.existing(name).await?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|_| PhotoError::NotFound(name.to_string()))?;
        let stamp = FileStamp::from_metadata(&meta);
        let model = self.engine.model_version();

        let cached = self.lock_cache().lookup(name, stamp, model).map(<[Embedding]>::to_vec);
        if let Some(hit) = cached {
            return Ok(hit);
        }

        let encodings = self.engine.encode(path).await?;
        self.lock_cache().insert(name, stamp, model, encodings.clone());
        Ok(encodings)
    }

    /// Find every stored photo containing the face in the guest's selfie.
    pub async fn find_matching_photos(&self, guest: &GuestPhoto) -> Result<MatchReport, MatchError> {
        let guest_encodings = self.engine.encode(guest.path().to_path_buf()).await?;
        let Some(probe) = guest_encodings.first() else {
            return Err(MatchError::NoFaceInSelfie);
        };

        let names = self.photos.list().await?;
        tracing::info!(
            photos = names.len(),
            guest_faces = guest_encodings.len(),
            tolerance = self.criteria.tolerance,
            min_confidence = self.criteria.min_confidence,
            "matching guest photo"
        );

        let mut matches = Vec::new();
        let mut stats = MatchStats {
            tolerance_used: self.criteria.tolerance,
            min_confidence_used: self.criteria.min_confidence,
            ..MatchStats::default()
        };

        for name in &names {
            let encodings = match self.encodings_for(name).await {
                Ok(encodings) => encodings,
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "skipping photo");
                    stats.errors += 1;
                    continue;
                }
            };
            stats.total_photos_processed += 1;
            stats.total_faces_found += encodings.len();

            match best_match(probe, &encodings, self.criteria) {
                MatchOutcome::Matched { confidence, distance } => {
                    tracing::debug!(file = %name, confidence, distance, "match");
                    matches.push(PhotoMatch {
                        filename: name.clone(),
                        path: photo_url(name),
                        confidence,
                        face_distance: distance,
                    });
                }
                MatchOutcome::LowConfidence { confidence } => {
                    tracing::debug!(file = %name, confidence, "rejected: low confidence");
                    stats.rejected_low_confidence += 1;
                }
                MatchOutcome::NoMatch => {}
            }
        }

        self.prune(&names);
        self.persist_or_warn().await;

        matches.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        if !matches.is_empty() {
            stats.average_confidence = matches.iter().map(|m| m.confidence).sum::<f32>() / matches.len() as f32;
        }

        tracing::info!(
            matches = matches.len(),
            rejected_low_confidence = stats.rejected_low_confidence,
            errors = stats.errors,
            "matching finished"
        );

        Ok(MatchReport {
            total_matches: matches.len(),
            matches,
            stats,
        })
    }

    /// Encode every stored photo so guest searches hit the cache.
    pub async fn batch_process(&self) -> Result<BatchStats, MatchError> {
        let names = self.photos.list().await?;
        let mut stats = BatchStats {
            total_files: names.len(),
            ..BatchStats::default()
        };
        tracing::info!(photos = names.len(), "batch processing photos");

        for name in &names {
            match self.encodings_for(name).await {
                Ok(encodings) => {
                    stats.processed += 1;
                    stats.total_faces_found += encodings.len();
                    if stats.processed % 10 == 0 {
                        tracing::info!(processed = stats.processed, total = names.len(), "batch progress");
                    }
                }
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "batch processing failed for photo");
                    stats.errors += 1;
                }
            }
        }

        self.prune(&names);
        self.persist_or_warn().await;
        stats.cache_size = self.lock_cache().len();
        Ok(stats)
    }

    /// Face locations and encoding count for one stored photo.
    pub async fn face_debug(&self, name: &str) -> Result<FaceDebug, MatchError> {
        // A name that cannot be a stored photo is simply not there.
        let path = self.photos.existing(name).await.map_err(|e| match e {
            PhotoError::InvalidName(name) => PhotoError::NotFound(name),
            other => other,
        })?;
        let scan = self.engine.locate(path).await?;
        let encodings = self.encodings_for(name).await?;
        self.persist_or_warn().await;

        let faces_info: Vec<FaceInfo> = scan
            .faces
            .iter()
            .enumerate()
            .map(|(face_id, bbox)| {
                let location = bbox.location(scan.width, scan.height);
                FaceInfo {
                    face_id,
                    width: location.width(),
                    height: location.height(),
                    location,
                    confidence: bbox.confidence,
                }
            })
            .collect();

        Ok(FaceDebug {
            filename: name.to_string(),
            faces_detected: faces_info.len(),
            faces_info,
            encodings_count: encodings.len(),
        })
    }

    /// Delete a stored photo together with its cached encodings.
    pub async fn delete_photo(&self, name: &str) -> Result<(), MatchError> {
        self.photos.remove(name).await?;
        self.lock_cache().remove(name);
        self.persist_or_warn().await;
        Ok(())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    pub async fn clear_cache(&self) -> Result<(), MatchError> {
        let _guard = self.save_lock.lock().await;
        self.lock_cache().clear()?;
        Ok(())
    }

    fn prune(&self, names: &[String]) {
        let existing: HashSet<String> = names.iter().cloned().collect();
        self.lock_cache().retain_existing(&existing);
    }

    /// Save the cache, keeping the request's result when the write fails.
    /// The cache stays dirty and is written again on the next save.
    async fn persist_or_warn(&self) {
        if let Err(e) = self.persist().await {
            tracing::warn!(error = %e, "failed to save encoding cache");
        }
    }

    /// Write pending cache changes on the blocking pool.
    async fn persist(&self) -> Result<(), MatchError> {
        let _guard = self.save_lock.lock().await;
        let (path, snapshot) = {
            let mut cache = self.lock_cache();
            (cache.path().to_path_buf(), cache.take_snapshot()?)
        };
        let Some(bytes) = snapshot else {
            return Ok(());
        };

        let written = tokio::task::spawn_blocking(move || write_atomic(&path, &bytes)).await?;
        if let Err(e) = written {
            self.lock_cache().mark_dirty();
            return Err(e.into());
        }
        tracing::debug!(cached = self.lock_cache().len(), "saved encoding cache");
        Ok(())
    }
}
