//! guestlensd: event photo sharing with selfie-based face search.
//!
//! The photographer uploads event photos; a guest uploads a selfie and gets
//! back every photo their face appears in. Face detection and embedding run
//! on a dedicated engine thread; encodings are cached on disk per photo.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use guestlens_core::{FacePipeline, MatchCriteria};
use thiserror::Error;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod photos;
pub mod routes;

use cache::EncodingCache;
use config::Config;
use matcher::FaceMatcher;
use photos::{PhotoError, PhotoStore, PHOTO_URL_PREFIX};

#[derive(Error, Debug)]
pub enum StartupError {
    #[error("photo storage: {0}")]
    Photos(#[from] PhotoError),
    #[error("spawning engine thread: {0}")]
    Engine(#[from] std::io::Error),
}

/// Shared state handed to every handler.
pub struct AppState {
    pub matcher: FaceMatcher,
}

impl AppState {
    /// Open storage, load the cache and start the engine around `pipeline`.
    pub fn new<P>(config: &Config, pipeline: P) -> Result<Arc<Self>, StartupError>
    where
        P: FacePipeline + Send + 'static,
    {
        let photos = PhotoStore::open(config.photos_dir(), config.guest_dir())?;
        let cache = EncodingCache::load(&config.cache_path);
        let engine = engine::spawn_engine(pipeline, config.max_image_side)?;
        let criteria = MatchCriteria {
            tolerance: config.tolerance,
            min_confidence: config.min_confidence,
        };

        Ok(Arc::new(Self {
            matcher: FaceMatcher::new(photos, engine, cache, criteria),
        }))
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    let photo_files = ServeDir::new(state.matcher.photos().photos_dir());

    Router::new()
        .route("/", get(routes::index))
        .route("/photographer", get(routes::photographer))
        .route("/guest", get(routes::guest))
        .route("/health", get(routes::health_check))
        .route("/static/js/main.js", get(routes::main_js))
        .route("/upload_wedding_photos", post(routes::upload_wedding_photos))
        .route("/preprocess_photos", post(routes::preprocess_photos))
        .route("/find_matches", post(routes::find_matches))
        .route("/get_wedding_photos", get(routes::get_wedding_photos))
        .route("/wedding_photos/{filename}", delete(routes::delete_wedding_photo))
        .route("/get_cache_stats", get(routes::get_cache_stats))
        .route("/clear_cache", post(routes::clear_cache))
        .route("/face_debug/{*filename}", get(routes::face_debug))
        .nest_service(PHOTO_URL_PREFIX, photo_files)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
