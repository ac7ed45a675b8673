//! HTTP handlers.

use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::error::AppError;
use crate::matcher::MatchError;
use crate::photos::photo_url;
use crate::AppState;

const INDEX_HTML: &str = include_str!("../assets/index.html");
const PHOTOGRAPHER_HTML: &str = include_str!("../assets/photographer.html");
const GUEST_HTML: &str = include_str!("../assets/guest.html");
const MAIN_JS: &str = include_str!("../assets/main.js");

/// `{"success": true, ...body}`
#[derive(Serialize)]
struct Success<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

fn success<T: Serialize>(body: T) -> Json<Success<T>> {
    Json(Success { success: true, body })
}

#[derive(Serialize)]
struct PhotoEntry {
    filename: String,
    path: String,
}

#[derive(Serialize)]
struct RejectedUpload {
    filename: String,
    error: String,
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn photographer(State(state): State<Arc<AppState>>) -> Result<Html<String>, AppError> {
    let count = state.matcher.photos().count().await?;
    Ok(Html(PHOTOGRAPHER_HTML.replace("{{ photo_count }}", &count.to_string())))
}

pub async fn guest() -> Html<&'static str> {
    Html(GUEST_HTML)
}

pub async fn main_js() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript; charset=utf-8")], MAIN_JS)
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Store every file sent in the repeated `photos` field.
pub async fn upload_wedding_photos(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let photos = state.matcher.photos();
    let mut saw_field = false;
    let mut uploaded = Vec::new();
    let mut rejected = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("photos") {
            continue;
        }
        saw_field = true;
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        if filename.is_empty() && bytes.is_empty() {
            continue;
        }

        match photos.save_upload(&filename, &bytes).await {
            Ok(stored) => uploaded.push(stored),
            Err(e) => {
                tracing::info!(file = %filename, error = %e, "upload rejected");
                rejected.push(RejectedUpload { filename, error: e.to_string() });
            }
        }
    }

    if !saw_field {
        return Err(AppError::BadRequest("No photos provided".to_string()));
    }

    Ok(success(json!({
        "message": format!("Successfully uploaded {} photos", uploaded.len()),
        "uploaded": uploaded,
        "rejected": rejected,
    })))
}

/// Encode all photos up front so guest searches hit the cache.
pub async fn preprocess_photos(State(state): State<Arc<AppState>>) -> Response {
    match state.matcher.batch_process().await {
        Ok(stats) => success(json!({
            "message": format!(
                "Pre-processed {} photos, found {} faces",
                stats.processed, stats.total_faces_found
            ),
            "stats": stats,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "pre-processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "error": format!("Error during pre-processing: {e}"),
                })),
            )
                .into_response()
        }
    }
}

/// Match the selfie in the `guest_photo` field against every stored photo.
pub async fn find_matches(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut selfie = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some("guest_photo") {
            let filename = field.file_name().unwrap_or_default().to_string();
            selfie = Some((filename, field.bytes().await?));
            break;
        }
    }

    let Some((filename, bytes)) = selfie else {
        return Err(AppError::BadRequest("No guest photo provided".to_string()));
    };

    let guest = state
        .matcher
        .photos()
        .save_guest(&filename, &bytes)
        .await
        .map_err(|e| match e {
            crate::photos::PhotoError::Io { .. } => AppError::Photo(e),
            _ => AppError::BadRequest("Invalid file format".to_string()),
        })?;

    let report = state
        .matcher
        .find_matching_photos(&guest)
        .await
        .map_err(|e| match e {
            MatchError::Engine(crate::engine::EngineError::Image(_)) => {
                AppError::BadRequest("Invalid file format".to_string())
            }
            other => AppError::Match(other),
        })?;

    Ok(success(report))
}

pub async fn get_wedding_photos(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    let photos: Vec<PhotoEntry> = state
        .matcher
        .photos()
        .list()
        .await?
        .into_iter()
        .map(|filename| PhotoEntry {
            path: photo_url(&filename),
            filename,
        })
        .collect();
    Ok(Json(photos))
}

pub async fn get_cache_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    success(json!({ "cache_stats": state.matcher.cache_stats() }))
}

pub async fn clear_cache(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, AppError> {
    state.matcher.clear_cache().await?;
    Ok(success(json!({ "message": "Face recognition cache cleared successfully" })))
}

/// Detection details for one stored photo.
pub async fn face_debug(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let debug = state.matcher.face_debug(&filename).await?;
    Ok(success(debug))
}

/// Delete a stored photo and its cached encodings.
pub async fn delete_wedding_photo(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.matcher.delete_photo(&filename).await?;
    Ok(success(json!({ "message": format!("Deleted {filename}") })))
}
