use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::matcher::MatchError;
use crate::photos::PhotoError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("upload failed: {0}")]
    Multipart(#[from] MultipartError),

    #[error(transparent)]
    Photo(#[from] PhotoError),

    #[error(transparent)]
    Match(#[from] MatchError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Multipart(e) => e.status(),
            AppError::Photo(e) | AppError::Match(MatchError::Photo(e)) => photo_status(e),
            AppError::Match(MatchError::NoFaceInSelfie) => StatusCode::BAD_REQUEST,
            AppError::Match(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Photo(PhotoError::NotFound(_))
            | AppError::Match(MatchError::Photo(PhotoError::NotFound(_))) => "Image not found".to_string(),
            other => other.to_string(),
        }
    }
}

fn photo_status(e: &PhotoError) -> StatusCode {
    match e {
        PhotoError::NotFound(_) => StatusCode::NOT_FOUND,
        PhotoError::InvalidName(_) | PhotoError::NotAllowed(_) | PhotoError::NotAnImage(_) => {
            StatusCode::BAD_REQUEST
        }
        PhotoError::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }

        (status, Json(json!({ "success": false, "error": self.message() }))).into_response()
    }
}
