//! Error taxonomy (SPEC_FULL §7).
//!
//! `EngineError` is the taxonomy the core engine (chunker, embedder, vector
//! index, metadata store, streaming processor, adaptive pipeline) returns.
//! `AppError` is a thin wrapper used only at the axum boundary, following the
//! donor's `AppError`/`IntoResponse` pattern — core engine code never depends
//! on axum types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Missing file/directory, not a regular file/dir, empty query, invalid mode string.
    #[error("input error: {0}")]
    Input(String),

    /// Unreadable bytes, unsupported file type.
    #[error("extraction error: {0}")]
    Extraction(String),

    /// Model load failure (fatal) or batch inference failure (file-scoped).
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Dimension/dtype mismatch on add, corrupted snapshot on load.
    #[error("index error: {0}")]
    Index(String),

    /// Journal/io failure in the metadata store.
    #[error("storage error: {0}")]
    Storage(String),

    /// Out-of-memory; becomes fatal only if already running in eco mode.
    #[error("resource error: {0}")]
    Resource(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Engine(EngineError::Input(_)) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Engine(EngineError::Extraction(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            AppError::Engine(EngineError::Embedding(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Engine(EngineError::Index(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Engine(EngineError::Storage(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::Engine(EngineError::Resource(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::Engine(EngineError::Io(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
        };

        let body = json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
