//! Collaborator-facing HTTP surface for the adaptive search engine
//! (SPEC_FULL §6). Grounded on the donor's `routes/search.rs`: request
//! handlers validate input, then bridge into blocking engine calls via
//! `tokio::task::spawn_blocking` since indexing and search do file IO and CPU
//! work the async runtime should not block on.

use axum::Json;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::MAX_SEARCH_QUERY_LENGTH;
use crate::error::{AppError, AppResult};
use crate::modes::Mode;
use crate::pipeline::{require_initialized, AutoDetectOutcome, PipelineStats};
use crate::processor::{DirectoryOutcome, IndexOutcome, SearchResult};

#[derive(Debug, Deserialize)]
pub struct IndexFileRequest {
    pub path: String,
}

pub async fn index_file(Json(req): Json<IndexFileRequest>) -> AppResult<Json<IndexOutcome>> {
    let path = PathBuf::from(req.path);
    let outcome = tokio::task::spawn_blocking(move || {
        let handle = require_initialized()?;
        handle.index_file(&path)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("index task panicked: {e}")))??;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct IndexDirectoryRequest {
    pub path: String,
    #[serde(default = "default_recursive")]
    pub recursive: bool,
}

fn default_recursive() -> bool {
    true
}

pub async fn index_directory(
    Json(req): Json<IndexDirectoryRequest>,
) -> AppResult<Json<DirectoryOutcome>> {
    let path = PathBuf::from(req.path);
    let recursive = req.recursive;
    let outcome = tokio::task::spawn_blocking(move || {
        let handle = require_initialized()?;
        handle.index_directory(&path, recursive)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("index task panicked: {e}")))??;

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_k")]
    pub k: usize,
}

fn default_k() -> usize {
    crate::config::DEFAULT_SEARCH_K
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

pub async fn search(Json(req): Json<SearchRequest>) -> AppResult<Json<SearchResponse>> {
    if req.query.trim().is_empty() {
        return Err(AppError::BadRequest("query must not be empty".into()));
    }
    if req.query.len() > MAX_SEARCH_QUERY_LENGTH {
        return Err(AppError::BadRequest(format!(
            "query exceeds maximum length of {MAX_SEARCH_QUERY_LENGTH} characters"
        )));
    }

    let k = req.k.max(1);
    let results = tokio::task::spawn_blocking(move || {
        let handle = require_initialized()?;
        handle.search(&req.query, k)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("search task panicked: {e}")))??;

    Ok(Json(SearchResponse { results }))
}

#[derive(Debug, Deserialize)]
pub struct DeleteByHashRequest {
    pub file_hash: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteByHashResponse {
    pub deleted: usize,
}

pub async fn delete_by_hash(
    Json(req): Json<DeleteByHashRequest>,
) -> AppResult<Json<DeleteByHashResponse>> {
    let deleted = tokio::task::spawn_blocking(move || {
        let handle = require_initialized()?;
        handle.delete_by_hash(&req.file_hash)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("delete task panicked: {e}")))??;

    Ok(Json(DeleteByHashResponse { deleted }))
}

pub async fn clear_index() -> AppResult<Json<serde_json::Value>> {
    tokio::task::spawn_blocking(|| {
        let handle = require_initialized()?;
        handle.clear_index()
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("clear task panicked: {e}")))??;

    Ok(Json(serde_json::json!({ "status": "cleared" })))
}

pub async fn get_stats() -> AppResult<Json<PipelineStats>> {
    let stats = tokio::task::spawn_blocking(|| {
        let handle = require_initialized()?;
        handle.get_stats()
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("stats task panicked: {e}")))??;

    Ok(Json(stats))
}

#[derive(Debug, Serialize)]
pub struct ModeSettingsResponse {
    pub mode: String,
    pub settings: crate::modes::ModeSettings,
}

pub async fn get_mode_settings() -> AppResult<Json<ModeSettingsResponse>> {
    let handle = require_initialized()?;
    let settings = handle.mode_settings();
    Ok(Json(ModeSettingsResponse {
        mode: handle.mode().as_str().to_string(),
        settings,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SwitchModeRequest {
    pub mode: String,
}

pub async fn switch_mode(Json(req): Json<SwitchModeRequest>) -> AppResult<Json<serde_json::Value>> {
    let mode = Mode::from_str(&req.mode)
        .map_err(|e| AppError::BadRequest(format!("invalid mode: {e}")))?;

    tokio::task::spawn_blocking(move || {
        let handle = require_initialized()?;
        handle.switch_mode(mode)
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("mode switch task panicked: {e}")))??;

    Ok(Json(serde_json::json!({ "status": "switched", "mode": req.mode })))
}

pub async fn auto_detect_mode() -> AppResult<Json<AutoDetectOutcome>> {
    let outcome = tokio::task::spawn_blocking(|| {
        let handle = require_initialized()?;
        handle.auto_detect_mode()
    })
    .await
    .map_err(|e| AppError::Internal(anyhow::anyhow!("hardware probe task panicked: {e}")))??;

    Ok(Json(outcome))
}
