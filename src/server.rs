use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::{compression::CompressionLayer, cors::{Any, CorsLayer}, trace::TraceLayer};

use crate::routes;

/// Builds the collaborator-facing HTTP surface (SPEC_FULL §6). Unlike the
/// donor's multi-workspace server, the engine is a single process-wide
/// singleton (`PipelineHandle`), so there is no per-request `AppState` to
/// thread through — handlers reach the pipeline directly.
pub fn create_app() -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/shutdown", post(routes::health::shutdown_handler))
        .route("/index/file", post(routes::engine::index_file))
        .route("/index/directory", post(routes::engine::index_directory))
        .route("/search", post(routes::engine::search))
        .route("/delete", delete(routes::engine::delete_by_hash))
        .route("/clear", post(routes::engine::clear_index))
        .route("/stats", get(routes::engine::get_stats))
        .route("/mode", get(routes::engine::get_mode_settings))
        .route("/mode/switch", post(routes::engine::switch_mode))
        .route("/mode/auto-detect", get(routes::engine::auto_detect_mode))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
}
