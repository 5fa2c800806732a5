use serde::{Deserialize, Serialize};

use crate::modes::Mode;

/// Maximum allowed length for a search query (characters), mirroring the
/// donor's query guardrail.
pub const MAX_SEARCH_QUERY_LENGTH: usize = 1000;

/// Default number of hits returned by `/search` when the caller omits `k`.
pub const DEFAULT_SEARCH_K: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub listen_addr: String,
    /// Where the metadata store and vector index snapshots live.
    pub cache_dir: String,
    /// Initial mode; `None` means auto-detect from hardware at startup.
    pub startup_mode: Option<Mode>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = std::env::var("SEARCH_ENGINE_PORT").unwrap_or_else(|_| "9821".to_string());

        let cache_dir = std::env::var("SEARCH_ENGINE_CACHE_DIR").unwrap_or_else(|_| {
            dirs::data_local_dir()
                .map(|d| d.join("adaptive-search-engine").to_string_lossy().to_string())
                .unwrap_or_else(|| ".adaptive-search-engine".to_string())
        });

        let startup_mode = std::env::var("SEARCH_ENGINE_MODE")
            .ok()
            .and_then(|v| v.parse::<Mode>().ok());

        Self {
            listen_addr: format!("127.0.0.1:{port}"),
            cache_dir,
            startup_mode,
        }
    }
}
