//! Mode Settings: pure mapping from operating mode to tuning knobs.
//!
//! Mirrors `get_mode_settings()` in the donor Python implementation's
//! `hardware_detector` module. The table is a stable contract (SPEC_FULL §3)
//! and must not drift from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vector representation a given mode embeds and indexes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    Binary,
    Float32,
}

impl Quantization {
    pub fn is_binary(self) -> bool {
        matches!(self, Quantization::Binary)
    }
}

/// Operating mode: a named preset trading index quality/throughput for memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Eco,
    Balanced,
    Performance,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Eco, Mode::Balanced, Mode::Performance];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Eco => "eco",
            Mode::Balanced => "balanced",
            Mode::Performance => "performance",
        }
    }

    pub fn settings(self) -> ModeSettings {
        match self {
            Mode::Eco => ModeSettings {
                mode: self,
                batch_size: 1,
                embedding_dim: 384,
                quantization: Quantization::Binary,
                max_chunk_size: 512,
                overlap: 50,
                ram_target_mb: 500,
                aggressive_gc: true,
            },
            Mode::Balanced => ModeSettings {
                mode: self,
                batch_size: 4,
                embedding_dim: 384,
                quantization: Quantization::Binary,
                max_chunk_size: 1000,
                overlap: 100,
                ram_target_mb: 1024,
                aggressive_gc: false,
            },
            Mode::Performance => ModeSettings {
                mode: self,
                batch_size: 16,
                embedding_dim: 384,
                quantization: Quantization::Float32,
                max_chunk_size: 1000,
                overlap: 100,
                ram_target_mb: 2048,
                aggressive_gc: false,
            },
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a mode string does not name one of eco/balanced/performance.
#[derive(Debug, thiserror::Error)]
#[error("invalid mode: {0}")]
pub struct InvalidMode(pub String);

impl FromStr for Mode {
    type Err = InvalidMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eco" => Ok(Mode::Eco),
            "balanced" => Ok(Mode::Balanced),
            "performance" => Ok(Mode::Performance),
            other => Err(InvalidMode(other.to_string())),
        }
    }
}

/// Tuning knobs a mode resolves to. `embedding_dim` is fixed at 384 across all
/// modes; only quantization, batching, and chunk geometry vary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeSettings {
    pub mode: Mode,
    pub batch_size: usize,
    pub embedding_dim: usize,
    pub quantization: Quantization,
    pub max_chunk_size: usize,
    pub overlap: usize,
    pub ram_target_mb: u64,
    pub aggressive_gc: bool,
}

impl ModeSettings {
    pub fn is_binary(&self) -> bool {
        self.quantization.is_binary()
    }
}

/// Whether switching between two modes changes the vector representation
/// (binary <-> float), which forces a full index rebuild (SPEC_FULL §4.7).
pub fn needs_index_conversion(old: Mode, new: Mode) -> bool {
    old.settings().is_binary() != new.settings().is_binary()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_settings_match_the_stable_contract_table() {
        let eco = Mode::Eco.settings();
        assert_eq!(eco.batch_size, 1);
        assert_eq!(eco.max_chunk_size, 512);
        assert_eq!(eco.overlap, 50);
        assert!(eco.is_binary());
        assert_eq!(eco.ram_target_mb, 500);

        let balanced = Mode::Balanced.settings();
        assert_eq!(balanced.batch_size, 4);
        assert_eq!(balanced.max_chunk_size, 1000);
        assert!(balanced.is_binary());

        let perf = Mode::Performance.settings();
        assert_eq!(perf.batch_size, 16);
        assert!(!perf.is_binary());
        assert_eq!(perf.ram_target_mb, 2048);

        for m in Mode::ALL {
            assert_eq!(m.settings().embedding_dim, 384);
        }
    }

    #[test]
    fn conversion_needed_only_across_the_binary_float_boundary() {
        assert!(!needs_index_conversion(Mode::Eco, Mode::Balanced));
        assert!(needs_index_conversion(Mode::Balanced, Mode::Performance));
        assert!(needs_index_conversion(Mode::Eco, Mode::Performance));
        assert!(!needs_index_conversion(Mode::Performance, Mode::Performance));
    }

    #[test]
    fn from_str_rejects_unknown_modes() {
        assert_eq!(Mode::from_str("eco").unwrap(), Mode::Eco);
        assert!(Mode::from_str("turbo").is_err());
    }
}
