//! Adaptive Pipeline (SPEC_FULL §4.7).
//!
//! Grounded on the donor original's `adaptive_pipeline.py` (`AdaptivePipeline`):
//! a process-wide singleton wrapping one `StreamingProcessor` at a time, with
//! `switch_mode` reinitializing the processor rather than re-embedding stored
//! text (Design Notes §9, decided). The donor's double-checked-locked module
//! global becomes a `std::sync::OnceLock`-backed handle here, matching how the
//! Rust backend already replaces Python-style singletons elsewhere.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::hardware::{HardwareDetector, HardwareProfile};
use crate::modes::{needs_index_conversion, Mode, ModeSettings};
use crate::processor::{DirectoryOutcome, IndexOutcome, SearchResult, StreamingProcessor};
use crate::store::MetadataStore;

/// Result of `auto_detect_mode` (SPEC_FULL §4.7/§6): the hardware-recommended
/// mode compared against what is currently running, and whether a switch was
/// performed to reconcile them.
#[derive(Debug, Clone, Serialize)]
pub struct AutoDetectOutcome {
    pub detected_mode: Mode,
    pub current_mode: Mode,
    pub switched: bool,
    pub hardware: HardwareProfile,
    pub auto_detected: bool,
}

/// Engine-wide stats (SPEC_FULL §6 `get_stats`), composed from the processor's
/// index/chunk counters plus pipeline-level state (`auto_detected`) and a
/// fresh hardware read (`ram`).
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub mode: String,
    pub auto_detected: bool,
    pub oom_protection: bool,
    pub ram: RamStats,
    pub index: IndexStats,
    pub features: FeatureStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RamStats {
    pub used_mb: f64,
    pub available_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub size: usize,
    pub chunks: i64,
    pub files: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureStats {
    pub using_onnx: bool,
    pub using_binary: bool,
}

/// The vector index snapshot's on-disk format is keyed by representation
/// (backend + dim), not by mode name, so eco and balanced mode (both binary)
/// share one snapshot and only a representation change (-> performance)
/// starts a new file.
fn snapshot_path_for(cache_dir: &std::path::Path, mode: Mode) -> PathBuf {
    let settings = mode.settings();
    let tag = if settings.is_binary() { "binary" } else { "float" };
    cache_dir.join(format!("vectors.{tag}.bin"))
}

fn cell() -> &'static OnceLock<PipelineHandle> {
    static CELL: OnceLock<PipelineHandle> = OnceLock::new();
    &CELL
}

/// Process-wide entry point. Construction is idempotent: the first caller's
/// `cache_dir`/`mode` wins and later calls return the same instance.
pub struct PipelineHandle {
    cache_dir: PathBuf,
    processor: RwLock<StreamingProcessor>,
    /// True when the current mode was chosen by hardware detection rather
    /// than requested explicitly (construction with no override, or a
    /// completed `auto_detect_mode` call). Cleared by `switch_mode`.
    auto_detected: AtomicBool,
}

impl PipelineHandle {
    /// `mode = None` resolves the startup mode from the hardware probe
    /// (falling back to Balanced if the probe itself fails) and marks it
    /// auto-detected; `mode = Some(m)` honors the explicit override.
    pub fn get_or_init(cache_dir: PathBuf, mode: Option<Mode>) -> EngineResult<&'static PipelineHandle> {
        if let Some(handle) = cell().get() {
            return Ok(handle);
        }
        let (resolved_mode, auto_detected) = match mode {
            Some(m) => (m, false),
            None => (HardwareDetector::detect_mode().unwrap_or(Mode::Balanced), true),
        };
        let handle = Self::build(cache_dir, resolved_mode, auto_detected)?;
        let _ = cell().set(handle);
        Ok(cell().get().expect("just set"))
    }

    fn build(cache_dir: PathBuf, mode: Mode, auto_detected: bool) -> EngineResult<Self> {
        std::fs::create_dir_all(&cache_dir)?;
        let store = MetadataStore::open(&cache_dir.join("metadata.sqlite3"))?;
        let snapshot_path = snapshot_path_for(&cache_dir, mode);
        let processor = StreamingProcessor::new(mode, store, snapshot_path)?;
        Ok(Self {
            cache_dir,
            processor: RwLock::new(processor),
            auto_detected: AtomicBool::new(auto_detected),
        })
    }

    pub fn mode(&self) -> Mode {
        self.processor.read().mode()
    }

    pub fn mode_settings(&self) -> ModeSettings {
        self.mode().settings()
    }

    pub fn index_file(&self, path: &std::path::Path) -> EngineResult<IndexOutcome> {
        self.processor.read().index_file(path)
    }

    pub fn index_directory(&self, dir: &std::path::Path, recursive: bool) -> EngineResult<DirectoryOutcome> {
        self.processor.read().index_directory(dir, recursive)
    }

    pub fn search(&self, query: &str, k: usize) -> EngineResult<Vec<SearchResult>> {
        self.processor.read().search(query, k)
    }

    pub fn delete_by_hash(&self, file_hash: &str) -> EngineResult<usize> {
        self.processor.read().delete_by_hash(file_hash)
    }

    pub fn clear_index(&self) -> EngineResult<()> {
        self.processor.read().clear()
    }

    /// Composes SPEC_FULL §6's `get_stats` shape: the processor's index/chunk
    /// counters plus this handle's `auto_detected` flag and a fresh hardware
    /// read for `ram`.
    pub fn get_stats(&self) -> EngineResult<PipelineStats> {
        let processor = self.processor.read();
        let engine_stats = processor.get_stats()?;
        let hardware = HardwareDetector::detect_profile()?;
        let mode = processor.mode();

        Ok(PipelineStats {
            mode: mode.as_str().to_string(),
            auto_detected: self.auto_detected.load(Ordering::SeqCst),
            oom_protection: true,
            ram: RamStats {
                used_mb: (hardware.total_ram_gb - hardware.available_ram_gb) * 1024.0,
                available_mb: hardware.available_ram_gb * 1024.0,
            },
            index: IndexStats {
                size: engine_stats.index_total_vectors,
                chunks: engine_stats.total_chunks,
                files: engine_stats.total_files,
            },
            features: FeatureStats {
                using_onnx: processor.backend_name() == "candle",
                using_binary: mode.settings().is_binary(),
            },
        })
    }

    /// Compares the current mode to the hardware-recommended one and, if
    /// they differ, switches to it. The resulting mode is always treated as
    /// auto-detected, whether or not a switch was actually needed.
    pub fn auto_detect_mode(&self) -> EngineResult<AutoDetectOutcome> {
        let hardware = HardwareDetector::detect_profile()?;
        let detected_mode = hardware.recommended_mode();
        let current_mode = self.mode();
        let switched = detected_mode != current_mode;

        if switched {
            self.switch_mode(detected_mode)?;
        }
        self.auto_detected.store(true, Ordering::SeqCst);

        Ok(AutoDetectOutcome {
            detected_mode,
            current_mode,
            switched,
            hardware,
            auto_detected: true,
        })
    }

    /// Switches to `new_mode`. A same-mode request is a no-op. Otherwise a
    /// fresh `StreamingProcessor` replaces the current one; if the
    /// representation changed (binary <-> float) the stored index is emptied
    /// rather than re-embedded, since no backend ever rehydrates chunk text
    /// specifically for re-indexing (Design Notes §9, decided). Construction
    /// failure rolls back to the previous processor, which stays live. On
    /// success the new mode is treated as an explicit choice, not a detected
    /// one, per SPEC_FULL §4.7.
    pub fn switch_mode(&self, new_mode: Mode) -> EngineResult<()> {
        let current_mode = self.mode();
        if current_mode == new_mode {
            return Ok(());
        }

        let converts = needs_index_conversion(current_mode, new_mode);
        let snapshot_path = snapshot_path_for(&self.cache_dir, new_mode);
        if converts && snapshot_path.exists() {
            std::fs::remove_file(&snapshot_path)?;
        }

        let store = MetadataStore::open(&self.cache_dir.join("metadata.sqlite3"))?;
        let new_processor = StreamingProcessor::new(new_mode, store, snapshot_path)?;

        if converts {
            new_processor.clear()?;
        }

        *self.processor.write() = new_processor;
        self.auto_detected.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn close(&self) -> EngineResult<()> {
        self.processor.read().save_snapshot()
    }
}

/// Error returned when a caller reaches for the pipeline before it has been
/// initialized once (main.rs always initializes it at startup, so this
/// should never surface outside tests).
pub fn require_initialized() -> EngineResult<&'static PipelineHandle> {
    cell()
        .get()
        .ok_or_else(|| EngineError::Resource("pipeline not initialized".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Each test below constructs its own StreamingProcessor/MetadataStore
    // directly rather than through the process-wide singleton, since
    // PipelineHandle::get_or_init can only ever be exercised once per process.

    #[test]
    fn switch_mode_is_a_noop_for_the_same_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.sqlite3")).unwrap();
        let processor = StreamingProcessor::new(Mode::Eco, store, dir.path().join("v.bin")).unwrap();
        let handle = PipelineHandle {
            cache_dir: dir.path().to_path_buf(),
            processor: RwLock::new(processor),
            auto_detected: AtomicBool::new(false),
        };
        handle.switch_mode(Mode::Eco).unwrap();
        assert_eq!(handle.mode(), Mode::Eco);
    }

    #[test]
    fn switch_mode_across_representations_empties_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.sqlite3")).unwrap();
        let processor = StreamingProcessor::new(Mode::Eco, store, dir.path().join("v.bin")).unwrap();

        let file = dir.path().join("a.txt");
        std::fs::write(&file, "some text to index before switching modes").unwrap();
        processor.index_file(&file).unwrap();
        assert!(processor.get_stats().unwrap().total_chunks > 0);

        let handle = PipelineHandle {
            cache_dir: dir.path().to_path_buf(),
            processor: RwLock::new(processor),
            auto_detected: AtomicBool::new(true),
        };
        handle.switch_mode(Mode::Performance).unwrap();
        assert_eq!(handle.mode(), Mode::Performance);
        assert_eq!(handle.get_stats().unwrap().index.chunks, 0);
        assert!(!handle.auto_detected.load(Ordering::SeqCst));
    }

    #[test]
    fn switch_mode_within_the_same_representation_keeps_stored_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.sqlite3")).unwrap();
        let processor = StreamingProcessor::new(Mode::Eco, store, dir.path().join("v.bin")).unwrap();

        let file = dir.path().join("a.txt");
        std::fs::write(&file, "some text to index before switching modes").unwrap();
        processor.index_file(&file).unwrap();

        let handle = PipelineHandle {
            cache_dir: dir.path().to_path_buf(),
            processor: RwLock::new(processor),
            auto_detected: AtomicBool::new(false),
        };
        handle.switch_mode(Mode::Balanced).unwrap();
        assert_eq!(handle.mode(), Mode::Balanced);
        assert!(handle.get_stats().unwrap().index.chunks > 0);
    }

    #[test]
    fn auto_detect_mode_switches_when_recommendation_differs() {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.sqlite3")).unwrap();
        let hardware = HardwareDetector::detect_profile().unwrap();
        let recommended = hardware.recommended_mode();
        let off_mode = if recommended == Mode::Eco { Mode::Performance } else { Mode::Eco };
        let processor = StreamingProcessor::new(off_mode, store, dir.path().join("v.bin")).unwrap();
        let handle = PipelineHandle {
            cache_dir: dir.path().to_path_buf(),
            processor: RwLock::new(processor),
            auto_detected: AtomicBool::new(false),
        };

        let outcome = handle.auto_detect_mode().unwrap();
        assert_eq!(outcome.detected_mode, recommended);
        assert_eq!(outcome.current_mode, off_mode);
        assert!(outcome.switched);
        assert!(outcome.auto_detected);
        assert_eq!(handle.mode(), recommended);
        assert!(handle.auto_detected.load(Ordering::SeqCst));
    }
}
