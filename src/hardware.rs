//! Hardware Probe (SPEC_FULL §4.1).
//!
//! Grounded on the donor original's `hardware_detector.py`: RAM/CPU/GPU/platform
//! detection feeding a `recommended_mode` rule. The Python original probes GPUs
//! through optional PyTorch imports (CUDA/MPS/ROCm); this crate has no such
//! runtime to query, so GPU presence is a best-effort advisory signal rather
//! than a hard dependency — absence never fails the probe.

use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::error::EngineError;
use crate::modes::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuKind {
    Cuda,
    Metal,
    Rocm,
}

impl GpuKind {
    fn as_str(self) -> &'static str {
        match self {
            GpuKind::Cuda => "cuda",
            GpuKind::Metal => "mps",
            GpuKind::Rocm => "rocm",
        }
    }
}

/// Snapshot of host resources, used both for the initial mode recommendation
/// and exposed verbatim via `auto_detect_mode()`'s `hardware` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareProfile {
    pub total_ram_gb: f64,
    pub available_ram_gb: f64,
    pub cpu_cores: usize,
    pub cpu_threads: usize,
    pub cpu_architecture: String,
    pub has_gpu: bool,
    pub gpu_type: Option<String>,
    pub gpu_count: usize,
    pub platform: String,
    pub supports_onnx: bool,
}

impl HardwareProfile {
    /// available RAM < 2.0 GB -> eco; < 4.0 GB -> balanced; otherwise performance.
    pub fn recommended_mode(&self) -> Mode {
        if self.available_ram_gb < 2.0 {
            Mode::Eco
        } else if self.available_ram_gb < 4.0 {
            Mode::Balanced
        } else {
            Mode::Performance
        }
    }
}

pub struct HardwareDetector;

impl HardwareDetector {
    /// Inspects the host and returns a full profile. Fails only if the OS
    /// refuses to report memory information at all (fatal per SPEC_FULL §4.1).
    pub fn detect_profile() -> Result<HardwareProfile, EngineError> {
        let mut sys = System::new_all();
        sys.refresh_all();

        let total_ram_bytes = sys.total_memory();
        if total_ram_bytes == 0 {
            return Err(EngineError::Resource(
                "host did not report total system memory".to_string(),
            ));
        }
        let total_ram_gb = total_ram_bytes as f64 / (1024.0_f64.powi(3));
        let available_ram_gb = sys.available_memory() as f64 / (1024.0_f64.powi(3));

        let cpu_threads = sys.cpus().len().max(1);
        let cpu_cores = sys.physical_core_count().unwrap_or(cpu_threads).max(1);
        let cpu_architecture = std::env::consts::ARCH.to_string();

        let (gpu_type, gpu_count) = detect_gpu();
        let has_gpu = gpu_type.is_some();
        let platform = os_platform_name();
        let supports_onnx = true;

        Ok(HardwareProfile {
            total_ram_gb,
            available_ram_gb,
            cpu_cores,
            cpu_threads,
            cpu_architecture,
            has_gpu,
            gpu_type: gpu_type.map(GpuKind::as_str).map(str::to_string),
            gpu_count,
            platform,
            supports_onnx,
        })
    }

    pub fn detect_mode() -> Result<Mode, EngineError> {
        Ok(Self::detect_profile()?.recommended_mode())
    }

    pub fn available_ram_gb() -> Result<f64, EngineError> {
        Ok(Self::detect_profile()?.available_ram_gb)
    }
}

fn os_platform_name() -> String {
    match std::env::consts::OS {
        "macos" => "Darwin".to_string(),
        "windows" => "Windows".to_string(),
        "linux" => "Linux".to_string(),
        other => other.to_string(),
    }
}

/// Best-effort GPU probe. Checks the environment markers a CUDA/ROCm/Metal
/// runtime would leave behind rather than linking a heavyweight GPU SDK; this
/// is advisory-only (feeds `supports_onnx`/acceleration preference), never
/// load-bearing for correctness.
fn detect_gpu() -> (Option<GpuKind>, usize) {
    if std::env::consts::OS == "macos" && std::env::consts::ARCH == "aarch64" {
        return (Some(GpuKind::Metal), 1);
    }
    if std::path::Path::new("/dev/nvidia0").exists() || std::env::var_os("CUDA_VISIBLE_DEVICES").is_some() {
        return (Some(GpuKind::Cuda), 1);
    }
    if std::env::var_os("ROCR_VISIBLE_DEVICES").is_some() {
        return (Some(GpuKind::Rocm), 1);
    }
    (None, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommended_mode_thresholds() {
        let mut profile = HardwareProfile {
            total_ram_gb: 8.0,
            available_ram_gb: 1.0,
            cpu_cores: 4,
            cpu_threads: 8,
            cpu_architecture: "x86_64".into(),
            has_gpu: false,
            gpu_type: None,
            gpu_count: 0,
            platform: "Linux".into(),
            supports_onnx: true,
        };
        assert_eq!(profile.recommended_mode(), Mode::Eco);

        profile.available_ram_gb = 3.0;
        assert_eq!(profile.recommended_mode(), Mode::Balanced);

        profile.available_ram_gb = 8.0;
        assert_eq!(profile.recommended_mode(), Mode::Performance);
    }

    #[test]
    fn detect_profile_succeeds_on_this_host() {
        let profile = HardwareDetector::detect_profile().expect("probe should succeed");
        assert!(profile.total_ram_gb > 0.0);
        assert!(profile.cpu_threads >= 1);
    }
}
