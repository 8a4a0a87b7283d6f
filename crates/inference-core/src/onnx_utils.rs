//! ONNX Runtime utilities for optimized classifier loading
//!
//! Sessions are created with full graph optimization and an execution
//! provider list chosen from the member's [`Device`]. Accelerator members try
//! CoreML (macOS) and CUDA before falling back to CPU; CPU members never touch
//! an accelerator.

use crate::model::Device;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, warn};

/// Error type for ONNX operations
#[derive(Debug, thiserror::Error)]
pub enum OnnxError {
    #[error("Failed to create session builder: {0}")]
    SessionBuilderError(String),

    #[error("Failed to load ONNX model from {path}: {error}")]
    ModelLoadError { path: String, error: String },

    #[error("Model file not found: {0}")]
    ModelNotFound(String),
}

/// Intra-op thread count, `AUTHENTICITY_THREADS` overrides the physical core count
pub fn intra_threads() -> usize {
    std::env::var("AUTHENTICITY_THREADS")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(num_cpus::get_physical)
}

/// `AUTHENTICITY_DEBUG_ONNX=1|true` enables session timing diagnostics
pub fn debug_enabled() -> bool {
    std::env::var("AUTHENTICITY_DEBUG_ONNX")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Cache directory for compiled CoreML models
///
/// Priority: `AUTHENTICITY_COREML_CACHE_DIR`, then `$HOME/.cache/authenticity/coreml`,
/// then `$TMPDIR/authenticity-coreml`.
fn coreml_cache_dir() -> String {
    let dir = if let Ok(dir) = std::env::var("AUTHENTICITY_COREML_CACHE_DIR") {
        dir
    } else if let Ok(home) = std::env::var("HOME") {
        format!("{home}/.cache/authenticity/coreml")
    } else {
        let temp_dir = std::env::var("TMPDIR").unwrap_or_else(|_| "/tmp".to_string());
        format!("{temp_dir}/authenticity-coreml")
    };

    if let Err(e) = std::fs::create_dir_all(&dir) {
        warn!("Failed to create CoreML cache directory {}: {}", dir, e);
    }
    dir
}

fn base_builder() -> Result<SessionBuilder, OnnxError> {
    Session::builder()
        .map_err(|e| OnnxError::SessionBuilderError(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| OnnxError::SessionBuilderError(e.to_string()))?
        .with_intra_threads(intra_threads())
        .map_err(|e| OnnxError::SessionBuilderError(e.to_string()))?
        .with_memory_pattern(true)
        .map_err(|e| OnnxError::SessionBuilderError(e.to_string()))
}

/// Create an ONNX Runtime session for a classifier on the given device
///
/// Accelerator members try CoreML first; if CoreML fails to compile the graph
/// the session is retried with CUDA/CPU only.
pub fn create_session(model_path: &Path, device: Device) -> Result<Session, OnnxError> {
    if !model_path.exists() {
        return Err(OnnxError::ModelNotFound(model_path.display().to_string()));
    }

    let debug = debug_enabled();
    let start = Instant::now();

    let session = match device {
        Device::Cpu => base_builder()?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .map_err(|e| OnnxError::SessionBuilderError(e.to_string()))?
            .commit_from_file(model_path),
        Device::Accelerator(ordinal) => {
            let cache_dir = coreml_cache_dir();
            base_builder()?
                .with_execution_providers([
                    CoreMLExecutionProvider::default()
                        .with_subgraphs(true)
                        .with_model_cache_dir(cache_dir)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(ordinal as i32)
                        .build(),
                    CPUExecutionProvider::default().build(),
                ])
                .map_err(|e| OnnxError::SessionBuilderError(e.to_string()))?
                .commit_from_file(model_path)
        }
    };

    match session {
        Ok(s) => {
            if debug {
                debug!(
                    "[ONNX DEBUG] Session created for {} on {:?} in {:.3}s",
                    model_path.display(),
                    device,
                    start.elapsed().as_secs_f64()
                );
            }
            Ok(s)
        }
        Err(e) => {
            let error_msg = e.to_string();
            let coreml_failure = error_msg.contains("CoreML") || error_msg.contains("MLModel");
            let Device::Accelerator(ordinal) = device else {
                return Err(OnnxError::ModelLoadError {
                    path: model_path.display().to_string(),
                    error: error_msg,
                });
            };
            if !coreml_failure {
                return Err(OnnxError::ModelLoadError {
                    path: model_path.display().to_string(),
                    error: error_msg,
                });
            }

            warn!(
                "CoreML failed for {}, retrying with CUDA/CPU: {}",
                model_path.display(),
                error_msg
            );
            let fallback = base_builder()?
                .with_execution_providers([
                    CUDAExecutionProvider::default()
                        .with_device_id(ordinal as i32)
                        .build(),
                    CPUExecutionProvider::default().build(),
                ])
                .map_err(|e| OnnxError::SessionBuilderError(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e| OnnxError::ModelLoadError {
                    path: model_path.display().to_string(),
                    error: format!("CoreML failed, CPU/CUDA also failed: {e}"),
                })?;

            if debug {
                debug!(
                    "[ONNX DEBUG] Fallback session created in {:.3}s",
                    start.elapsed().as_secs_f64()
                );
            }
            Ok(fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_not_found() {
        let result = create_session(Path::new("nonexistent_model.onnx"), Device::Cpu);
        assert!(matches!(result, Err(OnnxError::ModelNotFound(_))));
    }

    #[test]
    fn test_error_display() {
        let err = OnnxError::ModelNotFound("xception.onnx".to_string());
        assert_eq!(err.to_string(), "Model file not found: xception.onnx");

        let err = OnnxError::ModelLoadError {
            path: "xception.onnx".to_string(),
            error: "invalid format".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to load ONNX model from xception.onnx: invalid format"
        );
    }

    #[test]
    fn test_intra_threads_positive() {
        assert!(intra_threads() >= 1);
    }
}
