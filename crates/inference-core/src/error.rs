//! Error types for model loading and inference

use crate::image_io::ImageError;
use crate::onnx_utils::OnnxError;
use authenticity_common::DetectionError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to load model '{id}': {reason}")]
    LoadFailed { id: String, reason: String },

    #[error("Inference failed for model '{id}': {reason}")]
    InferenceFailed { id: String, reason: String },

    #[error("Unexpected output shape {shape:?} from model '{id}'")]
    InvalidOutputShape { id: String, shape: Vec<i64> },

    #[error("Layer '{layer}' not exposed by model '{id}'")]
    UnknownLayer { id: String, layer: String },

    #[error("Model '{0}' does not expose gradients")]
    GradientUnavailable(String),

    #[error("Session lock poisoned for model '{0}'")]
    LockPoisoned(String),

    #[error("ONNX error: {0}")]
    Onnx(#[from] OnnxError),

    #[error("Failed to parse model list: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ModelError> for DetectionError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::LoadFailed { id, reason } => DetectionError::ModelLoadFailure { id, reason },
            ModelError::Onnx(OnnxError::ModelNotFound(path)) => DetectionError::ModelLoadFailure {
                id: path,
                reason: "model file not found".to_string(),
            },
            ModelError::GradientUnavailable(id) => DetectionError::GradientUnavailable(id),
            ModelError::Io(e) => DetectionError::Io(e),
            ModelError::Yaml(e) => DetectionError::Config(e.to_string()),
            other => DetectionError::Inference(other.to_string()),
        }
    }
}

impl From<ImageError> for DetectionError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::UnsupportedFormat(fmt) => DetectionError::UnsupportedFormat(fmt),
            ImageError::IoError(e) => DetectionError::Io(e),
            other => DetectionError::InvalidImage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_error_conversion() {
        let err: DetectionError = ModelError::LoadFailed {
            id: "xception".to_string(),
            reason: "bad graph".to_string(),
        }
        .into();
        assert!(matches!(err, DetectionError::ModelLoadFailure { .. }));
        assert!(!err.is_fatal());

        let err: DetectionError = ModelError::InferenceFailed {
            id: "xception".to_string(),
            reason: "shape mismatch".to_string(),
        }
        .into();
        assert!(matches!(err, DetectionError::Inference(_)));
    }

    #[test]
    fn test_image_error_conversion() {
        let err: DetectionError = ImageError::UnsupportedFormat("gif".to_string()).into();
        assert!(matches!(err, DetectionError::UnsupportedFormat(_)));

        let err: DetectionError = ImageError::TooSmall {
            width: 8,
            height: 8,
        }
        .into();
        assert!(matches!(err, DetectionError::InvalidImage(_)));
    }
}
