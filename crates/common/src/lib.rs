/// Common types and utilities for authenticity screening
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Screening errors
///
/// `NoSuitableLayer`, `GradientUnavailable`, `ModelLoadFailure` and an
/// explanation-stage `Timeout` are absorbed by a fallback one level up; see
/// [`DetectionError::is_fatal`].
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to load model '{id}': {reason}")]
    ModelLoadFailure { id: String, reason: String },

    #[error("All {attempted} candidate models failed to load")]
    AllModelsFailed { attempted: usize },

    #[error("No suitable layer found for saliency")]
    NoSuitableLayer,

    #[error("Gradient unavailable: {0}")]
    GradientUnavailable(String),

    #[error("{stage} timed out after {}ms", .after.as_millis())]
    Timeout { stage: PipelineStage, after: Duration },

    #[error("Cancelled during {stage}")]
    Cancelled { stage: PipelineStage },

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<image::ImageError> for DetectionError {
    fn from(err: image::ImageError) -> Self {
        DetectionError::InvalidImage(err.to_string())
    }
}

impl DetectionError {
    /// Whether the error ends the request (no score can be produced)
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidImage(_)
            | Self::AllModelsFailed { .. }
            | Self::Inference(_)
            | Self::Config(_)
            | Self::Serialization(_)
            | Self::Io(_)
            | Self::Cancelled { .. } => true,
            Self::Timeout { stage, .. } => *stage != PipelineStage::Explaining,
            Self::UnsupportedFormat(_)
            | Self::ModelLoadFailure { .. }
            | Self::NoSuitableLayer
            | Self::GradientUnavailable(_) => false,
        }
    }
}

/// Result type for screening operations
pub type Result<T> = std::result::Result<T, DetectionError>;

/// Pipeline stage, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    Preprocessing,
    Scoring,
    Calibrating,
    Decided,
    Explaining,
    Done,
}

impl PipelineStage {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Preprocessing => "preprocessing",
            Self::Scoring => "scoring",
            Self::Calibrating => "calibrating",
            Self::Decided => "decided",
            Self::Explaining => "explaining",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coarse risk bucket derived from the fake score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// `>= 70` is High, `>= 40` is Medium
    #[must_use]
    pub fn from_fake_score(fake_score: f64) -> Self {
        if fake_score >= 70.0 {
            Self::High
        } else if fake_score >= 40.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Round to a fixed number of decimals (scores are reported with two)
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(DetectionError::InvalidImage("corrupt".into()).is_fatal());
        assert!(DetectionError::AllModelsFailed { attempted: 2 }.is_fatal());
        assert!(!DetectionError::NoSuitableLayer.is_fatal());
        assert!(!DetectionError::GradientUnavailable("none".into()).is_fatal());

        let explain_timeout = DetectionError::Timeout {
            stage: PipelineStage::Explaining,
            after: Duration::from_secs(1),
        };
        assert!(!explain_timeout.is_fatal());

        let scoring_timeout = DetectionError::Timeout {
            stage: PipelineStage::Scoring,
            after: Duration::from_secs(1),
        };
        assert!(scoring_timeout.is_fatal());
    }

    #[test]
    fn test_timeout_display() {
        let err = DetectionError::Timeout {
            stage: PipelineStage::Explaining,
            after: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "explaining timed out after 1500ms");
    }

    #[test]
    fn test_risk_level_buckets() {
        assert_eq!(RiskLevel::from_fake_score(83.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_fake_score(70.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_fake_score(55.5), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_fake_score(12.0), RiskLevel::Low);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(82.999_998_3, 2), 83.0);
        assert_eq!(round_to(12.345_6, 2), 12.35);
    }
}
