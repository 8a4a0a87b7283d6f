//! Authenticity Scoring - ensemble probability, confidence and calibration
//!
//! Turns per-member classifier probabilities into a single calibrated fake
//! score with a confidence estimate.

pub mod calibration;
pub mod confidence;
pub mod ensemble;
pub mod postprocess;

use authenticity_common::DetectionError;
use thiserror::Error;

pub use calibration::{apply_temperature, fit_temperature, CalibrationSample};
pub use confidence::{ConfidenceConfig, ConfidenceEstimator, ConfidenceReport, ConfidenceSignals};
pub use ensemble::{base_weights, EnsembleOutcome, EnsembleScorer, MemberPrediction};
pub use postprocess::{Decision, PostProcessConfig, ScorePostProcessor, DEFAULT_THRESHOLD};

#[derive(Error, Debug)]
pub enum ScoringError {
    #[error("No ensemble members to score")]
    NoMembers,

    #[error("Every ensemble member failed: {0}")]
    AllMembersFailed(String),

    #[error("Probability is not finite: {0}")]
    NonFiniteProbability(f64),

    #[error("Calibration needs at least one labeled sample")]
    EmptyCalibrationSet,

    #[error("Failed to build scoring thread pool: {0}")]
    ThreadPool(String),
}

impl From<ScoringError> for DetectionError {
    fn from(err: ScoringError) -> Self {
        match err {
            ScoringError::EmptyCalibrationSet => DetectionError::Config(err.to_string()),
            other => DetectionError::Inference(other.to_string()),
        }
    }
}
