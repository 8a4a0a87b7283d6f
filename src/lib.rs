//! Authenticity screening: ensemble scoring, confidence estimation and
//! saliency heatmaps for suspected manipulated images.
//!
//! Each pipeline concern lives in its own crate; this package re-exports them.

pub use authenticity_common as common;
pub use authenticity_inference_core as inference;
pub use authenticity_orchestrator as orchestrator;
pub use authenticity_overlay as overlay;
pub use authenticity_saliency as saliency;
pub use authenticity_scoring as scoring;

pub use authenticity_common::{DetectionError, PipelineStage, RiskLevel};
pub use authenticity_inference_core::{Context, ModelConfig, ModelHandle, ModelRegistry};
pub use authenticity_orchestrator::{
    PipelineOrchestrator, ScreeningConfig, ScreeningRequest, ScreeningResponse,
};
