//! Request and response records
//!
//! Responses serialize to camelCase JSON with a `status` tag:
//! `success`, `skipped` (policy skip such as an unsupported format) or
//! `failed`. The heatmap carries its own `success`/`skipped` status.

use authenticity_common::{PipelineStage, RiskLevel};
use authenticity_overlay::OverlayStats;
use authenticity_saliency::{LayerStrategy, MapSource, MethodSelection};
use authenticity_scoring::{ConfidenceReport, Decision, MemberPrediction};
use serde::Serialize;
use std::path::PathBuf;

/// Envelope used when the response itself cannot be serialized
pub const SERIALIZATION_FAILED: &str = r#"{"status":"failed","message":"response serialization failed"}"#;

/// One screening request
#[derive(Debug, Clone)]
pub struct ScreeningRequest {
    pub image: Vec<u8>,
    /// Already-computed fake score (0-100); skips ensemble scoring
    pub fake_score: Option<f64>,
    pub heatmap: bool,
    /// Overrides the configured method
    pub method: Option<MethodSelection>,
    /// Overrides the configured layer list
    pub layers: Option<Vec<String>>,
    pub output_dir: Option<PathBuf>,
    pub file_stem: Option<String>,
}

impl ScreeningRequest {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            fake_score: None,
            heatmap: true,
            method: None,
            layers: None,
            output_dir: None,
            file_stem: None,
        }
    }

    pub fn with_fake_score(mut self, fake_score: f64) -> Self {
        self.fake_score = Some(fake_score);
        self
    }

    pub fn without_heatmap(mut self) -> Self {
        self.heatmap = false;
        self
    }

    pub fn with_method(mut self, method: MethodSelection) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_layers(mut self, layers: Vec<String>) -> Self {
        self.layers = Some(layers);
        self
    }

    pub fn with_output(mut self, dir: impl Into<PathBuf>, stem: impl Into<String>) -> Self {
        self.output_dir = Some(dir.into());
        self.file_stem = Some(stem.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ScreeningResponse {
    Success(Box<DetectionResult>),
    Skipped { message: String },
    Failed { message: String },
}

impl ScreeningResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, ScreeningResponse::Success(_))
    }

    pub fn result(&self) -> Option<&DetectionResult> {
        match self {
            ScreeningResponse::Success(result) => Some(result),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            ScreeningResponse::Success(_) => None,
            ScreeningResponse::Skipped { message } | ScreeningResponse::Failed { message } => Some(message),
        }
    }

    /// Serialized envelope; never fails
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| SERIALIZATION_FAILED.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub fake_score: f64,
    pub confidence_score: f64,
    pub is_deepfake: bool,
    pub risk_level: RiskLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_info: Option<DebugInfo>,
    pub heatmap: HeatmapOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HeatmapOutcome {
    Success(HeatmapReport),
    Skipped { message: String },
}

impl HeatmapOutcome {
    pub fn skipped(message: impl Into<String>) -> Self {
        HeatmapOutcome::Skipped {
            message: message.into(),
        }
    }

    pub fn report(&self) -> Option<&HeatmapReport> {
        match self {
            HeatmapOutcome::Success(report) => Some(report),
            HeatmapOutcome::Skipped { .. } => None,
        }
    }
}

/// Rendered explanation; coverage figures are those of the primary method
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapReport {
    /// Primary overlay, when an artifact sink stored it
    pub path: Option<PathBuf>,
    #[serde(rename = "type")]
    pub kind: MethodSelection,
    pub artifact_coverage_percent: f64,
    pub high_intensity_pixels: u64,
    pub total_pixels: u64,
    pub methods: Vec<MethodReport>,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodReport {
    pub method: String,
    pub source: MapSource,
    pub layers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<LayerStrategy>,
    pub map_height: usize,
    pub map_width: usize,
    pub stats: OverlayStats,
}

/// Method-level trace, recorded in debug mode only
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    /// `ensemble` or `precomputed`
    pub scoring_mode: &'static str,
    pub predictions: Vec<MemberPrediction>,
    pub failed_members: Vec<FailedMember>,
    pub decision: Decision,
    pub confidence: ConfidenceReport,
    /// Layers the primary saliency map was computed from
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub target_layers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer_strategy: Option<LayerStrategy>,
    pub stage_history: Vec<PipelineStage>,
    pub stage_timings: Vec<StageTiming>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMember {
    pub model_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTiming {
    pub stage: PipelineStage,
    pub duration_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_failed_envelope() {
        let json = ScreeningResponse::Failed {
            message: "decode error".to_string(),
        }
        .to_json();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "failed");
        assert_eq!(value["message"], "decode error");
    }

    #[test]
    fn test_success_envelope_shape() {
        let response = ScreeningResponse::Success(Box::new(DetectionResult {
            fake_score: 83.0,
            confidence_score: 71.5,
            is_deepfake: true,
            risk_level: RiskLevel::High,
            debug_info: None,
            heatmap: HeatmapOutcome::skipped("Heatmap not requested"),
        }));
        let value: Value = serde_json::from_str(&response.to_json()).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["fakeScore"], 83.0);
        assert_eq!(value["confidenceScore"], 71.5);
        assert_eq!(value["isDeepfake"], true);
        assert_eq!(value["riskLevel"], "High");
        assert!(value.get("debugInfo").is_none());
        assert_eq!(value["heatmap"]["status"], "skipped");
        assert_eq!(value["heatmap"]["message"], "Heatmap not requested");
    }

    #[test]
    fn test_heatmap_report_fields() {
        let outcome = HeatmapOutcome::Success(HeatmapReport {
            path: Some(PathBuf::from("/tmp/heatmap_gradcam_pp_face.jpg")),
            kind: MethodSelection::Both,
            artifact_coverage_percent: 12.5,
            high_intensity_pixels: 100,
            total_pixels: 800,
            methods: Vec::new(),
            files: vec![PathBuf::from("/tmp/heatmap_gradcam_pp_face.jpg")],
        });
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["type"], "both");
        assert_eq!(value["artifactCoveragePercent"], 12.5);
        assert_eq!(value["highIntensityPixels"], 100);
        assert_eq!(value["totalPixels"], 800);
    }
}
