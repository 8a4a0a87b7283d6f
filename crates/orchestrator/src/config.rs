//! YAML screening configuration
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```yaml
//! models:
//!   - id: xception_advanced
//!     path: models/xception_advanced.onnx
//!     input: { size: 299, layout: nhwc }
//! scoring:
//!   threshold: 0.52
//!   temperature: 1.5
//! explain:
//!   method: both
//!   timeout_ms: 120000
//! ```

use authenticity_common::DetectionError;
use authenticity_inference_core::ModelConfig;
use authenticity_overlay::{OverlayConfig, OverlayStyle};
use authenticity_saliency::MethodSelection;
use authenticity_scoring::{ConfidenceConfig, PostProcessConfig, DEFAULT_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreeningConfig {
    pub models: Vec<ModelConfig>,
    pub scoring: ScoringSettings,
    pub explain: ExplainSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringSettings {
    pub threshold: f64,
    pub temperature: f64,
    pub resampling_passes: usize,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            temperature: 1.0,
            resampling_passes: 7,
        }
    }
}

impl ScoringSettings {
    pub fn post_process(&self) -> PostProcessConfig {
        PostProcessConfig {
            temperature: self.temperature,
            threshold: self.threshold,
        }
    }

    pub fn confidence(&self) -> ConfidenceConfig {
        ConfidenceConfig {
            resampling_passes: self.resampling_passes,
            temperature: self.temperature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplainSettings {
    /// Heatmaps are generated only above this fake score
    pub min_score: f64,
    pub method: MethodSelection,
    pub timeout_ms: u64,
    pub cleanup: bool,
    pub legend: bool,
    pub styles: Vec<OverlayStyle>,
    /// Explicit layers for multi-layer analysis; empty means auto-select
    pub layers: Vec<String>,
    pub jpeg_quality: u8,
}

impl Default for ExplainSettings {
    fn default() -> Self {
        Self {
            min_score: 30.0,
            method: MethodSelection::Both,
            timeout_ms: 120_000,
            cleanup: true,
            legend: true,
            styles: OverlayStyle::ALL.to_vec(),
            layers: Vec::new(),
            jpeg_quality: 90,
        }
    }
}

impl ExplainSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn overlay(&self) -> OverlayConfig {
        OverlayConfig {
            cleanup: self.cleanup,
            styles: self.styles.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub scoring_timeout_ms: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scoring_timeout_ms: 60_000,
        }
    }
}

impl PipelineSettings {
    pub fn scoring_timeout(&self) -> Duration {
        Duration::from_millis(self.scoring_timeout_ms)
    }
}

impl ScreeningConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DetectionError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| DetectionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DetectionError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DetectionError::Config(format!("{}: {e}", path.display())))?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), DetectionError> {
        let scoring = &self.scoring;
        if !(scoring.threshold > 0.0 && scoring.threshold < 1.0) {
            return Err(DetectionError::Config(format!(
                "scoring.threshold must be in (0, 1), got {}",
                scoring.threshold
            )));
        }
        if !(scoring.temperature.is_finite() && scoring.temperature > 0.0) {
            return Err(DetectionError::Config(format!(
                "scoring.temperature must be positive, got {}",
                scoring.temperature
            )));
        }
        if !(0.0..=100.0).contains(&self.explain.min_score) {
            return Err(DetectionError::Config(format!(
                "explain.min_score must be in [0, 100], got {}",
                self.explain.min_score
            )));
        }
        if self.explain.timeout_ms == 0 || self.pipeline.scoring_timeout_ms == 0 {
            return Err(DetectionError::Config("stage timeouts must be non-zero".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for model in &self.models {
            if !seen.insert(model.id.as_str()) {
                return Err(DetectionError::Config(format!("duplicate model id '{}'", model.id)));
            }
            if let Some(weight) = model.weight {
                if !(weight.is_finite() && weight > 0.0) {
                    return Err(DetectionError::Config(format!(
                        "model '{}' has invalid weight {weight}",
                        model.id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = ScreeningConfig::from_yaml_str("{}").unwrap();
        assert!(config.models.is_empty());
        assert_eq!(config.scoring.threshold, 0.52);
        assert_eq!(config.scoring.resampling_passes, 7);
        assert_eq!(config.explain.min_score, 30.0);
        assert_eq!(config.explain.method, MethodSelection::Both);
        assert_eq!(config.explain.styles.len(), 4);
        assert_eq!(config.pipeline.scoring_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_document() {
        let yaml = r#"
models:
  - id: xception_advanced
    path: models/xception_advanced.onnx
    weight: 2.0
  - id: efficientnet
    path: models/efficientnet.onnx
scoring:
  temperature: 1.5
explain:
  method: gradcam++
  timeout_ms: 500
  styles: [standard, contour]
"#;
        let config = ScreeningConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.models[0].weight, Some(2.0));
        assert_eq!(config.scoring.temperature, 1.5);
        assert_eq!(config.scoring.threshold, 0.52);
        assert_eq!(config.explain.method, MethodSelection::GradCamPlusPlus);
        assert_eq!(config.explain.timeout(), Duration::from_millis(500));
        assert_eq!(
            config.explain.overlay().styles,
            vec![OverlayStyle::Standard, OverlayStyle::Contour]
        );
        assert!(config.explain.legend);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(ScreeningConfig::from_yaml_str("scoring: { threshold: 1.5 }").is_err());
        assert!(ScreeningConfig::from_yaml_str("scoring: { temperature: 0 }").is_err());
        assert!(ScreeningConfig::from_yaml_str("explain: { timeout_ms: 0 }").is_err());
        assert!(ScreeningConfig::from_yaml_str("explain: { method: sobel }").is_err());

        let duplicate = r#"
models:
  - { id: a, path: a.onnx }
  - { id: a, path: b.onnx }
"#;
        let err = ScreeningConfig::from_yaml_str(duplicate).unwrap_err();
        assert!(err.to_string().contains("duplicate model id"));
    }
}
