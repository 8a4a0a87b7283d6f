//! Classifier seam and ensemble member handles
//!
//! Everything downstream of the registry talks to models through
//! [`Classifier`]. The ONNX Runtime implementation lives in
//! [`crate::onnx_model`]; tests use `testing::ScriptedClassifier`.

use crate::error::ModelError;
use crate::preprocess::InputSpec;
use ndarray::{Array4, ArrayD};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Tag that earns a member the dominant ensemble weight
pub const ADVANCED_TAG: &str = "advanced";

/// File-stem markers that imply the `advanced` tag when none are configured
const ADVANCED_NAME_MARKERS: [&str; 2] = ["advanced", "avansat"];

/// Compute device a member runs on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    /// Accelerator ordinal (CUDA device id, or the Apple Neural Engine for 0)
    Accelerator(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Accelerator(n) => write!(f, "accelerator:{n}"),
        }
    }
}

/// Coarse layer type, as declared in the model's layer manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Conv2d,
    DepthwiseConv2d,
    Pooling,
    GlobalPooling,
    Normalization,
    Activation,
    Dense,
    Dropout,
    Flatten,
    Other,
}

impl LayerKind {
    /// Layers whose output has no spatial structure left
    pub fn is_head(self) -> bool {
        matches!(
            self,
            LayerKind::Dense | LayerKind::Dropout | LayerKind::Flatten | LayerKind::GlobalPooling
        )
    }
}

/// One probe-able layer of a classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    pub name: String,
    pub kind: LayerKind,
    /// Rank of the layer output including the batch axis
    #[serde(default)]
    pub output_rank: Option<usize>,
    #[serde(default)]
    pub output_shape: Option<Vec<usize>>,
    /// Activation exported as (C,H,W) rather than (H,W,C)
    #[serde(default)]
    pub channels_first: bool,
}

impl LayerInfo {
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            output_rank: None,
            output_shape: None,
            channels_first: false,
        }
    }

    pub fn with_shape(mut self, shape: Vec<usize>) -> Self {
        self.output_rank = Some(shape.len());
        self.output_shape = Some(shape);
        self
    }
}

/// Activation of a probed layer with batch axis removed, usually (H,W,C),
/// plus the gradient of the fake-class output with respect to it when the
/// model exports one
#[derive(Debug, Clone)]
pub struct LayerProbe {
    pub activation: ArrayD<f32>,
    pub gradient: Option<ArrayD<f32>>,
}

/// Image classifier producing a fake probability
pub trait Classifier: Send + Sync {
    fn id(&self) -> &str;

    fn input_spec(&self) -> &InputSpec;

    /// Deterministic forward pass, probability of the fake class in [0,1]
    fn predict(&self, input: &Array4<f32>) -> Result<f32, ModelError>;

    /// Whether [`Classifier::predict_stochastic`] is backed by a dropout-active path
    fn has_stochastic_path(&self) -> bool {
        false
    }

    /// One forward pass with dropout active
    fn predict_stochastic(&self, _input: &Array4<f32>) -> Result<f32, ModelError> {
        Err(ModelError::InferenceFailed {
            id: self.id().to_string(),
            reason: "no stochastic path".to_string(),
        })
    }

    /// Probe-able layers in network order
    fn layers(&self) -> Vec<LayerInfo> {
        Vec::new()
    }

    fn probe_layer(&self, _input: &Array4<f32>, layer: &str) -> Result<LayerProbe, ModelError> {
        Err(ModelError::UnknownLayer {
            id: self.id().to_string(),
            layer: layer.to_string(),
        })
    }

    /// Gradient of the mean prediction with respect to the input tensor
    fn input_gradient(&self, _input: &Array4<f32>) -> Result<Array4<f32>, ModelError> {
        Err(ModelError::GradientUnavailable(self.id().to_string()))
    }
}

/// Configuration of one ensemble candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub path: PathBuf,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Explicit relative weight, overrides the tag-derived base weight
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub input: InputSpec,
    #[serde(default)]
    pub device: Device,
    /// Companion graph with dropout kept active, used for resampling
    #[serde(default)]
    pub stochastic_path: Option<PathBuf>,
    #[serde(default)]
    pub layers: Vec<LayerInfo>,
}

impl ModelConfig {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            tags: Vec::new(),
            weight: None,
            input: InputSpec::default(),
            device: Device::Cpu,
            stochastic_path: None,
            layers: Vec::new(),
        }
    }

    /// Configured tags, or tags implied by the file name when none are set
    pub fn effective_tags(&self) -> Vec<String> {
        if !self.tags.is_empty() {
            return self.tags.clone();
        }
        if name_implies_advanced(&self.path) {
            vec![ADVANCED_TAG.to_string()]
        } else {
            Vec::new()
        }
    }
}

fn name_implies_advanced(path: &Path) -> bool {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    ADVANCED_NAME_MARKERS.iter().any(|m| stem.contains(m))
}

/// A loaded ensemble member, shared read-only after load
#[derive(Clone)]
pub struct ModelHandle {
    pub id: String,
    pub tags: Vec<String>,
    pub weight_override: Option<f64>,
    pub device: Device,
    pub classifier: Arc<dyn Classifier>,
}

impl ModelHandle {
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            id: classifier.id().to_string(),
            tags: Vec::new(),
            weight_override: None,
            device: Device::Cpu,
            classifier,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight_override = Some(weight);
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn is_advanced(&self) -> bool {
        self.tags.iter().any(|t| t == ADVANCED_TAG)
    }

    pub fn input_spec(&self) -> &InputSpec {
        self.classifier.input_spec()
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("id", &self.id)
            .field("tags", &self.tags)
            .field("weight_override", &self.weight_override)
            .field("device", &self.device)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_derived_tags() {
        let cfg = ModelConfig::new("m1", "models/xception_avansat.onnx");
        assert_eq!(cfg.effective_tags(), vec!["advanced".to_string()]);

        let cfg = ModelConfig::new("m2", "models/Advanced-Detector.onnx");
        assert_eq!(cfg.effective_tags(), vec!["advanced".to_string()]);

        let cfg = ModelConfig::new("m3", "models/xception_basic.onnx");
        assert!(cfg.effective_tags().is_empty());
    }

    #[test]
    fn test_configured_tags_win() {
        let mut cfg = ModelConfig::new("m1", "models/xception_advanced.onnx");
        cfg.tags = vec!["baseline".to_string()];
        assert_eq!(cfg.effective_tags(), vec!["baseline".to_string()]);
    }

    #[test]
    fn test_head_layers() {
        assert!(LayerKind::Dense.is_head());
        assert!(LayerKind::GlobalPooling.is_head());
        assert!(!LayerKind::Conv2d.is_head());
        assert!(!LayerKind::Activation.is_head());
    }

    #[test]
    fn test_model_config_yaml_defaults() {
        let yaml = r#"
id: xception
path: models/xception.onnx
layers:
  - name: block14_sepconv2_act
    kind: activation
    output_rank: 4
"#;
        let cfg: ModelConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.device, Device::Cpu);
        assert_eq!(cfg.input.size, 299);
        assert!(cfg.weight.is_none());
        assert_eq!(cfg.layers[0].kind, LayerKind::Activation);
        assert_eq!(cfg.layers[0].output_rank, Some(4));
    }

    #[test]
    fn test_device_yaml() {
        let d: Device = serde_yaml::from_str("accelerator: 1").unwrap();
        assert_eq!(d, Device::Accelerator(1));
        assert_eq!(d.to_string(), "accelerator:1");
    }
}
