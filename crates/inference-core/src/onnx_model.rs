//! ONNX Runtime backed classifier
//!
//! Graph output conventions:
//! - output 0 is the classification head (`[1,1]` fake probability, or
//!   `[1,K]` class scores where the last class is "fake")
//! - an output named after a manifest layer is that layer's activation
//! - `{layer}__grad` is the gradient of the fake score w.r.t. that activation
//! - `input__grad` is the gradient w.r.t. the input tensor
//!
//! An optional companion graph with dropout kept active backs resampling.

use crate::error::ModelError;
use crate::model::{Classifier, LayerInfo, LayerProbe, ModelConfig};
use crate::onnx_utils::create_session;
use crate::preprocess::InputSpec;
use ndarray::{Array4, ArrayD, IxDyn};
use ort::session::Session;
use ort::value::TensorRef;
use std::sync::Mutex;
use tracing::{debug, info};

const GRAD_SUFFIX: &str = "__grad";
const INPUT_GRAD_OUTPUT: &str = "input__grad";

pub struct OnnxClassifier {
    id: String,
    input_spec: InputSpec,
    /// Session::run requires &mut self
    session: Mutex<Session>,
    output_names: Vec<String>,
    stochastic: Option<Mutex<Session>>,
    layers: Vec<LayerInfo>,
}

impl OnnxClassifier {
    pub fn load(config: &ModelConfig) -> Result<Self, ModelError> {
        info!("Loading classifier '{}' from {}", config.id, config.path.display());

        let session = create_session(&config.path, config.device)?;
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.is_empty() {
            return Err(ModelError::LoadFailed {
                id: config.id.clone(),
                reason: "graph has no outputs".to_string(),
            });
        }

        let stochastic = match &config.stochastic_path {
            Some(path) => {
                debug!("Loading stochastic companion for '{}' from {}", config.id, path.display());
                Some(Mutex::new(create_session(path, config.device)?))
            }
            None => None,
        };

        let layers: Vec<LayerInfo> = config
            .layers
            .iter()
            .filter(|l| output_names.iter().any(|n| n == &l.name))
            .cloned()
            .collect();
        if layers.len() < config.layers.len() {
            debug!(
                "Classifier '{}': {} of {} manifest layers exported as outputs",
                config.id,
                layers.len(),
                config.layers.len()
            );
        }

        Ok(Self {
            id: config.id.clone(),
            input_spec: config.input,
            session: Mutex::new(session),
            output_names,
            stochastic,
            layers,
        })
    }

    fn has_output(&self, name: &str) -> bool {
        self.output_names.iter().any(|n| n == name)
    }

    fn inference_error(&self, reason: impl ToString) -> ModelError {
        ModelError::InferenceFailed {
            id: self.id.clone(),
            reason: reason.to_string(),
        }
    }

    /// Run a session and copy the requested outputs out as owned arrays
    fn run_outputs(
        &self,
        session: &Mutex<Session>,
        input: &Array4<f32>,
        names: &[&str],
    ) -> Result<Vec<Option<ArrayD<f32>>>, ModelError> {
        let mut session = session
            .lock()
            .map_err(|_| ModelError::LockPoisoned(self.id.clone()))?;

        let tensor = TensorRef::from_array_view(input.view()).map_err(|e| self.inference_error(e))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| self.inference_error(e))?;

        names
            .iter()
            .map(|name| {
                let Some(value) = outputs.get(*name) else {
                    return Ok(None);
                };
                let (shape, data) = value
                    .try_extract_tensor::<f32>()
                    .map_err(|e| self.inference_error(format!("Failed to extract '{name}': {e}")))?;
                let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
                ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
                    .map(Some)
                    .map_err(|e| self.inference_error(e))
            })
            .collect()
    }

    fn probability_from(&self, session: &Mutex<Session>, input: &Array4<f32>) -> Result<f32, ModelError> {
        let head = self.output_names[0].as_str();
        let out = self
            .run_outputs(session, input, &[head])?
            .pop()
            .flatten()
            .ok_or_else(|| self.inference_error("classification output missing"))?;
        let shape: Vec<i64> = out.shape().iter().map(|&d| d as i64).collect();
        let data: Vec<f32> = out.iter().copied().collect();
        probability_from_output(&data).ok_or(ModelError::InvalidOutputShape {
            id: self.id.clone(),
            shape,
        })
    }
}

/// Fake probability from a classification head
///
/// A single value outside [0,1] is treated as a logit; multiple values that
/// do not already sum to one are softmaxed. The last class is "fake".
pub fn probability_from_output(data: &[f32]) -> Option<f32> {
    let p = match data {
        [] => return None,
        [single] => {
            if (0.0..=1.0).contains(single) {
                *single
            } else {
                1.0 / (1.0 + (-single).exp())
            }
        }
        classes => {
            let last = *classes.last()?;
            let sum: f32 = classes.iter().sum();
            let is_distribution =
                (sum - 1.0).abs() < 1e-3 && classes.iter().all(|v| (0.0..=1.0).contains(v));
            if is_distribution {
                last
            } else {
                let max = classes.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let denom: f32 = classes.iter().map(|v| (v - max).exp()).sum();
                (last - max).exp() / denom
            }
        }
    };
    p.is_finite().then_some(p.clamp(0.0, 1.0))
}

/// Drop the leading batch axis and move channels last when exported as (C,H,W)
fn to_hwc(array: ArrayD<f32>, channels_first: bool) -> ArrayD<f32> {
    let array = if array.ndim() >= 2 && array.shape()[0] == 1 {
        array.index_axis_move(ndarray::Axis(0), 0)
    } else {
        array
    };
    if channels_first && array.ndim() == 3 {
        array.permuted_axes(IxDyn(&[1, 2, 0])).as_standard_layout().to_owned()
    } else {
        array
    }
}

impl Classifier for OnnxClassifier {
    fn id(&self) -> &str {
        &self.id
    }

    fn input_spec(&self) -> &InputSpec {
        &self.input_spec
    }

    fn predict(&self, input: &Array4<f32>) -> Result<f32, ModelError> {
        self.probability_from(&self.session, input)
    }

    fn has_stochastic_path(&self) -> bool {
        self.stochastic.is_some()
    }

    fn predict_stochastic(&self, input: &Array4<f32>) -> Result<f32, ModelError> {
        let session = self
            .stochastic
            .as_ref()
            .ok_or_else(|| self.inference_error("no stochastic path"))?;
        self.probability_from(session, input)
    }

    fn layers(&self) -> Vec<LayerInfo> {
        self.layers.clone()
    }

    fn probe_layer(&self, input: &Array4<f32>, layer: &str) -> Result<LayerProbe, ModelError> {
        let info = self
            .layers
            .iter()
            .find(|l| l.name == layer)
            .ok_or_else(|| ModelError::UnknownLayer {
                id: self.id.clone(),
                layer: layer.to_string(),
            })?;

        let grad_name = format!("{layer}{GRAD_SUFFIX}");
        let mut outputs = self.run_outputs(&self.session, input, &[layer, grad_name.as_str()])?;
        let gradient = outputs.pop().flatten();
        let activation = outputs.pop().flatten().ok_or_else(|| ModelError::UnknownLayer {
            id: self.id.clone(),
            layer: layer.to_string(),
        })?;

        Ok(LayerProbe {
            activation: to_hwc(activation, info.channels_first),
            gradient: gradient.map(|g| to_hwc(g, info.channels_first)),
        })
    }

    fn input_gradient(&self, input: &Array4<f32>) -> Result<Array4<f32>, ModelError> {
        if !self.has_output(INPUT_GRAD_OUTPUT) {
            return Err(ModelError::GradientUnavailable(self.id.clone()));
        }
        let grad = self
            .run_outputs(&self.session, input, &[INPUT_GRAD_OUTPUT])?
            .pop()
            .flatten()
            .ok_or_else(|| ModelError::GradientUnavailable(self.id.clone()))?;
        grad.into_dimensionality::<ndarray::Ix4>()
            .map_err(|e| self.inference_error(format!("input gradient shape: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_probability_single_output() {
        assert_eq!(probability_from_output(&[0.83]), Some(0.83));
        assert!(probability_from_output(&[-50.0]).unwrap() < 1e-6);
        // out-of-range single values are logits
        assert!((probability_from_output(&[2.0]).unwrap() - 0.880_797).abs() < 1e-4);
    }

    #[test]
    fn test_probability_multiclass_uses_last_class() {
        assert_eq!(probability_from_output(&[0.3, 0.7]), Some(0.7));
        let p = probability_from_output(&[1.0, 1.0]).unwrap();
        assert!((p - 0.5).abs() < 1e-6);
        assert_eq!(probability_from_output(&[]), None);
        assert_eq!(probability_from_output(&[f32::NAN]), None);
    }

    #[test]
    fn test_to_hwc_squeezes_batch_and_moves_channels() {
        let chw = Array3::<f32>::from_shape_fn((4, 2, 3), |(c, _, _)| c as f32).into_dyn();
        let batched = chw.insert_axis(ndarray::Axis(0));
        let hwc = to_hwc(batched, true);
        assert_eq!(hwc.shape(), &[2, 3, 4]);
        assert_eq!(hwc[[1, 2, 3]], 3.0);
    }

    #[test]
    #[ignore = "requires models/xception.onnx"]
    fn test_load_real_model() {
        let config = ModelConfig::new("xception", "models/xception.onnx");
        let classifier = OnnxClassifier::load(&config).unwrap();
        let input = Array4::<f32>::zeros(config.input.shape());
        let p = classifier.predict(&input).unwrap();
        assert!((0.0..=1.0).contains(&p));
    }
}
