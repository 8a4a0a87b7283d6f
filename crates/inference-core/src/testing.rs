//! Scripted classifier for tests that run without model files

use crate::error::ModelError;
use crate::model::{Classifier, LayerInfo, LayerProbe};
use crate::preprocess::InputSpec;
use ndarray::{Array4, ArrayD};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
enum GradientScript {
    Constant(f32),
    Fail,
}

/// Classifier whose outputs are fixed up front
#[derive(Debug)]
pub struct ScriptedClassifier {
    id: String,
    input_spec: InputSpec,
    probability: f32,
    fail_predict: bool,
    delay: Option<Duration>,
    stochastic: Option<Vec<f32>>,
    stochastic_cursor: AtomicUsize,
    layers: Vec<LayerInfo>,
    probes: HashMap<String, LayerProbe>,
    input_gradient: Option<GradientScript>,
    predict_calls: AtomicUsize,
}

impl ScriptedClassifier {
    pub fn new(id: &str, probability: f32) -> Self {
        Self {
            id: id.to_string(),
            input_spec: InputSpec::default().with_size(32),
            probability,
            fail_predict: false,
            delay: None,
            stochastic: None,
            stochastic_cursor: AtomicUsize::new(0),
            layers: Vec::new(),
            probes: HashMap::new(),
            input_gradient: None,
            predict_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_input_spec(mut self, spec: InputSpec) -> Self {
        self.input_spec = spec;
        self
    }

    /// Every forward pass errors
    pub fn failing(mut self) -> Self {
        self.fail_predict = true;
        self
    }

    /// Sleep before each forward pass and probe
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Stochastic passes cycle through `samples`
    pub fn with_stochastic(mut self, samples: Vec<f32>) -> Self {
        self.stochastic = Some(samples);
        self
    }

    pub fn with_layer(mut self, info: LayerInfo, probe: Option<LayerProbe>) -> Self {
        if let Some(probe) = probe {
            self.probes.insert(info.name.clone(), probe);
        }
        self.layers.push(info);
        self
    }

    /// Input gradient filled with `value`
    pub fn with_input_gradient(mut self, value: f32) -> Self {
        self.input_gradient = Some(GradientScript::Constant(value));
        self
    }

    pub fn with_failing_input_gradient(mut self) -> Self {
        self.input_gradient = Some(GradientScript::Fail);
        self
    }

    pub fn predict_calls(&self) -> usize {
        self.predict_calls.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
    }

    fn scripted_failure(&self, what: &str) -> ModelError {
        ModelError::InferenceFailed {
            id: self.id.clone(),
            reason: format!("scripted {what} failure"),
        }
    }
}

impl Classifier for ScriptedClassifier {
    fn id(&self) -> &str {
        &self.id
    }

    fn input_spec(&self) -> &InputSpec {
        &self.input_spec
    }

    fn predict(&self, _input: &Array4<f32>) -> Result<f32, ModelError> {
        self.predict_calls.fetch_add(1, Ordering::SeqCst);
        self.pause();
        if self.fail_predict {
            return Err(self.scripted_failure("predict"));
        }
        Ok(self.probability)
    }

    fn has_stochastic_path(&self) -> bool {
        self.stochastic.is_some()
    }

    fn predict_stochastic(&self, _input: &Array4<f32>) -> Result<f32, ModelError> {
        match &self.stochastic {
            Some(samples) if !samples.is_empty() => {
                let i = self.stochastic_cursor.fetch_add(1, Ordering::SeqCst);
                Ok(samples[i % samples.len()])
            }
            _ => Err(self.scripted_failure("stochastic")),
        }
    }

    fn layers(&self) -> Vec<LayerInfo> {
        self.layers.clone()
    }

    fn probe_layer(&self, _input: &Array4<f32>, layer: &str) -> Result<LayerProbe, ModelError> {
        self.pause();
        self.probes
            .get(layer)
            .cloned()
            .ok_or_else(|| ModelError::UnknownLayer {
                id: self.id.clone(),
                layer: layer.to_string(),
            })
    }

    fn input_gradient(&self, input: &Array4<f32>) -> Result<Array4<f32>, ModelError> {
        match &self.input_gradient {
            Some(GradientScript::Constant(v)) => Ok(Array4::from_elem(input.raw_dim(), *v)),
            Some(GradientScript::Fail) => Err(self.scripted_failure("gradient")),
            None => Err(ModelError::GradientUnavailable(self.id.clone())),
        }
    }
}

/// Probe with an (H,W,C) activation and optional gradient
pub fn probe(activation: ArrayD<f32>, gradient: Option<ArrayD<f32>>) -> LayerProbe {
    LayerProbe {
        activation,
        gradient,
    }
}
