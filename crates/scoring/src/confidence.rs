//! Confidence estimation from independent signals
//!
//! Each signal lands roughly in [0,100]. Signals a member cannot provide are
//! left out of the mean; a failed computation switches to a distance-only
//! fallback.

use crate::calibration::{apply_temperature, sigmoid};
use authenticity_inference_core::Classifier;
use ndarray::Array4;
use serde::Serialize;
use tracing::{debug, warn};

pub const MIN_CONFIDENCE: f64 = 10.0;
pub const MAX_CONFIDENCE: f64 = 95.0;
pub const FALLBACK_MIN_CONFIDENCE: f64 = 15.0;

const ENSEMBLE_BOOST: f64 = 1.1;
const EXTREMITY_BOOST: f64 = 1.15;
const EXTREMITY_MARGIN: f64 = 0.3;
const ENTROPY_CLIP: f64 = 0.001;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConfidenceConfig {
    /// Stochastic passes for the resampling signal
    pub resampling_passes: usize,
    pub temperature: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            resampling_passes: 7,
            temperature: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceSignals {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resampling: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entropy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibrated_distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gradient_magnitude: Option<f64>,
}

impl ConfidenceSignals {
    fn values(&self) -> impl Iterator<Item = f64> + '_ {
        [
            self.resampling,
            self.entropy,
            self.calibrated_distance,
            self.gradient_magnitude,
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceReport {
    pub score: f64,
    pub signals: ConfidenceSignals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entropy_bits: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resampling_std: Option<f64>,
    pub ensemble_boost: bool,
    pub extremity_boost: bool,
    pub fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// `100 (1 - min(4 sigma, 1))` over stochastic samples
pub fn resampling_signal(samples: &[f64]) -> Option<(f64, f64)> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    Some((100.0 * (1.0 - (4.0 * std).min(1.0)), std))
}

/// Returns `(signal, H)` with `H` the binary entropy in bits
pub fn entropy_signal(p: f64) -> (f64, f64) {
    let p = p.clamp(ENTROPY_CLIP, 1.0 - ENTROPY_CLIP);
    let h = -(p * p.log2() + (1.0 - p) * (1.0 - p).log2());
    (100.0 * (1.0 - h), h)
}

pub fn calibrated_distance_signal(p: f64, temperature: f64) -> f64 {
    let p = apply_temperature(p, temperature);
    let d = (p - 0.5).abs();
    100.0 * sigmoid(8.0 * (d - 0.25))
}

/// Mean absolute input gradient, scaled by 1000 and capped at 100
pub fn gradient_signal(gradient: &Array4<f32>) -> Option<f64> {
    if gradient.is_empty() {
        return None;
    }
    let mean = gradient.iter().map(|g| f64::from(g.abs())).sum::<f64>() / gradient.len() as f64;
    Some((mean * 1000.0).min(100.0))
}

/// `clamp(|p - 0.5| * 200, 15, 95)`
pub fn fallback_confidence(p: f64) -> f64 {
    let p = if p.is_finite() { p } else { 0.5 };
    ((p - 0.5).abs() * 200.0).clamp(FALLBACK_MIN_CONFIDENCE, MAX_CONFIDENCE)
}

pub struct ConfidenceEstimator {
    config: ConfidenceConfig,
}

impl ConfidenceEstimator {
    pub fn new(config: ConfidenceConfig) -> Self {
        Self { config }
    }

    /// Estimate confidence for ensemble probability `p`
    ///
    /// `primary` is the highest-weight member and its prepared input; `None`
    /// (pre-computed score) restricts the estimate to probability-only signals.
    pub fn estimate(
        &self,
        p: f64,
        contributors: usize,
        primary: Option<(&dyn Classifier, &Array4<f32>)>,
    ) -> ConfidenceReport {
        match self.collect_signals(p, primary) {
            Ok((signals, entropy_bits, resampling_std)) => {
                let mean_signal = {
                    let values: Vec<f64> = signals.values().collect();
                    values.iter().sum::<f64>() / values.len() as f64
                };
                let ensemble_boost = contributors > 1;
                let extremity_boost = (p - 0.5).abs() > EXTREMITY_MARGIN;

                let mut score = mean_signal.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE);
                if ensemble_boost {
                    score = (score * ENSEMBLE_BOOST).min(MAX_CONFIDENCE);
                }
                if extremity_boost {
                    score = (score * EXTREMITY_BOOST).min(MAX_CONFIDENCE);
                }
                debug!("Confidence {:.2} from signals {:?}", score, signals);

                ConfidenceReport {
                    score,
                    signals,
                    entropy_bits: Some(entropy_bits),
                    resampling_std,
                    ensemble_boost,
                    extremity_boost,
                    fallback: false,
                    fallback_reason: None,
                }
            }
            Err(reason) => {
                warn!("Confidence estimation fell back: {}", reason);
                ConfidenceReport {
                    score: fallback_confidence(p),
                    signals: ConfidenceSignals::default(),
                    entropy_bits: None,
                    resampling_std: None,
                    ensemble_boost: false,
                    extremity_boost: false,
                    fallback: true,
                    fallback_reason: Some(reason),
                }
            }
        }
    }

    fn collect_signals(
        &self,
        p: f64,
        primary: Option<(&dyn Classifier, &Array4<f32>)>,
    ) -> Result<(ConfidenceSignals, f64, Option<f64>), String> {
        if !p.is_finite() {
            return Err(format!("probability is not finite: {p}"));
        }

        let mut signals = ConfidenceSignals::default();
        let mut resampling_std = None;

        if let Some((classifier, input)) = primary {
            if classifier.has_stochastic_path() && self.config.resampling_passes > 0 {
                let samples = (0..self.config.resampling_passes)
                    .map(|_| classifier.predict_stochastic(input).map(f64::from))
                    .collect::<Result<Vec<f64>, _>>()
                    .map_err(|e| format!("resampling failed: {e}"))?;
                if let Some((signal, std)) = resampling_signal(&samples) {
                    signals.resampling = Some(signal);
                    resampling_std = Some(std);
                }
            }

            match classifier.input_gradient(input) {
                Ok(gradient) => signals.gradient_magnitude = gradient_signal(&gradient),
                Err(e) => debug!("Gradient signal omitted: {}", e),
            }
        }

        let (entropy, entropy_bits) = entropy_signal(p);
        signals.entropy = Some(entropy);
        signals.calibrated_distance = Some(calibrated_distance_signal(p, self.config.temperature));

        if let Some(bad) = signals.values().find(|v| !v.is_finite()) {
            return Err(format!("non-finite signal {bad}"));
        }
        Ok((signals, entropy_bits, resampling_std))
    }
}
