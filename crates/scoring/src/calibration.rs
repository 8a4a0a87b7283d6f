//! Temperature scaling
//!
//! `T` is fitted by minimizing binary negative log-likelihood over
//! `[0.1, 10]` with a bounded golden-section search.

use crate::ScoringError;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const MIN_TEMPERATURE: f64 = 0.1;
pub const MAX_TEMPERATURE: f64 = 10.0;

const LOGIT_EPS: f64 = 1e-8;
const SEARCH_TOLERANCE: f64 = 1e-5;
const MAX_ITERATIONS: usize = 200;

/// Labeled validation prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub probability: f64,
    /// `true` for a known fake
    pub label: bool,
}

#[inline]
fn logit(p: f64) -> f64 {
    (p.max(LOGIT_EPS) / (1.0 - p + LOGIT_EPS)).ln()
}

#[inline]
pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// `sigmoid(logit(p) / T)`; identity for `T == 1`
pub fn apply_temperature(p: f64, temperature: f64) -> f64 {
    if (temperature - 1.0).abs() < f64::EPSILON || temperature <= 0.0 {
        return p;
    }
    sigmoid(logit(p) / temperature)
}

fn negative_log_likelihood(samples: &[CalibrationSample], temperature: f64) -> f64 {
    samples
        .iter()
        .map(|s| {
            let q = sigmoid(logit(s.probability) / temperature);
            if s.label {
                -(q + LOGIT_EPS).ln()
            } else {
                -(1.0 - q + LOGIT_EPS).ln()
            }
        })
        .sum()
}

/// Fit the temperature that best calibrates `samples`
pub fn fit_temperature(samples: &[CalibrationSample]) -> Result<f64, ScoringError> {
    if samples.is_empty() {
        return Err(ScoringError::EmptyCalibrationSet);
    }

    let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
    let (mut a, mut b) = (MIN_TEMPERATURE, MAX_TEMPERATURE);
    let mut c = b - inv_phi * (b - a);
    let mut d = a + inv_phi * (b - a);
    let mut fc = negative_log_likelihood(samples, c);
    let mut fd = negative_log_likelihood(samples, d);

    for _ in 0..MAX_ITERATIONS {
        if (b - a).abs() < SEARCH_TOLERANCE {
            break;
        }
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - inv_phi * (b - a);
            fc = negative_log_likelihood(samples, c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + inv_phi * (b - a);
            fd = negative_log_likelihood(samples, d);
        }
    }

    let temperature = ((a + b) / 2.0).clamp(MIN_TEMPERATURE, MAX_TEMPERATURE);
    info!(
        "Fitted temperature {:.3} on {} samples (nll {:.4})",
        temperature,
        samples.len(),
        negative_log_likelihood(samples, temperature)
    );
    Ok(temperature)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(probability: f64, label: bool) -> CalibrationSample {
        CalibrationSample { probability, label }
    }

    #[test]
    fn test_identity_temperature() {
        assert_eq!(apply_temperature(0.73, 1.0), 0.73);
    }

    #[test]
    fn test_temperature_softens_and_sharpens() {
        assert!(apply_temperature(0.9, 2.0) < 0.9);
        assert!(apply_temperature(0.9, 2.0) > 0.5);
        assert!(apply_temperature(0.9, 0.5) > 0.9);
        assert!((apply_temperature(0.5, 3.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_overconfident_model_gets_high_temperature() {
        // confident predictions that are wrong 30% of the time
        let mut samples = Vec::new();
        for i in 0..100 {
            samples.push(sample(0.99, i % 10 < 7));
            samples.push(sample(0.01, i % 10 >= 7));
        }
        let t = fit_temperature(&samples).unwrap();
        assert!(t > 1.5, "expected softening, got {t}");
    }

    #[test]
    fn test_underconfident_model_gets_low_temperature() {
        let mut samples = Vec::new();
        for _ in 0..50 {
            samples.push(sample(0.6, true));
            samples.push(sample(0.4, false));
        }
        let t = fit_temperature(&samples).unwrap();
        assert!(t < 1.0, "expected sharpening, got {t}");
        assert!(t >= MIN_TEMPERATURE);
    }

    #[test]
    fn test_empty_set_rejected() {
        assert!(matches!(
            fit_temperature(&[]),
            Err(ScoringError::EmptyCalibrationSet)
        ));
    }
}
