//! Score calibration, borderline smoothing and the deepfake decision

use crate::calibration::apply_temperature;
use crate::ScoringError;
use authenticity_common::{round_to, RiskLevel};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Decision threshold on the calibrated probability
pub const DEFAULT_THRESHOLD: f64 = 0.52;

const BORDERLINE_MARGIN: f64 = 0.1;
const BORDERLINE_NUDGE: f64 = 0.05;
const BORDERLINE_HIGH_CAP: f64 = 0.65;
const BORDERLINE_LOW_CAP: f64 = 0.35;
const CLAMP_LOW: f64 = 0.05;
const CLAMP_HIGH: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    pub temperature: f64,
    pub threshold: f64,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub raw_probability: f64,
    pub probability: f64,
    /// `probability * 100`, two decimals
    pub fake_score: f64,
    pub is_deepfake: bool,
    pub risk_level: RiskLevel,
    pub temperature_applied: bool,
    pub borderline_adjusted: bool,
}

pub struct ScorePostProcessor {
    config: PostProcessConfig,
}

impl ScorePostProcessor {
    pub fn new(config: PostProcessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PostProcessConfig {
        &self.config
    }

    /// Temperature, borderline nudge, clamp, then compress the extremes
    pub fn calibrate(&self, p: f64) -> Result<(f64, bool, bool), ScoringError> {
        if !p.is_finite() {
            return Err(ScoringError::NonFiniteProbability(p));
        }

        let temperature_applied = (self.config.temperature - 1.0).abs() > f64::EPSILON;
        let mut p = apply_temperature(p.clamp(0.0, 1.0), self.config.temperature);

        let borderline = (p - 0.5).abs() < BORDERLINE_MARGIN;
        if borderline {
            p = if p > 0.5 {
                (p + BORDERLINE_NUDGE).min(BORDERLINE_HIGH_CAP)
            } else {
                (p - BORDERLINE_NUDGE).max(BORDERLINE_LOW_CAP)
            };
        }

        p = p.clamp(CLAMP_LOW, CLAMP_HIGH);

        if p > 0.9 {
            p = 0.85 + (p - 0.9) * 0.5;
        } else if p < 0.1 {
            p = 0.15 - (0.1 - p) * 0.5;
        }

        Ok((p, temperature_applied, borderline))
    }

    /// Calibrate `raw` and apply the decision threshold
    pub fn decide(&self, raw: f64) -> Result<Decision, ScoringError> {
        let (probability, temperature_applied, borderline_adjusted) = self.calibrate(raw)?;
        Ok(self.decision(raw, probability, temperature_applied, borderline_adjusted))
    }

    /// Decision for a score that is already calibrated (pre-computed input)
    pub fn decide_precomputed(&self, fake_score: f64) -> Result<Decision, ScoringError> {
        if !fake_score.is_finite() {
            return Err(ScoringError::NonFiniteProbability(fake_score));
        }
        let probability = (fake_score / 100.0).clamp(0.0, 1.0);
        Ok(self.decision(probability, probability, false, false))
    }

    fn decision(
        &self,
        raw: f64,
        probability: f64,
        temperature_applied: bool,
        borderline_adjusted: bool,
    ) -> Decision {
        let fake_score = round_to(probability * 100.0, 2);
        let is_deepfake = fake_score > self.config.threshold * 100.0;
        debug!(
            "Raw {:.4} -> calibrated {:.4}, fakeScore {:.2}, deepfake={}",
            raw, probability, fake_score, is_deepfake
        );
        Decision {
            raw_probability: raw,
            probability,
            fake_score,
            is_deepfake,
            risk_level: RiskLevel::from_fake_score(fake_score),
            temperature_applied,
            borderline_adjusted,
        }
    }
}

impl Default for ScorePostProcessor {
    fn default() -> Self {
        Self::new(PostProcessConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_confident_single_score_unchanged() {
        let d = ScorePostProcessor::default()
            .decide(f64::from(0.83_f32))
            .unwrap();
        assert_eq!(d.fake_score, 83.0);
        assert!(d.is_deepfake);
        assert_eq!(d.risk_level, RiskLevel::High);
        assert!(!d.borderline_adjusted);
    }

    #[test]
    fn test_borderline_nudged_up() {
        let d = ScorePostProcessor::default().decide(0.53).unwrap();
        assert!((d.probability - 0.58).abs() < 1e-9);
        assert_eq!(d.fake_score, 58.0);
        assert!(d.borderline_adjusted);
        assert!(d.is_deepfake);
    }

    #[test]
    fn test_borderline_nudged_down_with_cap() {
        let pp = ScorePostProcessor::default();
        let (p, _, _) = pp.calibrate(0.42).unwrap();
        assert!((p - 0.37).abs() < 1e-9);
        let (p, _, _) = pp.calibrate(0.5).unwrap();
        assert!((p - 0.45).abs() < 1e-9);
        let (p, _, _) = pp.calibrate(0.599).unwrap();
        assert!((p - 0.649).abs() < 1e-9);
    }

    #[test]
    fn test_extremes_compressed() {
        let pp = ScorePostProcessor::default();
        let (p, _, _) = pp.calibrate(1.0).unwrap();
        assert!((p - 0.875).abs() < 1e-9);
        let (p, _, _) = pp.calibrate(0.0).unwrap();
        assert!((p - 0.125).abs() < 1e-9);
        let (p, _, _) = pp.calibrate(0.92).unwrap();
        assert!((p - 0.86).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_boundary() {
        let pp = ScorePostProcessor::default();
        let d = pp.decide_precomputed(52.0).unwrap();
        assert!(!d.is_deepfake);
        let d = pp.decide_precomputed(52.01).unwrap();
        assert!(d.is_deepfake);
    }

    #[test]
    fn test_temperature_applied_first() {
        let pp = ScorePostProcessor::new(PostProcessConfig {
            temperature: 2.0,
            threshold: DEFAULT_THRESHOLD,
        });
        let (p, applied, _) = pp.calibrate(0.8).unwrap();
        assert!(applied);
        // sigmoid(ln 4 / 2) = 2/3
        assert!((p - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_non_finite_rejected() {
        let pp = ScorePostProcessor::default();
        assert!(matches!(
            pp.decide(f64::NAN),
            Err(ScoringError::NonFiniteProbability(_))
        ));
    }

    #[test]
    fn test_fake_score_range() {
        proptest!(|(p in 0.0f64..=1.0, temperature in 0.1f64..10.0)| {
            let pp = ScorePostProcessor::new(PostProcessConfig {
                temperature,
                ..PostProcessConfig::default()
            });
            let d = pp.decide(p).unwrap();
            // clamp then compression bound the calibrated score to [12.5, 87.5]
            prop_assert!((12.5 - 1e-9..=87.5 + 1e-9).contains(&d.fake_score), "p={} score={}", p, d.fake_score);
            prop_assert_eq!(d.is_deepfake, d.fake_score > DEFAULT_THRESHOLD * 100.0);
        });
    }
}
