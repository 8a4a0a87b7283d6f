//! Weighted ensemble of classifier members
//!
//! Members tagged `advanced` start at weight 0.7, the rest share 0.3 equally,
//! and a configured weight replaces the base. Weights are renormalized over
//! the members that actually produced a prediction on this call.

use crate::ScoringError;
use authenticity_inference_core::{Device, InputSpec, ModelHandle};
use ndarray::Array4;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, warn};

pub const ADVANCED_BASE_WEIGHT: f64 = 0.7;
pub const SHARED_BASE_WEIGHT: f64 = 0.3;

/// One member's contribution to an ensemble score
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPrediction {
    pub model_id: String,
    pub probability: f64,
    pub weight: f64,
    pub latency_ms: f64,
    pub advanced: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsembleOutcome {
    /// Weighted probability in [0,1]
    pub probability: f64,
    pub predictions: Vec<MemberPrediction>,
    /// Members excluded on this call, with the reason
    pub failed: Vec<(String, String)>,
}

impl EnsembleOutcome {
    pub fn contributors(&self) -> usize {
        self.predictions.len()
    }

    /// Id of the highest-weight contributor (first on ties)
    pub fn primary_id(&self) -> Option<&str> {
        self.predictions
            .iter()
            .fold(None::<&MemberPrediction>, |best, p| match best {
                Some(b) if b.weight >= p.weight => Some(b),
                _ => Some(p),
            })
            .map(|p| p.model_id.as_str())
    }
}

/// Base weights for `members`, renormalized to sum to one
pub fn base_weights(members: &[&ModelHandle]) -> Vec<f64> {
    if members.is_empty() {
        return Vec::new();
    }
    let others = members.iter().filter(|m| !m.is_advanced()).count();
    let raw: Vec<f64> = members
        .iter()
        .map(|m| match m.weight_override {
            Some(w) if w.is_finite() => w.max(0.0),
            _ if m.is_advanced() => ADVANCED_BASE_WEIGHT,
            _ => SHARED_BASE_WEIGHT / others as f64,
        })
        .collect();

    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        return vec![1.0 / members.len() as f64; members.len()];
    }
    raw.into_iter().map(|w| w / total).collect()
}

/// Runs every member's forward pass and combines the results
pub struct EnsembleScorer {
    members: Vec<Arc<ModelHandle>>,
    pool: rayon::ThreadPool,
    /// Passes on the same accelerator are serialized
    device_locks: HashMap<usize, Mutex<()>>,
}

impl EnsembleScorer {
    pub fn new(members: Vec<Arc<ModelHandle>>) -> Result<Self, ScoringError> {
        if members.is_empty() {
            return Err(ScoringError::NoMembers);
        }

        let device_locks: HashMap<usize, Mutex<()>> = members
            .iter()
            .filter_map(|m| match m.device {
                Device::Accelerator(n) => Some((n, Mutex::new(()))),
                Device::Cpu => None,
            })
            .collect();

        let compute_devices = num_cpus::get() + device_locks.len();
        let threads = members.len().min(compute_devices).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("ensemble-{i}"))
            .build()
            .map_err(|e| ScoringError::ThreadPool(e.to_string()))?;

        debug!(
            "Ensemble scorer: {} members, {} threads, {} accelerators",
            members.len(),
            threads,
            device_locks.len()
        );

        Ok(Self {
            members,
            pool,
            device_locks,
        })
    }

    pub fn members(&self) -> &[Arc<ModelHandle>] {
        &self.members
    }

    /// Distinct input specs across members
    pub fn input_specs(&self) -> Vec<InputSpec> {
        let mut specs: Vec<InputSpec> = Vec::new();
        for m in &self.members {
            if !specs.contains(m.input_spec()) {
                specs.push(*m.input_spec());
            }
        }
        specs
    }

    pub fn member(&self, id: &str) -> Option<&Arc<ModelHandle>> {
        self.members.iter().find(|m| m.id == id)
    }

    fn run_member(
        &self,
        member: &ModelHandle,
        inputs: &HashMap<InputSpec, Array4<f32>>,
    ) -> Result<(f64, f64), String> {
        let input = inputs
            .get(member.input_spec())
            .ok_or_else(|| "no prepared input for member spec".to_string())?;

        let _guard = match member.device {
            Device::Accelerator(n) => match self.device_locks.get(&n) {
                Some(lock) => Some(lock.lock().map_err(|_| "device lock poisoned".to_string())?),
                None => None,
            },
            Device::Cpu => None,
        };

        let start = Instant::now();
        let p = member
            .classifier
            .predict(input)
            .map_err(|e| e.to_string())?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        let p = f64::from(p);
        if !p.is_finite() {
            return Err(format!("non-finite probability {p}"));
        }
        Ok((p.clamp(0.0, 1.0), latency_ms))
    }

    /// Forward pass per member, then the weighted mean over contributors
    pub fn score(
        &self,
        inputs: &HashMap<InputSpec, Array4<f32>>,
    ) -> Result<EnsembleOutcome, ScoringError> {
        let results: Vec<Result<(f64, f64), String>> = self.pool.install(|| {
            self.members
                .par_iter()
                .map(|m| self.run_member(m, inputs))
                .collect()
        });

        let mut contributors: Vec<(&ModelHandle, f64, f64)> = Vec::new();
        let mut failed = Vec::new();
        for (member, result) in self.members.iter().zip(results) {
            match result {
                Ok((p, latency)) => contributors.push((member.as_ref(), p, latency)),
                Err(reason) => {
                    warn!("Ensemble member '{}' excluded: {}", member.id, reason);
                    failed.push((member.id.clone(), reason));
                }
            }
        }

        if contributors.is_empty() {
            let reasons = failed
                .iter()
                .map(|(id, r)| format!("{id}: {r}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ScoringError::AllMembersFailed(reasons));
        }

        let handles: Vec<&ModelHandle> = contributors.iter().map(|(m, _, _)| *m).collect();
        let weights = base_weights(&handles);

        let mut probability = 0.0;
        let mut predictions = Vec::with_capacity(contributors.len());
        for ((member, p, latency_ms), weight) in contributors.into_iter().zip(weights) {
            probability += p * weight;
            predictions.push(MemberPrediction {
                model_id: member.id.clone(),
                probability: p,
                weight,
                latency_ms,
                advanced: member.is_advanced(),
            });
        }

        let probability = probability.clamp(0.0, 1.0);
        debug!(
            "Ensemble probability {:.4} from {} members",
            probability,
            predictions.len()
        );

        Ok(EnsembleOutcome {
            probability,
            predictions,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authenticity_inference_core::prepare_all;
    use authenticity_inference_core::testing::ScriptedClassifier;
    use image::RgbImage;
    use proptest::prelude::*;

    fn member(id: &str, p: f32) -> ModelHandle {
        ModelHandle::new(Arc::new(ScriptedClassifier::new(id, p)))
    }

    fn inputs_for(scorer: &EnsembleScorer) -> HashMap<InputSpec, Array4<f32>> {
        let img = RgbImage::new(64, 64);
        let specs = scorer.input_specs();
        prepare_all(&img, specs.iter())
    }

    /// (advanced tag, explicit weight) per member
    fn member_specs() -> impl Strategy<Value = Vec<(bool, Option<f64>)>> {
        prop::collection::vec((any::<bool>(), prop::option::of(0.0f64..5.0)), 1..8)
    }

    fn build(specs: &[(bool, Option<f64>)], failing: &[bool]) -> Vec<ModelHandle> {
        specs
            .iter()
            .zip(failing.iter().chain(std::iter::repeat(&false)))
            .enumerate()
            .map(|(i, ((advanced, weight), fails))| {
                let id = format!("m{i}");
                let mut classifier = ScriptedClassifier::new(&id, 0.1 * (i % 10) as f32);
                if *fails {
                    classifier = classifier.failing();
                }
                let mut handle = ModelHandle::new(Arc::new(classifier));
                if *advanced {
                    handle = handle.with_tags(["advanced"]);
                }
                if let Some(w) = weight {
                    handle = handle.with_weight(*w);
                }
                handle
            })
            .collect()
    }

    #[test]
    fn test_weights_sum_to_one() {
        proptest!(|(specs in member_specs())| {
            let members = build(&specs, &[]);
            let refs: Vec<&ModelHandle> = members.iter().collect();
            let weights = base_weights(&refs);
            let sum: f64 = weights.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-6, "weights sum {}", sum);
            prop_assert!(weights.iter().all(|w| *w >= 0.0));
        });
    }

    #[test]
    fn test_contributor_weights_sum_to_one() {
        proptest!(ProptestConfig::with_cases(32), |(
            specs in member_specs(),
            failing in prop::collection::vec(any::<bool>(), 0..8)
        )| {
            let members = build(&specs, &failing);
            prop_assume!(members.len() > failing.iter().take(members.len()).filter(|f| **f).count());

            let scorer = EnsembleScorer::new(members.into_iter().map(Arc::new).collect()).unwrap();
            let outcome = scorer.score(&inputs_for(&scorer)).unwrap();
            let sum: f64 = outcome.predictions.iter().map(|p| p.weight).sum();
            prop_assert!((sum - 1.0).abs() < 1e-6, "contributor weights sum {}", sum);
            prop_assert!((0.0..=1.0).contains(&outcome.probability));
        });
    }

    #[test]
    fn test_advanced_member_dominates() {
        let a = member("adv", 0.9).with_tags(["advanced"]);
        let b = member("base", 0.4);
        let w = base_weights(&[&a, &b]);
        assert!((w[0] - 0.7).abs() < 1e-9);
        assert!((w[1] - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_two_member_ensemble_score() {
        let scorer = EnsembleScorer::new(vec![
            Arc::new(member("adv", 0.9).with_tags(["advanced"])),
            Arc::new(member("base", 0.4)),
        ])
        .unwrap();
        let outcome = scorer.score(&inputs_for(&scorer)).unwrap();
        assert!((outcome.probability - 0.75).abs() < 1e-6);
        assert_eq!(outcome.contributors(), 2);
        assert_eq!(outcome.primary_id(), Some("adv"));
    }

    #[test]
    fn test_failed_member_excluded_and_weights_renormalized() {
        let scorer = EnsembleScorer::new(vec![
            Arc::new(
                ModelHandle::new(Arc::new(ScriptedClassifier::new("adv", 0.9).failing()))
                    .with_tags(["advanced"]),
            ),
            Arc::new(member("base", 0.4)),
        ])
        .unwrap();
        let outcome = scorer.score(&inputs_for(&scorer)).unwrap();
        assert_eq!(outcome.contributors(), 1);
        assert!((outcome.predictions[0].weight - 1.0).abs() < 1e-9);
        assert!((outcome.probability - 0.4).abs() < 1e-6);
        assert_eq!(outcome.failed.len(), 1);
    }

    #[test]
    fn test_all_members_failing_is_an_error() {
        let scorer = EnsembleScorer::new(vec![Arc::new(ModelHandle::new(Arc::new(
            ScriptedClassifier::new("x", 0.5).failing(),
        )))])
        .unwrap();
        assert!(matches!(
            scorer.score(&inputs_for(&scorer)),
            Err(ScoringError::AllMembersFailed(_))
        ));
    }

    #[test]
    fn test_accelerator_members_share_lock() {
        let scorer = EnsembleScorer::new(vec![
            Arc::new(member("a", 0.2).with_device(Device::Accelerator(0))),
            Arc::new(member("b", 0.6).with_device(Device::Accelerator(0))),
        ])
        .unwrap();
        assert_eq!(scorer.device_locks.len(), 1);
        let outcome = scorer.score(&inputs_for(&scorer)).unwrap();
        assert!((outcome.probability - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_empty_ensemble_rejected() {
        assert!(matches!(
            EnsembleScorer::new(Vec::new()),
            Err(ScoringError::NoMembers)
        ));
    }
}
