//! Authenticity Screening Orchestrator
//!
//! Runs one request through the pipeline:
//! `Preprocessing → Scoring → Calibrating → Decided → [Explaining] → Done`.
//! Any stage may end the request as `Failed(stage, reason)`; the explanation
//! stage degrades to a skipped heatmap instead.

pub mod artifacts;
pub mod config;
mod explain;
pub mod response;
pub mod worker;

use authenticity_common::{DetectionError, PipelineStage};
use authenticity_inference_core::{
    decode_image, prepare, prepare_all, Context, InputSpec, ModelHandle, ModelRegistry,
};
use authenticity_scoring::{
    base_weights, ConfidenceEstimator, ConfidenceReport, Decision, EnsembleOutcome, EnsembleScorer,
    ScorePostProcessor,
};
use image::RgbImage;
use ndarray::Array4;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub use artifacts::{ArtifactSink, DirectorySink};
pub use config::{ExplainSettings, PipelineSettings, ScoringSettings, ScreeningConfig};
pub use response::{
    DebugInfo, DetectionResult, FailedMember, HeatmapOutcome, HeatmapReport, MethodReport, ScreeningRequest,
    ScreeningResponse, StageTiming,
};
pub use worker::{run_cancellable, run_with_timeout};

use explain::ExplainJob;

type Inputs = HashMap<InputSpec, Array4<f32>>;

/// A request that ended in a stage
#[derive(Debug)]
struct StageFailure {
    stage: PipelineStage,
    error: DetectionError,
}

fn at(stage: PipelineStage) -> impl FnOnce(DetectionError) -> StageFailure {
    move |error| StageFailure { stage, error }
}

/// Stage history and per-stage wall time
struct StageTracker {
    history: Vec<PipelineStage>,
    timings: Vec<StageTiming>,
    current: PipelineStage,
    entered: Instant,
}

impl StageTracker {
    fn start() -> Self {
        Self {
            history: vec![PipelineStage::Preprocessing],
            timings: Vec::new(),
            current: PipelineStage::Preprocessing,
            entered: Instant::now(),
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        let now = Instant::now();
        self.timings.push(StageTiming {
            stage: self.current,
            duration_ms: now.duration_since(self.entered).as_secs_f64() * 1000.0,
        });
        self.history.push(stage);
        self.current = stage;
        self.entered = now;
    }
}

/// How the score was obtained
enum Scored {
    Ensemble {
        scorer: Arc<EnsembleScorer>,
        inputs: Arc<Inputs>,
        outcome: EnsembleOutcome,
    },
    Precomputed,
}

pub struct PipelineOrchestrator {
    config: ScreeningConfig,
    registry: ModelRegistry,
    scorer: OnceCell<Arc<EnsembleScorer>>,
    confidence: ConfidenceEstimator,
    post: ScorePostProcessor,
    sink: Option<Arc<dyn ArtifactSink>>,
}

impl PipelineOrchestrator {
    /// Orchestrator over the ONNX members listed in `config`
    pub fn new(config: ScreeningConfig) -> Self {
        let registry = ModelRegistry::new(config.models.clone());
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: ScreeningConfig, registry: ModelRegistry) -> Self {
        Self {
            confidence: ConfidenceEstimator::new(config.scoring.confidence()),
            post: ScorePostProcessor::new(config.scoring.post_process()),
            config,
            registry,
            scorer: OnceCell::new(),
            sink: None,
        }
    }

    /// Default destination for heatmaps when a request names no output directory
    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &ScreeningConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Screen one image; always yields an envelope
    pub fn screen(&self, request: &ScreeningRequest, ctx: &Context) -> ScreeningResponse {
        let started = Instant::now();
        match self.run(request, ctx) {
            Ok(result) => {
                info!(
                    "Screened image: fakeScore {:.2}, confidence {:.2}, deepfake={} ({:.1}ms)",
                    result.fake_score,
                    result.confidence_score,
                    result.is_deepfake,
                    started.elapsed().as_secs_f64() * 1000.0
                );
                ScreeningResponse::Success(Box::new(result))
            }
            Err(StageFailure {
                error: DetectionError::UnsupportedFormat(format),
                ..
            }) => {
                warn!("Skipping unsupported image format '{}'", format);
                ScreeningResponse::Skipped {
                    message: format!("Unsupported image format: {format}"),
                }
            }
            Err(StageFailure { stage, error }) => {
                error!("Screening failed during {}: {}", stage, error);
                ScreeningResponse::Failed {
                    message: format!("{stage} failed: {error}"),
                }
            }
        }
    }

    /// [`screen`](Self::screen), serialized
    pub fn screen_json(&self, request: &ScreeningRequest, ctx: &Context) -> String {
        self.screen(request, ctx).to_json()
    }

    fn scorer(&self) -> Result<Arc<EnsembleScorer>, DetectionError> {
        self.scorer
            .get_or_try_init(|| -> Result<_, DetectionError> {
                let members = self.registry.load_models()?.to_vec();
                Ok(Arc::new(EnsembleScorer::new(members)?))
            })
            .cloned()
    }

    fn run(&self, request: &ScreeningRequest, ctx: &Context) -> Result<DetectionResult, StageFailure> {
        let cancel = &ctx.cancellation;
        let mut stages = StageTracker::start();

        // Preprocessing
        cancel.check(PipelineStage::Preprocessing).map_err(at(PipelineStage::Preprocessing))?;
        let image = decode_image(&request.image)
            .map_err(DetectionError::from)
            .map_err(at(PipelineStage::Preprocessing))?;
        let image = Arc::new(image);
        let prepared = match request.fake_score {
            Some(_) => None,
            None => {
                let scorer = self.scorer().map_err(at(PipelineStage::Preprocessing))?;
                let specs = scorer.input_specs();
                let inputs = Arc::new(prepare_all(&image, specs.iter()));
                Some((scorer, inputs))
            }
        };

        // Scoring
        stages.enter(PipelineStage::Scoring);
        cancel.check(PipelineStage::Scoring).map_err(at(PipelineStage::Scoring))?;
        let scored = match prepared {
            Some((scorer, inputs)) => {
                let worker_scorer = Arc::clone(&scorer);
                let worker_inputs = Arc::clone(&inputs);
                let outcome = run_with_timeout(
                    PipelineStage::Scoring,
                    self.config.pipeline.scoring_timeout(),
                    move || worker_scorer.score(&worker_inputs).map_err(DetectionError::from),
                )
                .map_err(at(PipelineStage::Scoring))?;
                Scored::Ensemble {
                    scorer,
                    inputs,
                    outcome,
                }
            }
            None => Scored::Precomputed,
        };

        // Calibrating
        stages.enter(PipelineStage::Calibrating);
        cancel.check(PipelineStage::Calibrating).map_err(at(PipelineStage::Calibrating))?;
        let (decision, confidence) = self
            .calibrate(&scored, request.fake_score)
            .map_err(at(PipelineStage::Calibrating))?;

        stages.enter(PipelineStage::Decided);
        debug!(
            "Decided: fakeScore {:.2}, risk {:?}",
            decision.fake_score, decision.risk_level
        );

        let heatmap = if !request.heatmap {
            HeatmapOutcome::skipped("Heatmap not requested")
        } else if decision.fake_score <= self.config.explain.min_score {
            HeatmapOutcome::skipped(format!(
                "Fake score ({}) is too low for heatmap generation",
                decision.fake_score
            ))
        } else {
            stages.enter(PipelineStage::Explaining);
            cancel.check(PipelineStage::Explaining).map_err(at(PipelineStage::Explaining))?;
            match self.explain(request, &image, &scored, ctx) {
                Ok(report) => HeatmapOutcome::Success(report),
                Err(err @ DetectionError::Cancelled { .. }) => {
                    return Err(at(PipelineStage::Explaining)(err));
                }
                Err(err) => {
                    warn!("Heatmap skipped: {}", err);
                    HeatmapOutcome::skipped(format!("Heatmap generation skipped: {err}"))
                }
            }
        };
        stages.enter(PipelineStage::Done);

        let debug_info = ctx.records_trace().then(|| {
            let (scoring_mode, predictions, failed_members) = match &scored {
                Scored::Ensemble { outcome, .. } => (
                    "ensemble",
                    outcome.predictions.clone(),
                    outcome
                        .failed
                        .iter()
                        .map(|(model_id, reason)| FailedMember {
                            model_id: model_id.clone(),
                            reason: reason.clone(),
                        })
                        .collect(),
                ),
                Scored::Precomputed => ("precomputed", Vec::new(), Vec::new()),
            };
            let (target_layers, layer_strategy) = heatmap
                .report()
                .and_then(|report| report.methods.first())
                .map(|method| (method.layers.clone(), method.strategy))
                .unwrap_or_default();
            DebugInfo {
                scoring_mode,
                predictions,
                failed_members,
                decision: decision.clone(),
                confidence: confidence.clone(),
                target_layers,
                layer_strategy,
                stage_history: stages.history.clone(),
                stage_timings: stages.timings.clone(),
            }
        });

        Ok(DetectionResult {
            fake_score: decision.fake_score,
            confidence_score: confidence.score,
            is_deepfake: decision.is_deepfake,
            risk_level: decision.risk_level,
            debug_info,
            heatmap,
        })
    }

    /// Confidence uses the raw ensemble probability; the decision uses the
    /// post-processed one
    fn calibrate(
        &self,
        scored: &Scored,
        fake_score: Option<f64>,
    ) -> Result<(Decision, ConfidenceReport), DetectionError> {
        match (scored, fake_score) {
            (
                Scored::Ensemble {
                    scorer,
                    inputs,
                    outcome,
                },
                _,
            ) => {
                let primary = outcome
                    .primary_id()
                    .and_then(|id| scorer.member(id))
                    .and_then(|m| inputs.get(m.input_spec()).map(|input| (m.classifier.as_ref(), input)));
                let confidence = self
                    .confidence
                    .estimate(outcome.probability, outcome.contributors(), primary);
                let decision = self.post.decide(outcome.probability)?;
                Ok((decision, confidence))
            }
            (Scored::Precomputed, Some(fake_score)) => {
                let decision = self.post.decide_precomputed(fake_score)?;
                let confidence = self.confidence.estimate(decision.probability, 1, None);
                Ok((decision, confidence))
            }
            (Scored::Precomputed, None) => Err(DetectionError::Inference(
                "no ensemble outcome and no pre-computed score".to_string(),
            )),
        }
    }

    fn explain(
        &self,
        request: &ScreeningRequest,
        image: &Arc<RgbImage>,
        scored: &Scored,
        ctx: &Context,
    ) -> Result<HeatmapReport, DetectionError> {
        let (handle, input) = match scored {
            Scored::Ensemble {
                scorer,
                inputs,
                outcome,
            } => {
                let handle = outcome
                    .primary_id()
                    .and_then(|id| scorer.member(id))
                    .cloned()
                    .ok_or_else(|| DetectionError::Inference("no contributing member".to_string()))?;
                let input = inputs
                    .get(handle.input_spec())
                    .cloned()
                    .unwrap_or_else(|| prepare(image, handle.input_spec()));
                (handle, input)
            }
            Scored::Precomputed => {
                let scorer = self.scorer()?;
                let handle = explanation_member(scorer.members())
                    .ok_or_else(|| DetectionError::Inference("no ensemble members".to_string()))?;
                let input = prepare(image, handle.input_spec());
                (handle, input)
            }
        };

        let explain = &self.config.explain;
        let sink: Option<Arc<dyn ArtifactSink>> = match &request.output_dir {
            Some(dir) => Some(Arc::new(DirectorySink::new(dir).with_quality(explain.jpeg_quality))),
            None => self.sink.clone(),
        };
        let stem = artifacts::sanitize_stem(request.file_stem.as_deref().unwrap_or("image"));

        let job = ExplainJob {
            handle,
            input: Arc::new(input),
            image: Arc::clone(image),
            selection: request.method.unwrap_or(explain.method),
            layers: request.layers.clone().unwrap_or_else(|| explain.layers.clone()),
            overlay: explain.overlay(),
            legend: explain.legend,
            sink,
            stem,
        };
        run_cancellable(
            PipelineStage::Explaining,
            explain.timeout(),
            ctx.cancellation.child(),
            move |cancel| job.run(&cancel),
        )
    }
}

/// Highest base-weight member (first on ties)
fn explanation_member(members: &[Arc<ModelHandle>]) -> Option<Arc<ModelHandle>> {
    let handles: Vec<&ModelHandle> = members.iter().map(AsRef::as_ref).collect();
    let weights = base_weights(&handles);
    members
        .iter()
        .zip(weights)
        .fold(None::<(&Arc<ModelHandle>, f64)>, |best, (m, w)| match best {
            Some((b, bw)) if bw >= w => Some((b, bw)),
            _ => Some((m, w)),
        })
        .map(|(m, _)| Arc::clone(m))
}
