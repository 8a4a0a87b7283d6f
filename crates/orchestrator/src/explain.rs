//! Explanation stage: saliency maps, overlays and artifacts for one member

use crate::artifacts::{artifact_name, ArtifactSink};
use crate::response::{HeatmapReport, MethodReport};
use authenticity_common::{DetectionError, PipelineStage};
use authenticity_inference_core::{CancellationToken, ModelHandle};
use authenticity_overlay::{comparison_strip, with_legend, OverlayCompositor, OverlayConfig};
use authenticity_saliency::{MethodSelection, SaliencyMapGenerator, SaliencyRequest};
use image::RgbImage;
use ndarray::Array4;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything the explanation worker needs, owned so it can leave the caller's thread
pub(crate) struct ExplainJob {
    pub handle: Arc<ModelHandle>,
    pub input: Arc<Array4<f32>>,
    pub image: Arc<RgbImage>,
    pub selection: MethodSelection,
    pub layers: Vec<String>,
    pub overlay: OverlayConfig,
    pub legend: bool,
    pub sink: Option<Arc<dyn ArtifactSink>>,
    pub stem: String,
}

impl ExplainJob {
    /// Render and store the heatmap
    ///
    /// Every artifact stored so far is discarded when the job fails or
    /// `cancel` fires before the job claims completion.
    pub fn run(self, cancel: &CancellationToken) -> Result<HeatmapReport, DetectionError> {
        let mut files = Vec::new();
        let result = self.render(cancel, &mut files).and_then(|report| {
            if cancel.try_complete() {
                Ok(report)
            } else {
                Err(DetectionError::Cancelled {
                    stage: PipelineStage::Explaining,
                })
            }
        });

        if result.is_err() {
            if let Some(sink) = &self.sink {
                for file in &files {
                    if let Err(e) = sink.discard(file) {
                        warn!("Failed to discard {}: {}", file.display(), e);
                    }
                }
            }
        }
        result
    }

    fn render(&self, cancel: &CancellationToken, files: &mut Vec<PathBuf>) -> Result<HeatmapReport, DetectionError> {
        let (width, height) = self.image.dimensions();
        let request = SaliencyRequest::new(self.selection).with_layers(self.layers.clone());
        let maps = SaliencyMapGenerator::new(height as usize, width as usize).generate(
            self.handle.classifier.as_ref(),
            &self.input,
            &request,
            cancel,
        )?;

        let compositor = OverlayCompositor::new(self.overlay.clone());
        let mut methods = Vec::with_capacity(maps.len());
        let mut overlays = Vec::with_capacity(maps.len());
        let mut primary = None;

        let store = |sink: &Arc<dyn ArtifactSink>,
                     name: String,
                     image: &RgbImage,
                     files: &mut Vec<PathBuf>|
         -> Result<PathBuf, DetectionError> {
            cancel.check(PipelineStage::Explaining)?;
            let path = sink.store(&name, image)?;
            files.push(path.clone());
            Ok(path)
        };

        for map in &maps {
            cancel.check(PipelineStage::Explaining)?;
            let mut artifact = compositor.compose(&self.image, &map.values)?;

            if let Some(sink) = &self.sink {
                let slug = map.method.slug();
                let rendered = if self.legend {
                    with_legend(&artifact.image)
                } else {
                    artifact.image.clone()
                };
                artifact.location = Some(store(sink, artifact_name(slug, None, &self.stem), &rendered, files)?);
                for (style, styled) in &artifact.styled {
                    store(sink, artifact_name(slug, Some(style.name()), &self.stem), styled, files)?;
                }
            }

            let (map_height, map_width) = map.dimensions();
            debug!(
                "{} map {}x{} from {:?}, coverage {:.2}%",
                map.method.name(),
                map_height,
                map_width,
                map.source,
                artifact.stats.artifact_coverage_percent
            );
            methods.push(MethodReport {
                method: map.method.name().to_string(),
                source: map.source,
                layers: map.layers.clone(),
                strategy: map.strategy,
                map_height,
                map_width,
                stats: artifact.stats,
            });
            if primary.is_none() {
                primary = Some((artifact.stats, artifact.location.clone()));
            }
            overlays.push(artifact.image);
        }

        if let ([first, second], Some(sink)) = (overlays.as_slice(), &self.sink) {
            let comparison = comparison_strip(&[first, second]);
            store(sink, format!("heatmap_comparison_{}", self.stem), &comparison, files)?;
        }

        let (stats, path) =
            primary.ok_or_else(|| DetectionError::Inference("saliency produced no maps".to_string()))?;
        info!(
            "Heatmap '{}' for member '{}': {} maps, {} files",
            self.selection,
            self.handle.id,
            methods.len(),
            files.len()
        );

        Ok(HeatmapReport {
            path,
            kind: self.selection,
            artifact_coverage_percent: stats.artifact_coverage_percent,
            high_intensity_pixels: stats.high_intensity_pixels,
            total_pixels: stats.total_pixels,
            methods,
            files: files.clone(),
        })
    }
}
