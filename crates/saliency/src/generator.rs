//! Saliency map generation for one classifier

use crate::cam::{compute, SaliencyMethod};
use crate::layer_select::{select_layer, LayerStrategy};
use crate::synthetic::synthetic_map;
use crate::{normalize_positive, resize_map, MapSource, SaliencyError, SaliencyMap};
use authenticity_inference_core::{CancellationToken, Classifier, LayerProbe};
use ndarray::{Array2, Array4, ArrayD, ArrayView3, Ix3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Which methods a request asks for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MethodSelection {
    #[serde(rename = "gradcam")]
    GradCam,
    #[serde(rename = "gradcam++")]
    GradCamPlusPlus,
    #[serde(rename = "layercam")]
    LayerCam,
    #[serde(rename = "guided")]
    Guided,
    /// GradCAM++ and LayerCAM side by side
    #[default]
    #[serde(rename = "both")]
    Both,
}

impl MethodSelection {
    pub fn methods(self) -> Vec<SaliencyMethod> {
        match self {
            MethodSelection::GradCam => vec![SaliencyMethod::GradCam],
            MethodSelection::GradCamPlusPlus => vec![SaliencyMethod::GradCamPlusPlus],
            MethodSelection::LayerCam => vec![SaliencyMethod::LayerCam],
            MethodSelection::Guided => vec![SaliencyMethod::GuidedGradCam],
            MethodSelection::Both => vec![SaliencyMethod::GradCamPlusPlus, SaliencyMethod::LayerCam],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MethodSelection::GradCam => "gradcam",
            MethodSelection::GradCamPlusPlus => "gradcam++",
            MethodSelection::LayerCam => "layercam",
            MethodSelection::Guided => "guided",
            MethodSelection::Both => "both",
        }
    }
}

impl fmt::Display for MethodSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MethodSelection {
    type Err = SaliencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gradcam" => Ok(MethodSelection::GradCam),
            "gradcam++" | "gradcampp" | "gradcam_pp" => Ok(MethodSelection::GradCamPlusPlus),
            "layercam" => Ok(MethodSelection::LayerCam),
            "guided" | "guided_gradcam" => Ok(MethodSelection::Guided),
            "both" => Ok(MethodSelection::Both),
            other => Err(SaliencyError::UnknownMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SaliencyRequest {
    pub selection: MethodSelection,
    /// Explicit layers to probe and average; empty means auto-select one
    pub layers: Vec<String>,
}

impl SaliencyRequest {
    pub fn new(selection: MethodSelection) -> Self {
        Self {
            selection,
            layers: Vec::new(),
        }
    }

    pub fn with_layers(mut self, layers: Vec<String>) -> Self {
        self.layers = layers;
        self
    }
}

/// Probed activations for one layer
struct ProbedLayer {
    name: String,
    probe: LayerProbe,
}

pub struct SaliencyMapGenerator {
    /// Source image (height, width), the size of synthetic fallbacks
    source_size: (usize, usize),
}

impl SaliencyMapGenerator {
    pub fn new(source_height: usize, source_width: usize) -> Self {
        Self {
            source_size: (source_height, source_width),
        }
    }

    /// One normalized map per requested method
    ///
    /// Only cancellation is an error; everything else degrades to the
    /// channel-mean or synthetic map.
    pub fn generate(
        &self,
        classifier: &dyn Classifier,
        input: &Array4<f32>,
        request: &SaliencyRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<SaliencyMap>, SaliencyError> {
        if cancel.is_cancelled() {
            return Err(SaliencyError::Cancelled);
        }

        let methods = request.selection.methods();
        let (probed, strategy) = match self.probe(classifier, input, &request.layers) {
            Ok(result) => result,
            Err(e) => {
                warn!("Using synthetic saliency for '{}': {}", classifier.id(), e);
                return Ok(methods.into_iter().map(|m| self.synthetic(m)).collect());
            }
        };

        if let [first, second] = methods.as_slice() {
            let (a, b) = rayon::join(
                || self.map_for(*first, &probed, strategy, cancel),
                || self.map_for(*second, &probed, strategy, cancel),
            );
            return Ok(vec![a?, b?]);
        }

        methods
            .into_iter()
            .map(|m| self.map_for(m, &probed, strategy, cancel))
            .collect()
    }

    fn probe(
        &self,
        classifier: &dyn Classifier,
        input: &Array4<f32>,
        explicit: &[String],
    ) -> Result<(Vec<ProbedLayer>, Option<LayerStrategy>), SaliencyError> {
        if explicit.is_empty() {
            let layers = classifier.layers();
            let (layer, strategy) = select_layer(&layers)?;
            info!(
                "Saliency layer '{}' selected by {:?} for '{}'",
                layer.name,
                strategy,
                classifier.id()
            );
            let probe = classifier
                .probe_layer(input, &layer.name)
                .map_err(|e| SaliencyError::Probe(e.to_string()))?;
            return Ok((
                vec![ProbedLayer {
                    name: layer.name.clone(),
                    probe,
                }],
                Some(strategy),
            ));
        }

        let probed: Vec<ProbedLayer> = explicit
            .iter()
            .filter_map(|name| match classifier.probe_layer(input, name) {
                Ok(probe) => Some(ProbedLayer {
                    name: name.clone(),
                    probe,
                }),
                Err(e) => {
                    warn!("Skipping layer '{}' in multi-layer analysis: {}", name, e);
                    None
                }
            })
            .collect();
        if probed.is_empty() {
            return Err(SaliencyError::Probe(format!(
                "none of the requested layers could be probed: {}",
                explicit.join(", ")
            )));
        }
        Ok((probed, None))
    }

    fn map_for(
        &self,
        method: SaliencyMethod,
        probed: &[ProbedLayer],
        strategy: Option<LayerStrategy>,
        cancel: &CancellationToken,
    ) -> Result<SaliencyMap, SaliencyError> {
        if cancel.is_cancelled() {
            return Err(SaliencyError::Cancelled);
        }

        let mut maps = Vec::with_capacity(probed.len());
        let mut source = MapSource::Gradient;
        for layer in probed {
            match layer_map(method, &layer.probe) {
                Some((map, layer_source)) => {
                    if layer_source == MapSource::ActivationMean {
                        source = MapSource::ActivationMean;
                    }
                    maps.push(map);
                }
                None => debug!("Layer '{}' produced no usable {} map", layer.name, method),
            }
        }

        let Some(values) = average_maps(&maps) else {
            warn!("No reshapeable {} map, using synthetic fallback", method);
            return Ok(self.synthetic(method));
        };

        Ok(SaliencyMap {
            values: normalize_positive(&values),
            method,
            layers: probed.iter().map(|l| l.name.clone()).collect(),
            source,
            strategy,
        })
    }

    fn synthetic(&self, method: SaliencyMethod) -> SaliencyMap {
        let (h, w) = self.source_size;
        SaliencyMap {
            values: synthetic_map(h, w),
            method,
            layers: Vec::new(),
            source: MapSource::Synthetic,
            strategy: None,
        }
    }
}

/// Raw 2D map for one probed layer; `None` when the result cannot be made 2D
fn layer_map(method: SaliencyMethod, probe: &LayerProbe) -> Option<(Array2<f32>, MapSource)> {
    let activation = as_hwc(&probe.activation)?;
    let gradient = probe
        .gradient
        .as_ref()
        .and_then(as_hwc)
        .filter(|g| g.dim() == activation.dim());
    if probe.gradient.is_some() && gradient.is_none() {
        debug!("Gradient shape does not match activation, using channel mean");
    }

    let source = if gradient.is_some() {
        MapSource::Gradient
    } else {
        MapSource::ActivationMean
    };

    match activation.ndim() {
        3 => {
            let a: ArrayView3<f32> = activation.view().into_dimensionality::<Ix3>().ok()?;
            let g = gradient
                .as_ref()
                .and_then(|g| g.view().into_dimensionality::<Ix3>().ok());
            Some((compute(method, a, g), source))
        }
        1 => square_reshape(&activation).map(|m| (m, source)),
        _ => None,
    }
}

/// Bring an activation to (H,W,C), (H,W,1) or a flat vector; rank 0 or >3 is unusable
fn as_hwc(array: &ArrayD<f32>) -> Option<ArrayD<f32>> {
    match array.ndim() {
        3 | 1 => Some(array.clone()),
        2 => Some(array.clone().insert_axis(ndarray::Axis(2))),
        4 if array.shape()[0] == 1 => Some(array.index_axis(ndarray::Axis(0), 0).to_owned()),
        _ => None,
    }
}

/// Rank-1 result reshaped to a square grid when its length is a perfect square
fn square_reshape(flat: &ArrayD<f32>) -> Option<Array2<f32>> {
    let len = flat.len();
    let side = (len as f64).sqrt().round() as usize;
    if side == 0 || side * side != len {
        return None;
    }
    Array2::from_shape_vec((side, side), flat.iter().copied().collect()).ok()
}

/// Resize every map to the largest grid and average them
fn average_maps(maps: &[Array2<f32>]) -> Option<Array2<f32>> {
    let first = maps.first()?;
    if maps.len() == 1 {
        return Some(first.clone());
    }
    let height = maps.iter().map(|m| m.dim().0).max()?;
    let width = maps.iter().map(|m| m.dim().1).max()?;

    let mut sum = Array2::<f32>::zeros((height, width));
    for map in maps {
        // layers are normalized before averaging
        sum += &normalize_positive(&resize_map(map, height, width));
    }
    Some(sum / maps.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use authenticity_inference_core::testing::{probe, ScriptedClassifier};
    use authenticity_inference_core::{LayerInfo, LayerKind};
    use ndarray::{Array1, Array3};

    fn input() -> Array4<f32> {
        Array4::zeros((1, 32, 32, 3))
    }

    fn hot_activation(h: usize, w: usize) -> ArrayD<f32> {
        Array3::from_shape_fn((h, w, 4), |(y, x, _)| if y < h / 2 && x < w / 2 { 2.0 } else { 0.5 })
            .into_dyn()
    }

    #[test]
    fn test_method_selection_parsing() {
        assert_eq!("gradcam++".parse::<MethodSelection>().unwrap(), MethodSelection::GradCamPlusPlus);
        assert_eq!("BOTH".parse::<MethodSelection>().unwrap(), MethodSelection::Both);
        assert!("saliency".parse::<MethodSelection>().is_err());
        assert_eq!(MethodSelection::Both.methods().len(), 2);
    }

    #[test]
    fn test_channel_mean_without_gradient() {
        let classifier = ScriptedClassifier::new("m", 0.8).with_layer(
            LayerInfo::new("block14_sepconv2", LayerKind::Conv2d),
            Some(probe(hot_activation(10, 10), None)),
        );
        let generator = SaliencyMapGenerator::new(299, 299);
        let maps = generator
            .generate(
                &classifier,
                &input(),
                &SaliencyRequest::new(MethodSelection::GradCam),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(maps.len(), 1);
        let map = &maps[0];
        assert_eq!(map.dimensions(), (10, 10));
        assert_eq!(map.source, MapSource::ActivationMean);
        assert_eq!(map.layers, vec!["block14_sepconv2".to_string()]);
        assert!((map.values[[0, 0]] - 1.0).abs() < 1e-5);
        assert!((map.values[[9, 9]] - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_no_layers_gives_synthetic() {
        let classifier = ScriptedClassifier::new("m", 0.8);
        let generator = SaliencyMapGenerator::new(120, 100);
        let maps = generator
            .generate(
                &classifier,
                &input(),
                &SaliencyRequest::new(MethodSelection::Both),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(maps.len(), 2);
        for map in &maps {
            assert_eq!(map.source, MapSource::Synthetic);
            assert_eq!(map.dimensions(), (120, 100));
            assert!(map.values.iter().all(|&v| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn test_both_runs_gradient_methods() {
        let gradient = Array3::from_elem((8, 8, 4), 0.3_f32).into_dyn();
        let classifier = ScriptedClassifier::new("m", 0.8).with_layer(
            LayerInfo::new("conv_last", LayerKind::Conv2d),
            Some(probe(hot_activation(8, 8), Some(gradient))),
        );
        let maps = SaliencyMapGenerator::new(64, 64)
            .generate(
                &classifier,
                &input(),
                &SaliencyRequest::new(MethodSelection::Both),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(maps[0].method, SaliencyMethod::GradCamPlusPlus);
        assert_eq!(maps[1].method, SaliencyMethod::LayerCam);
        for map in &maps {
            assert_eq!(map.source, MapSource::Gradient);
            assert_eq!(map.strategy, Some(LayerStrategy::LastConv2d));
            assert!(map.values[[0, 0]] > map.values[[7, 7]]);
        }
    }

    #[test]
    fn test_rank1_square_and_non_square() {
        let flat = Array1::from_iter((0..16).map(|v| v as f32)).into_dyn();
        let classifier = ScriptedClassifier::new("m", 0.8).with_layer(
            LayerInfo::new("conv", LayerKind::Conv2d),
            Some(probe(flat, None)),
        );
        let maps = SaliencyMapGenerator::new(50, 50)
            .generate(&classifier, &input(), &SaliencyRequest::new(MethodSelection::GradCam), &CancellationToken::new())
            .unwrap();
        assert_eq!(maps[0].dimensions(), (4, 4));

        let flat = Array1::from_elem(15, 1.0_f32).into_dyn();
        let classifier = ScriptedClassifier::new("m", 0.8).with_layer(
            LayerInfo::new("conv", LayerKind::Conv2d),
            Some(probe(flat, None)),
        );
        let maps = SaliencyMapGenerator::new(50, 40)
            .generate(&classifier, &input(), &SaliencyRequest::new(MethodSelection::GradCam), &CancellationToken::new())
            .unwrap();
        assert_eq!(maps[0].source, MapSource::Synthetic);
        assert_eq!(maps[0].dimensions(), (50, 40));
    }

    #[test]
    fn test_scalar_activation_goes_synthetic() {
        let scalar = ArrayD::from_elem(ndarray::IxDyn(&[]), 0.7_f32);
        let classifier = ScriptedClassifier::new("m", 0.8).with_layer(
            LayerInfo::new("conv", LayerKind::Conv2d),
            Some(probe(scalar, None)),
        );
        let maps = SaliencyMapGenerator::new(32, 32)
            .generate(&classifier, &input(), &SaliencyRequest::default(), &CancellationToken::new())
            .unwrap();
        assert!(maps.iter().all(|m| m.source == MapSource::Synthetic));
    }

    #[test]
    fn test_multi_layer_average() {
        let classifier = ScriptedClassifier::new("m", 0.8)
            .with_layer(
                LayerInfo::new("mid", LayerKind::Conv2d),
                Some(probe(hot_activation(16, 16), None)),
            )
            .with_layer(
                LayerInfo::new("late", LayerKind::Conv2d),
                Some(probe(hot_activation(8, 8), None)),
            );
        let request = SaliencyRequest::new(MethodSelection::GradCam)
            .with_layers(vec!["mid".into(), "late".into(), "missing".into()]);
        let maps = SaliencyMapGenerator::new(64, 64)
            .generate(&classifier, &input(), &request, &CancellationToken::new())
            .unwrap();
        let map = &maps[0];
        assert_eq!(map.dimensions(), (16, 16));
        assert_eq!(map.layers, vec!["mid".to_string(), "late".to_string()]);
        assert!(map.strategy.is_none());
        assert!(map.values[[0, 0]] > map.values[[15, 15]]);
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let result = SaliencyMapGenerator::new(32, 32).generate(
            &ScriptedClassifier::new("m", 0.8),
            &input(),
            &SaliencyRequest::default(),
            &token,
        );
        assert!(matches!(result, Err(SaliencyError::Cancelled)));
    }
}
