//! Authenticity Saliency - gradient-based explanation maps
//!
//! Produces 2D maps in [0,1] showing which regions drove the fake score.
//! Every failure path short of cancellation degrades to a synthetic map.

pub mod cam;
pub mod generator;
pub mod layer_select;
pub mod synthetic;

use authenticity_common::{DetectionError, PipelineStage};
use image::imageops::FilterType;
use image::{ImageBuffer, Luma};
use ndarray::Array2;
use serde::Serialize;
use thiserror::Error;

pub use cam::SaliencyMethod;
pub use generator::{MethodSelection, SaliencyMapGenerator, SaliencyRequest};
pub use layer_select::{select_layer, LayerStrategy};
pub use synthetic::synthetic_map;

#[derive(Error, Debug)]
pub enum SaliencyError {
    #[error("No suitable layer found for saliency")]
    NoSuitableLayer,

    #[error("Layer probe failed: {0}")]
    Probe(String),

    #[error("Unknown saliency method: {0}")]
    UnknownMethod(String),

    #[error("Saliency generation cancelled")]
    Cancelled,
}

impl From<SaliencyError> for DetectionError {
    fn from(err: SaliencyError) -> Self {
        match err {
            SaliencyError::NoSuitableLayer => DetectionError::NoSuitableLayer,
            SaliencyError::Probe(reason) => DetectionError::GradientUnavailable(reason),
            SaliencyError::UnknownMethod(m) => DetectionError::Config(format!("unknown method '{m}'")),
            SaliencyError::Cancelled => DetectionError::Cancelled {
                stage: PipelineStage::Explaining,
            },
        }
    }
}

/// Where a map's values came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MapSource {
    Gradient,
    ActivationMean,
    Synthetic,
}

/// Normalized 2D saliency map
#[derive(Debug, Clone)]
pub struct SaliencyMap {
    /// (H, W), values in [0,1]
    pub values: Array2<f32>,
    pub method: SaliencyMethod,
    /// Probed layers, empty for synthetic maps
    pub layers: Vec<String>,
    pub source: MapSource,
    /// Layer-selection strategy that picked the layer, if one was auto-selected
    pub strategy: Option<LayerStrategy>,
}

impl SaliencyMap {
    pub fn dimensions(&self) -> (usize, usize) {
        self.values.dim()
    }
}

/// `max(map, 0) / (max + 1e-7)`; non-finite cells become 0
pub fn normalize_positive(map: &Array2<f32>) -> Array2<f32> {
    let clean = map.mapv(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
    let max = clean.iter().copied().fold(0.0_f32, f32::max);
    clean.mapv(|v| v / (max + 1e-7))
}

/// Bilinear resize of a 2D map to (height, width)
pub fn resize_map(map: &Array2<f32>, height: usize, width: usize) -> Array2<f32> {
    let (h, w) = map.dim();
    if (h, w) == (height, width) {
        return map.clone();
    }
    if h == 0 || w == 0 {
        return Array2::zeros((height, width));
    }

    let buffer: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(w as u32, h as u32, |x, y| Luma([map[[y as usize, x as usize]]]));
    let resized = image::imageops::resize(&buffer, width as u32, height as u32, FilterType::Triangle);
    Array2::from_shape_fn((height, width), |(y, x)| resized.get_pixel(x as u32, y as u32)[0])
}
