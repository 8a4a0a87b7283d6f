//! Tiered red overlay and coverage statistics

use crate::cleanup::clean_intensity;
use crate::styles::{render_style, OverlayStyle};
use crate::OverlayError;
use authenticity_common::round_to;
use authenticity_saliency::resize_map;
use image::{Rgb, RgbImage};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// Intensity above which a pixel counts as high-intensity
pub const HIGH_INTENSITY: f32 = 0.7;

#[derive(Debug, Clone, Copy)]
pub struct Tier {
    /// Exclusive lower bound on intensity
    pub above: f32,
    pub color: [u8; 3],
    pub alpha: f32,
}

/// Ordered high → low; first match wins
pub const TIERS: [Tier; 3] = [
    Tier {
        above: HIGH_INTENSITY,
        color: [255, 0, 0],
        alpha: 0.8,
    },
    Tier {
        above: 0.4,
        color: [255, 100, 0],
        alpha: 0.6,
    },
    Tier {
        above: 0.2,
        color: [255, 200, 0],
        alpha: 0.4,
    },
];

pub fn tier_for(v: f32) -> Option<&'static Tier> {
    TIERS.iter().find(|t| v > t.above)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Opening + blur + local contrast enhancement before tiering
    pub cleanup: bool,
    /// Extra renderings with the continuous colormap
    pub styles: Vec<OverlayStyle>,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            cleanup: true,
            styles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayStats {
    pub artifact_coverage_percent: f64,
    pub high_intensity_pixels: u64,
    pub total_pixels: u64,
}

impl OverlayStats {
    pub fn from_intensity(intensity: &Array2<f32>) -> Self {
        let total_pixels = intensity.len() as u64;
        let high_intensity_pixels = intensity.iter().filter(|&&v| v > HIGH_INTENSITY).count() as u64;
        let artifact_coverage_percent = if total_pixels == 0 {
            0.0
        } else {
            round_to(high_intensity_pixels as f64 / total_pixels as f64 * 100.0, 2)
        };
        Self {
            artifact_coverage_percent,
            high_intensity_pixels,
            total_pixels,
        }
    }
}

/// Rendered overlay for one saliency map
#[derive(Debug, Clone)]
pub struct OverlayArtifact {
    pub image: RgbImage,
    /// Source-resolution intensity the overlay was rendered from
    pub intensity: Array2<f32>,
    pub stats: OverlayStats,
    pub styled: Vec<(OverlayStyle, RgbImage)>,
    /// Where the artifact sink stored the image
    pub location: Option<PathBuf>,
}

pub struct OverlayCompositor {
    config: OverlayConfig,
}

impl OverlayCompositor {
    pub fn new(config: OverlayConfig) -> Self {
        Self { config }
    }

    /// Resize to the source H×W, min-max renormalize and optionally clean up
    pub fn prepare_intensity(
        &self,
        map: &Array2<f32>,
        height: usize,
        width: usize,
    ) -> Result<Array2<f32>, OverlayError> {
        if map.is_empty() {
            return Err(OverlayError::EmptyMap);
        }
        if map.iter().any(|v| !v.is_finite()) {
            return Err(OverlayError::NonFinite);
        }

        let resized = resize_map(map, height, width);
        let normalized = min_max(&resized);
        Ok(if self.config.cleanup {
            clean_intensity(&normalized)
        } else {
            normalized
        })
    }

    pub fn compose(&self, image: &RgbImage, map: &Array2<f32>) -> Result<OverlayArtifact, OverlayError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(OverlayError::EmptyImage);
        }
        let intensity = self.prepare_intensity(map, h as usize, w as usize)?;
        let overlay = tiered_overlay(image, &intensity);
        let stats = OverlayStats::from_intensity(&intensity);
        let styled = self
            .config
            .styles
            .iter()
            .map(|&style| (style, render_style(image, &intensity, style)))
            .collect();

        debug!(
            "Overlay {}x{}: {} high-intensity pixels ({:.2}%)",
            w, h, stats.high_intensity_pixels, stats.artifact_coverage_percent
        );

        Ok(OverlayArtifact {
            image: overlay,
            intensity,
            stats,
            styled,
            location: None,
        })
    }
}

impl Default for OverlayCompositor {
    fn default() -> Self {
        Self::new(OverlayConfig::default())
    }
}

fn min_max(map: &Array2<f32>) -> Array2<f32> {
    let min = map.iter().copied().fold(f32::INFINITY, f32::min);
    let max = map.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if range <= f32::EPSILON {
        return Array2::zeros(map.raw_dim());
    }
    map.mapv(|v| ((v - min) / range).clamp(0.0, 1.0))
}

/// Alpha-blend tier colors over `image`
pub fn tiered_overlay(image: &RgbImage, intensity: &Array2<f32>) -> RgbImage {
    let mut out = image.clone();
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if let Some(tier) = tier_for(intensity[[y as usize, x as usize]]) {
            let mix = |base: u8, over: u8| {
                (f32::from(base) * (1.0 - tier.alpha) + f32::from(over) * tier.alpha)
                    .round()
                    .clamp(0.0, 255.0) as u8
            };
            *pixel = Rgb([
                mix(pixel[0], tier.color[0]),
                mix(pixel[1], tier.color[1]),
                mix(pixel[2], tier.color[2]),
            ]);
        }
    }
    out
}
