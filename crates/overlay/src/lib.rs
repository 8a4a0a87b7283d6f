//! Authenticity Overlay - heatmap compositing
//!
//! Renders a saliency map over the source image as a tiered red overlay,
//! with optional colormap styles, a legend strip and comparison images.

pub mod cleanup;
pub mod compositor;
pub mod strips;
pub mod styles;

use authenticity_common::DetectionError;
use thiserror::Error;

pub use compositor::{
    tiered_overlay, OverlayArtifact, OverlayCompositor, OverlayConfig, OverlayStats, HIGH_INTENSITY,
};
pub use strips::{comparison_strip, with_legend};
pub use styles::{colormap, render_style, OverlayStyle};

#[derive(Error, Debug)]
pub enum OverlayError {
    #[error("Saliency map is empty")]
    EmptyMap,

    #[error("Saliency map contains non-finite values")]
    NonFinite,

    #[error("Source image has zero size")]
    EmptyImage,
}

impl From<OverlayError> for DetectionError {
    fn from(err: OverlayError) -> Self {
        DetectionError::InvalidImage(err.to_string())
    }
}
