//! Destinations for rendered heatmap images

use authenticity_common::DetectionError;
use authenticity_inference_core::save_image;
use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stores a rendered image under a name and reports where it went
pub trait ArtifactSink: Send + Sync {
    fn store(&self, name: &str, image: &RgbImage) -> Result<PathBuf, DetectionError>;

    /// Remove a previously stored artifact
    fn discard(&self, location: &Path) -> Result<(), DetectionError>;
}

/// Writes JPEG files into one directory
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    quality: u8,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            quality: 90,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArtifactSink for DirectorySink {
    fn store(&self, name: &str, image: &RgbImage) -> Result<PathBuf, DetectionError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{name}.jpg"));
        save_image(image, &path, self.quality)?;
        debug!("Wrote {}", path.display());
        Ok(path)
    }

    fn discard(&self, location: &Path) -> Result<(), DetectionError> {
        match std::fs::remove_file(location) {
            Ok(()) => {
                debug!("Removed {}", location.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// `heatmap_{method}[_{style}]_{stem}`
pub fn artifact_name(method: &str, style: Option<&str>, stem: &str) -> String {
    match style {
        Some(style) => format!("heatmap_{method}_{style}_{stem}"),
        None => format!("heatmap_{method}_{stem}"),
    }
}

/// File stems are limited to characters that are safe in any filesystem
pub fn sanitize_stem(stem: &str) -> String {
    let cleaned: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "image".to_string()
    } else {
        cleaned
    }
}
