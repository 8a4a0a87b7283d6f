pub mod calibrate;
pub mod models;
pub mod scan;

use anyhow::{Context, Result};
use authenticity_inference_core::ModelConfig;
use authenticity_orchestrator::ScreeningConfig;
use std::path::{Path, PathBuf};

/// Config from `--config` (or defaults) plus one member per `--model`
pub fn load_config(config: Option<&Path>, models: &[PathBuf]) -> Result<ScreeningConfig> {
    let mut screening = match config {
        Some(path) => ScreeningConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ScreeningConfig::default(),
    };

    for path in models {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("model")
            .to_string();
        let mut id = stem.clone();
        let mut n = 2;
        while screening.models.iter().any(|m| m.id == id) {
            id = format!("{stem}_{n}");
            n += 1;
        }
        screening.models.push(ModelConfig::new(id, path.clone()));
    }

    screening.validate()?;
    Ok(screening)
}
