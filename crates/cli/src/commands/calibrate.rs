//! Calibrate command - fit the post-processing temperature

use anyhow::{Context, Result};
use authenticity_scoring::{fit_temperature, CalibrationSample};
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct CalibrateCommand {
    /// JSON array of `{"probability": f64, "label": bool}` validation predictions
    #[arg(value_name = "SAMPLES")]
    samples: PathBuf,
}

#[derive(Debug, Serialize)]
struct CalibrationReport {
    temperature: f64,
    samples: usize,
    positives: usize,
}

fn read_samples(path: &Path) -> Result<Vec<CalibrationSample>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid calibration samples in {}", path.display()))
}

impl CalibrateCommand {
    pub fn execute(self) -> Result<()> {
        let samples = read_samples(&self.samples)?;
        let temperature = fit_temperature(&samples)?;
        let report = CalibrationReport {
            temperature,
            samples: samples.len(),
            positives: samples.iter().filter(|s| s.label).count(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}
