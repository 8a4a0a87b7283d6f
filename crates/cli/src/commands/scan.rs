//! Scan command - score one image and render its heatmap

use super::load_config;
use anyhow::{Context as _, Result};
use authenticity_inference_core::Context;
use authenticity_orchestrator::{PipelineOrchestrator, ScreeningRequest, ScreeningResponse};
use authenticity_saliency::MethodSelection;
use clap::Args;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Args)]
pub struct ScanCommand {
    /// Image to screen (JPEG, PNG, BMP or TIFF)
    #[arg(value_name = "IMAGE")]
    image: PathBuf,

    /// ONNX model file; repeat for an ensemble
    #[arg(short, long = "model", value_name = "PATH")]
    models: Vec<PathBuf>,

    /// YAML screening configuration
    #[arg(short, long, value_name = "YAML")]
    config: Option<PathBuf>,

    /// Saliency method (gradcam, gradcam++, layercam, guided or both)
    #[arg(long)]
    method: Option<MethodSelection>,

    /// Layer to probe for multi-layer analysis; repeat to average several
    #[arg(long = "layer", value_name = "NAME")]
    layers: Vec<String>,

    /// Skip heatmap generation
    #[arg(long, default_value = "false")]
    no_heatmap: bool,

    /// Use an already-computed fake score (0-100) instead of running the ensemble
    #[arg(long, value_name = "SCORE")]
    fake_score: Option<f64>,

    /// Directory for heatmap images (defaults to the image's directory)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Omit the debug trace from the response
    #[arg(long, default_value = "false")]
    performance: bool,

    /// Pretty-print the JSON response
    #[arg(long, default_value = "false")]
    pretty: bool,
}

impl ScanCommand {
    pub fn execute(self) -> Result<()> {
        let start = Instant::now();

        let config = load_config(self.config.as_deref(), &self.models)?;
        if config.models.is_empty() && (self.fake_score.is_none() || !self.no_heatmap) {
            anyhow::bail!("No models configured; pass --model or --config");
        }

        let bytes = std::fs::read(&self.image)
            .with_context(|| format!("Failed to read image {}", self.image.display()))?;

        let stem = self
            .image
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("image")
            .to_string();
        let output_dir = self.output_dir.clone().unwrap_or_else(|| {
            self.image
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
        });

        let mut request = ScreeningRequest::new(bytes).with_output(output_dir, stem);
        if self.no_heatmap {
            request = request.without_heatmap();
        }
        if let Some(fake_score) = self.fake_score {
            request = request.with_fake_score(fake_score);
        }
        if let Some(method) = self.method {
            request = request.with_method(method);
        }
        if !self.layers.is_empty() {
            request = request.with_layers(self.layers.clone());
        }

        let ctx = if self.performance {
            Context::performance()
        } else {
            Context::debug()
        };
        let orchestrator = PipelineOrchestrator::new(config);
        let response = orchestrator.screen(&request, &ctx);

        let json = if self.pretty {
            serde_json::to_string_pretty(&response).unwrap_or_else(|_| response.to_json())
        } else {
            response.to_json()
        };
        println!("{json}");

        info!(
            "Scanned {} in {:.2}s",
            self.image.display(),
            start.elapsed().as_secs_f64()
        );

        if let ScreeningResponse::Failed { message } = &response {
            anyhow::bail!("Screening failed: {message}");
        }
        Ok(())
    }
}
