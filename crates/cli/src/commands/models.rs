//! Models command - list configured members and whether they load

use super::load_config;
use anyhow::Result;
use authenticity_inference_core::ModelRegistry;
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct ModelsCommand {
    /// YAML screening configuration
    #[arg(short, long, value_name = "YAML")]
    config: Option<PathBuf>,

    /// Additional ONNX model file
    #[arg(short, long = "model", value_name = "PATH")]
    models: Vec<PathBuf>,

    /// Print JSON instead of a table
    #[arg(long, default_value = "false")]
    json: bool,
}

impl ModelsCommand {
    pub fn execute(self) -> Result<()> {
        let config = load_config(self.config.as_deref(), &self.models)?;
        if config.models.is_empty() {
            println!("No models configured");
            return Ok(());
        }

        let registry = ModelRegistry::new(config.models.clone());
        let statuses = registry.statuses();

        if self.json {
            println!("{}", serde_json::to_string_pretty(&statuses)?);
            return Ok(());
        }

        println!("Configured models:");
        for (model, status) in config.models.iter().zip(&statuses) {
            println!("\n{}", model.id);
            println!("  Path: {}", model.path.display());
            println!("  Tags: {}", status.tags.join(", "));
            match model.weight {
                Some(weight) => println!("  Weight: {weight}"),
                None => println!("  Weight: tag-derived"),
            }
            println!("  Device: {}", model.device);
            println!(
                "  Input: {}px {:?} {:?} {:?}",
                model.input.size, model.input.layout, model.input.channel_order, model.input.normalization
            );
            match &status.error {
                None if status.loaded => println!("  Status: loaded"),
                Some(err) => println!("  Status: failed ({err})"),
                None => println!("  Status: not loaded"),
            }
        }
        Ok(())
    }
}
