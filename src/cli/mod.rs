// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// This is the entry point for all user interaction.
// It uses the `clap` crate to parse command line arguments.
// All business logic is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `predict`      — triages one image and prints the verdict
//   2. `init-weights` — writes untrained weights for every role
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

/// Terminal formatting of triage results
pub mod report;

use std::{fs, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use commands::{Commands, InitWeightsArgs, PredictArgs};

use crate::application::{provision_use_case::ProvisionUseCase, triage_use_case::TriagePipeline};
use crate::data::overlay::decode_payload;
use crate::infra::{model_store::ModelRegistry, weight_store::WeightStore};
use crate::ml::InferBackend;

#[derive(Parser, Debug)]
#[command(
    name = "triage-vision",
    version,
    about = "Route a medical image to a modality expert, estimate uncertainty and explain the result."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Match on the subcommand and dispatch to the correct use case.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Predict(args)     => run_predict(args),
            Commands::InitWeights(args) => run_init_weights(args),
        }
    }
}

fn run_predict(args: PredictArgs) -> Result<()> {
    let cfg = args.config.resolve()?;
    let bytes = fs::read(&args.image)
        .with_context(|| format!("Cannot read image '{}'", args.image.display()))?;

    let device = Default::default();
    let registry = ModelRegistry::<InferBackend>::new(WeightStore::new(&cfg.models_dir), device);
    registry
        .ensure_loaded()
        .with_context(|| format!("Cannot load models from '{}'", cfg.models_dir))?;

    tracing::info!("Triaging '{}'", args.image.display());
    let pipeline = TriagePipeline::new(Arc::new(registry), cfg);
    let result = pipeline.run(&bytes, args.modality.as_deref(), args.samples, args.threshold);

    if let (Some(path), Some(payload)) = (&args.heatmap_out, result.heatmap_base64()) {
        fs::write(path, decode_payload(payload)?)
            .with_context(|| format!("Cannot write heatmap to '{}'", path.display()))?;
        tracing::info!("Heatmap written to '{}'", path.display());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", report::render(&result));
    }
    Ok(())
}

fn run_init_weights(args: InitWeightsArgs) -> Result<()> {
    let cfg = args.config.resolve()?;
    let written = ProvisionUseCase::new(cfg.models_dir.clone())
        .execute::<InferBackend>(&Default::default())?;
    println!("Wrote untrained weights for {written} models to '{}'.", cfg.models_dir);
    Ok(())
}
