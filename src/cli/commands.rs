// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands: `predict` and `init-weights`
// and all their configurable flags.
//
// Flags left unset fall back to the config file (--config), then
// to the built-in defaults. The models directory can also come
// from TRIAGE_MODELS_DIR.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::application::triage_use_case::TriageConfig;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Triage one image: route, estimate uncertainty, explain
    Predict(PredictArgs),

    /// Write untrained weights for the router and all experts
    InitWeights(InitWeightsArgs),
}

/// Settings shared by every command.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// JSON file with models_dir, mc_samples, uncertainty_threshold
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the weight files and their .json sidecars
    #[arg(long, env = "TRIAGE_MODELS_DIR")]
    pub models_dir: Option<String>,
}

impl ConfigArgs {
    /// Config file (or defaults) with the CLI override applied.
    pub fn resolve(&self) -> anyhow::Result<TriageConfig> {
        let mut cfg = match &self.config {
            Some(path) => TriageConfig::from_file(path)?,
            None => TriageConfig::default(),
        };
        if let Some(dir) = &self.models_dir {
            cfg.models_dir = dir.clone();
        }
        Ok(cfg)
    }
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Image to triage (PNG, JPEG or TIFF)
    pub image: PathBuf,

    /// Skip the router: brain, lung, skin or ecg
    #[arg(long)]
    pub modality: Option<String>,

    /// Monte-Carlo dropout passes
    #[arg(long)]
    pub samples: Option<usize>,

    /// Reject when uncertainty is above this
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Print the result as JSON instead of a report
    #[arg(long)]
    pub json: bool,

    /// Write the saliency overlay PNG here
    #[arg(long)]
    pub heatmap_out: Option<PathBuf>,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Debug)]
pub struct InitWeightsArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
}
