// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// This layer contains the Burn network code.
// Outside this layer burn shows up only as backend type parameters
// and the [1, 3, H, W] input tensor built by the preprocessor.
//
// What's in this layer:
//
//   model.rs       — The convolutional scorer shared by router and
//                    experts: conv units with frozen batch-norm,
//                    a classifier head with MC dropout, and a
//                    split point for Grad-CAM
//
//   mode.rs        — Deterministic / StochasticEstimation /
//                    GradientAttribution, plus the type-state
//                    markers for mode sessions
//
//   scoring.rs     — One loaded network behind the uniform
//                    scoring-function contract
//
//   uncertainty.rs — MC-dropout mean and mean-of-std
//
//   saliency.rs    — Grad-CAM heat maps
//
//   experts.rs     — Router, expert set and model catalog
//
// Reference: Burn Book §3 (Building Blocks)
//            Gal & Ghahramani (2016) Dropout as a Bayesian Approximation
//            Selvaraju et al. (2017) Grad-CAM

/// Network architecture
pub mod model;

/// Evaluation modes and session markers
pub mod mode;

/// Scoring-function adapter with exclusive mode sessions
pub mod scoring;

/// Monte-Carlo dropout estimator
pub mod uncertainty;

/// Gradient-weighted class activation maps
pub mod saliency;

/// Modality router and per-modality experts
pub mod experts;

/// Backend used by the binary. Attribution needs gradients, so it
/// is always wrapped in Autodiff.
#[cfg(not(feature = "wgpu"))]
pub type InferBackend = burn::backend::Autodiff<burn::backend::NdArray>;

#[cfg(feature = "wgpu")]
pub type InferBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

#[cfg(test)]
pub(crate) type TestBackend = burn::backend::Autodiff<burn::backend::NdArray>;
