// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Every failure the triage core can produce, as one enum.
//
// Which errors are fatal to what:
//   UnknownModality            — fatal to the request
//   ModelLoad                  — startup only, the registry never
//                                becomes ready
//   NotReady                   — fatal to the request, retry after
//                                the registry finishes loading
//   ExplanationLayerUnresolved — recovered inside the explainer
//                                (an all-zero saliency map)
//   Decode                     — malformed image bytes, fatal to
//                                that request only
//
// The orchestrator catches every per-request error and turns it
// into an ERROR result, so callers always get a structured answer.
//
// Reference: Rust Book §9 (Recoverable Errors with Result)

use thiserror::Error;

use crate::domain::modality::LayerSelector;

#[derive(Debug, Error)]
pub enum TriageError {
    #[error("unknown modality '{0}'")]
    UnknownModality(String),

    #[error("failed to load model '{role}': {reason}")]
    ModelLoad { role: String, reason: String },

    #[error("models are not loaded yet")]
    NotReady,

    #[error("explanation layer {0:?} does not resolve to a layer of this network")]
    ExplanationLayerUnresolved(LayerSelector),

    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("sample count must be between 1 and 1000")]
    InvalidSampleCount,

    #[error("class index {index} is out of range for {classes} classes")]
    ClassIndexOutOfRange { index: usize, classes: usize },

    #[error("tensor data error: {0}")]
    Tensor(String),

    #[error("overlay rendering failed: {0}")]
    Render(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TriageError {
    /// Shorthand used by the weight store and registry.
    pub fn model_load(role: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ModelLoad { role: role.into(), reason: reason.to_string() }
    }
}
