// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The seam between the triage core and whatever hosts it (the
// CLI today, an HTTP transport tomorrow). Hosts only see
// ImageTriage and TriageRequest; they never touch burn types.
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use crate::domain::inference_result::InferenceResult;

// ─── TriageRequest ────────────────────────────────────────────────────────────
/// What the transport collaborator hands to the core.
/// `None` overrides fall back to the pipeline's configuration.
#[derive(Debug, Clone, Default)]
pub struct TriageRequest {
    /// Raw encoded image (PNG, JPEG, TIFF)
    pub image_bytes:  Vec<u8>,

    /// Explicit modality; unknown names are ignored and routing runs
    pub modality:     Option<String>,

    /// Monte-Carlo sample count override
    pub sample_count: Option<usize>,

    /// Rejection threshold override
    pub threshold:    Option<f32>,
}

impl TriageRequest {
    pub fn new(image_bytes: Vec<u8>) -> Self {
        Self { image_bytes, ..Self::default() }
    }

    pub fn with_modality(mut self, modality: impl Into<String>) -> Self {
        self.modality = Some(modality.into());
        self
    }
}

// ─── ImageTriage ──────────────────────────────────────────────────────────────
/// Any component that can triage a clinical image.
///
/// Implementations:
///   - TriagePipeline → routing, MC dropout, Grad-CAM, decision policy
pub trait ImageTriage {
    /// Always returns a structured result; failures become the ERROR shape.
    fn triage(&self, request: &TriageRequest) -> InferenceResult;
}
