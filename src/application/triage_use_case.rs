// ============================================================
// Layer 2 — TriageUseCase
// ============================================================
// Orchestrates one triage request in order:
//
//   Step 1: Check the models are loaded      (Layer 6 - infra)
//   Step 2: Decode and normalise the image   (Layer 4 - data)
//   Step 3: Route to a modality              (Layer 5 - ml)
//   Step 4: MC-dropout estimate              (Layer 5 - ml)
//   Step 5: Grad-CAM for the predicted class (Layer 5 - ml)
//   Step 6: Render the overlay               (Layer 4 - data)
//   Step 7: Accept / reject, triage score    (Layer 3 - domain)
//
// Every per-request failure is logged and returned as the ERROR
// result shape; `run` never returns Err.

use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::data::{overlay::render_payload, preprocessor::ImagePreprocessor};
use crate::domain::{
    decision::{decide, DEFAULT_UNCERTAINTY_THRESHOLD},
    error::TriageError,
    inference_result::InferenceResult,
    traits::{ImageTriage, TriageRequest},
};
use crate::infra::model_store::ModelRegistry;
use crate::ml::{
    saliency::explain,
    uncertainty::{estimate, DEFAULT_MC_SAMPLES},
};

// ─── Triage Configuration ────────────────────────────────────────────────────
// Defaults for every request. Serialisable so a deployment can keep
// it in a JSON file; missing keys fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriageConfig {
    pub models_dir:            String,
    pub mc_samples:            usize,
    pub uncertainty_threshold: f32,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            models_dir:            "models".to_string(),
            mc_samples:            DEFAULT_MC_SAMPLES,
            uncertainty_threshold: DEFAULT_UNCERTAINTY_THRESHOLD,
        }
    }
}

impl TriageConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .with_context(|| format!("Cannot read config from '{}'", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Invalid triage config in '{}'", path.display()))
    }
}

// ─── TriagePipeline ──────────────────────────────────────────────────────────
pub struct TriagePipeline<B: AutodiffBackend> {
    registry:     Arc<ModelRegistry<B>>,
    config:       TriageConfig,
    preprocessor: ImagePreprocessor,
}

impl<B: AutodiffBackend> TriagePipeline<B> {
    pub fn new(registry: Arc<ModelRegistry<B>>, config: TriageConfig) -> Self {
        Self { registry, config, preprocessor: ImagePreprocessor::new() }
    }

    pub fn config(&self) -> &TriageConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModelRegistry<B> {
        &self.registry
    }

    /// Triage one image. `None` overrides use the configuration.
    pub fn run(
        &self,
        image_bytes:  &[u8],
        forced:       Option<&str>,
        sample_count: Option<usize>,
        threshold:    Option<f32>,
    ) -> InferenceResult {
        let samples = sample_count.unwrap_or(self.config.mc_samples);
        let threshold = threshold.unwrap_or(self.config.uncertainty_threshold);

        match self.try_run(image_bytes, forced, samples, threshold) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Triage failed: {e}");
                InferenceResult::failure(e)
            }
        }
    }

    fn try_run(
        &self,
        image_bytes:  &[u8],
        forced:       Option<&str>,
        sample_count: usize,
        threshold:    f32,
    ) -> Result<InferenceResult, TriageError> {
        // ── Step 1: Models ──
        let models = self.registry.models()?;

        // ── Step 2: Preprocess ──
        let prepared = self.preprocessor.prepare(image_bytes)?;
        let input = prepared.to_tensor::<B::InnerBackend>(self.registry.device());

        // ── Step 3: Route ──
        let routing = models.route(&input, forced)?;
        let expert = models.expert(routing.modality)?;
        tracing::info!(
            modality = %routing.modality,
            forced = routing.forced,
            router_confidence = ?routing.confidence,
            "Routed"
        );

        // ── Step 4: Uncertainty ──
        let mc = estimate(expert, &input, sample_count)?;
        let (predicted, confidence) = mc
            .predicted_class()
            .ok_or_else(|| TriageError::Tensor("expert produced no classes".to_string()))?;

        // ── Step 5: Saliency ──
        let map = explain(expert, routing.modality.explanation_layer(), &input, predicted)?;

        // ── Step 6: Overlay ──
        let payload = render_payload(&prepared.display, &map)?;

        // ── Step 7: Decide ──
        let result = decide(
            &mc.mean_probabilities,
            mc.uncertainty,
            routing.modality,
            threshold,
        );
        tracing::info!(
            status = ?result.status(),
            confidence,
            uncertainty = mc.uncertainty,
            "Triage complete"
        );
        Ok(result.with_overlay(payload))
    }
}

impl<B: AutodiffBackend> ImageTriage for TriagePipeline<B> {
    fn triage(&self, request: &TriageRequest) -> InferenceResult {
        self.run(
            &request.image_bytes,
            request.modality.as_deref(),
            request.sample_count,
            request.threshold,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::overlay::decode_payload;
    use crate::data::preprocessor::png_bytes;
    use crate::domain::inference_result::InferenceStatus;
    use crate::domain::modality::Modality;
    use crate::infra::{model_store::provision, weight_store::WeightStore};
    use crate::ml::{experts::ModelCatalog, TestBackend};

    fn ready_pipeline(dropout: f64) -> TriagePipeline<TestBackend> {
        let set = ModelCatalog::tiny(dropout).init_expert_set::<TestBackend>(&Default::default());
        let registry = ModelRegistry::from_experts(set, Default::default());
        TriagePipeline::new(Arc::new(registry), TriageConfig::default())
    }

    #[test]
    fn test_config_defaults_and_partial_file() {
        let cfg = TriageConfig::default();
        assert_eq!(cfg.models_dir, "models");
        assert_eq!(cfg.mc_samples, 25);
        assert_eq!(cfg.uncertainty_threshold, 0.15);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("triage.json");
        fs::write(&path, r#"{ "mc_samples": 10 }"#).unwrap();
        let loaded = TriageConfig::from_file(&path).unwrap();
        assert_eq!(loaded.mc_samples, 10);
        assert_eq!(loaded.models_dir, "models");

        assert!(TriageConfig::from_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_not_ready_becomes_error_result() {
        let dir = tempfile::tempdir().unwrap();
        let registry =
            ModelRegistry::<TestBackend>::new(WeightStore::new(dir.path()), Default::default());
        let pipeline = TriagePipeline::new(Arc::new(registry), TriageConfig::default());

        let result = pipeline.run(&png_bytes(16, 16), None, None, None);
        let InferenceResult::Error(e) = result else {
            panic!("expected ERROR, got {result:?}");
        };
        assert_eq!(e.diagnosis, "Analysis Failed");
        assert_eq!(e.confidence, 0.0);
        assert_eq!(e.uncertainty, 1.0);
        assert!(e.error.contains("not loaded"));
    }

    #[test]
    fn test_garbage_bytes_become_error_result() {
        let pipeline = ready_pipeline(0.0);
        let result = pipeline.run(b"definitely not a png", None, Some(2), None);
        assert_eq!(result.status(), InferenceStatus::Error);
        assert!(result.heatmap_base64().is_none());
    }

    #[test]
    fn test_zero_samples_become_error_result() {
        let pipeline = ready_pipeline(0.0);
        let result = pipeline.run(&png_bytes(16, 16), Some("brain"), Some(0), None);
        assert_eq!(result.status(), InferenceStatus::Error);
    }

    #[test]
    fn test_oversized_sample_count_becomes_error_result() {
        let pipeline = ready_pipeline(0.0);
        let result = pipeline.run(&png_bytes(16, 16), Some("brain"), Some(usize::MAX), None);
        let InferenceResult::Error(e) = result else {
            panic!("expected ERROR, got {result:?}");
        };
        assert!(e.error.contains("sample count"), "{}", e.error);
    }

    #[test]
    fn test_end_to_end_from_weight_files() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ModelCatalog::tiny(0.0);
        let store = WeightStore::new(dir.path());
        provision::<TestBackend>(&store, &catalog, &Default::default()).unwrap();

        let registry = Arc::new(ModelRegistry::<TestBackend>::with_catalog(
            WeightStore::new(dir.path()),
            catalog,
            Default::default(),
        ));
        registry.ensure_loaded().unwrap();
        let pipeline = TriagePipeline::new(registry, TriageConfig::default());

        let request = TriageRequest { sample_count: Some(4), ..TriageRequest::new(png_bytes(40, 30)) }
            .with_modality("skin");
        let result = pipeline.triage(&request);

        // no dropout → zero disagreement → always accepted
        let InferenceResult::Accepted(a) = &result else {
            panic!("expected ACCEPTED, got {result:?}");
        };
        assert_eq!(a.modality, Modality::Skin);
        assert_eq!(a.uncertainty, 0.0);
        assert_eq!(a.all_probabilities.len(), 9);
        assert!((1..=100).contains(&a.triage_score));

        let png = decode_payload(result.heatmap_base64().unwrap()).unwrap();
        assert_eq!(image::load_from_memory(&png).unwrap().to_rgb8().dimensions(), (224, 224));

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains(r#""status":"ACCEPTED""#), "{json}");
    }

    #[test]
    fn test_rejection_still_carries_overlay() {
        let pipeline = ready_pipeline(0.0);
        // negative threshold rejects even zero uncertainty
        let result = pipeline.run(&png_bytes(16, 16), Some("ecg"), Some(2), Some(-1.0));
        let InferenceResult::Rejected(r) = &result else {
            panic!("expected REJECTED, got {result:?}");
        };
        assert_eq!(r.reason, "High Uncertainty");
        assert_eq!(r.modality, Modality::Ecg);
        assert!(result.heatmap_base64().is_some());
    }

    #[test]
    fn test_unresolved_explanation_layer_degrades_gracefully() {
        let mut catalog = ModelCatalog::tiny(0.0);
        for (m, entry) in catalog.experts.iter_mut() {
            if *m == Modality::Brain {
                entry.config.head_conv_channels = None;
            }
        }
        let set = catalog.init_expert_set::<TestBackend>(&Default::default());
        let registry = ModelRegistry::from_experts(set, Default::default());
        let pipeline = TriagePipeline::new(Arc::new(registry), TriageConfig::default());

        let result = pipeline.run(&png_bytes(16, 16), Some("brain"), Some(2), None);
        assert_eq!(result.status(), InferenceStatus::Accepted);
        assert!(result.heatmap_base64().is_some());
    }

    #[test]
    fn test_router_picks_a_modality_when_not_forced() {
        let pipeline = ready_pipeline(0.0);
        let result = pipeline.run(&png_bytes(16, 16), Some("xray"), Some(2), None);
        assert!(result.modality().is_some());
        assert_ne!(result.status(), InferenceStatus::Error);
    }
}
