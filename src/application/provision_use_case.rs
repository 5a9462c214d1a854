// ============================================================
// Layer 2 — ProvisionUseCase
// ============================================================
// Writes freshly initialised weights and architecture sidecars for
// the router and all four experts, so the pipeline can be run end
// to end before trained weights are available.
//
// Untrained weights give arbitrary diagnoses. The output is only
// good for smoke tests and for checking the file layout.

use anyhow::{Context, Result};
use burn::tensor::backend::AutodiffBackend;

use crate::infra::{model_store::provision, weight_store::WeightStore};
use crate::ml::experts::ModelCatalog;

pub struct ProvisionUseCase {
    models_dir: String,
    catalog:    ModelCatalog,
}

impl ProvisionUseCase {
    pub fn new(models_dir: impl Into<String>) -> Self {
        Self { models_dir: models_dir.into(), catalog: ModelCatalog::standard() }
    }

    pub fn with_catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Returns the number of roles written.
    pub fn execute<B: AutodiffBackend>(&self, device: &B::Device) -> Result<usize> {
        let store = WeightStore::new(&self.models_dir);
        let written = provision::<B>(&store, &self.catalog, device)
            .with_context(|| format!("Cannot write weights to '{}'", self.models_dir))?;

        tracing::info!(written, dir = %self.models_dir, "Provisioned untrained weights");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::model_store::{Lifecycle, ModelRegistry};
    use crate::ml::TestBackend;

    #[test]
    fn test_provisioned_weights_load() {
        let dir = tempfile::tempdir().unwrap();
        let models_dir = dir.path().to_string_lossy().to_string();
        let catalog = ModelCatalog::tiny(0.3);

        let written = ProvisionUseCase::new(models_dir.clone())
            .with_catalog(catalog.clone())
            .execute::<TestBackend>(&Default::default())
            .unwrap();
        assert_eq!(written, 5);
        for entry in catalog.roles() {
            assert!(dir.path().join(format!("{}.json", entry.stem)).exists());
        }

        let registry = ModelRegistry::<TestBackend>::with_catalog(
            WeightStore::new(models_dir),
            catalog,
            Default::default(),
        );
        registry.ensure_loaded().unwrap();
        assert_eq!(registry.lifecycle(), Lifecycle::Ready);
    }
}
