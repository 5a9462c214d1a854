// ============================================================
// Layer 6 — Model Registry
// ============================================================
// Owns the loaded router and experts for the life of the process.
//
// Lifecycle:
//
//   Uninitialized ──ensure_loaded()──► Loading ──ok──► Ready
//         ▲                               │
//         └────────────── error ──────────┘
//
// ensure_loaded is idempotent: once Ready, later calls return at
// once without touching the disk. Concurrent callers serialise on
// a load gate, so the five weight files are read at most once per
// successful load. Requests arriving before Ready get NotReady.
//
// Startup validation, per role:
//   - weights load against the declared architecture
//   - the output count matches the modality's label count
//   - each expert's explanation layer resolves

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, PoisonError, RwLock,
};

use burn::tensor::backend::AutodiffBackend;

use crate::domain::error::TriageError;
use crate::infra::weight_store::WeightStore;
use crate::ml::experts::{ExpertSet, ModelCatalog, ModelRole};
use crate::ml::scoring::ScoringFunction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Loading,
    Ready,
}

enum LoadState<B: AutodiffBackend> {
    Uninitialized,
    Loading,
    Ready(Arc<ExpertSet<B>>),
}

pub struct ModelRegistry<B: AutodiffBackend> {
    store:        WeightStore,
    catalog:      ModelCatalog,
    device:       B::Device,
    state:        RwLock<LoadState<B>>,
    load_gate:    Mutex<()>,
    weight_reads: AtomicUsize,
}

impl<B: AutodiffBackend> ModelRegistry<B> {
    /// Registry over the standard router and four experts.
    pub fn new(store: WeightStore, device: B::Device) -> Self {
        Self::with_catalog(store, ModelCatalog::standard(), device)
    }

    pub fn with_catalog(store: WeightStore, catalog: ModelCatalog, device: B::Device) -> Self {
        Self {
            store,
            catalog,
            device,
            state:        RwLock::new(LoadState::Uninitialized),
            load_gate:    Mutex::new(()),
            weight_reads: AtomicUsize::new(0),
        }
    }

    /// A registry that is Ready from the start, over networks
    /// already in memory.
    pub fn from_experts(experts: ExpertSet<B>, device: B::Device) -> Self {
        let registry = Self::with_catalog(WeightStore::new("."), ModelCatalog::standard(), device);
        *registry.write_state() = LoadState::Ready(Arc::new(experts));
        registry
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match &*self.read_state() {
            LoadState::Uninitialized => Lifecycle::Uninitialized,
            LoadState::Loading       => Lifecycle::Loading,
            LoadState::Ready(_)      => Lifecycle::Ready,
        }
    }

    /// Weight files read so far.
    pub fn weight_reads(&self) -> usize {
        self.weight_reads.load(Ordering::Relaxed)
    }

    /// Load every role unless already Ready.
    pub fn ensure_loaded(&self) -> Result<(), TriageError> {
        let _gate = self.load_gate.lock().unwrap_or_else(PoisonError::into_inner);
        if self.lifecycle() == Lifecycle::Ready {
            return Ok(());
        }

        *self.write_state() = LoadState::Loading;
        tracing::info!(dir = %self.store.dir().display(), "Loading models");

        match self.load_all() {
            Ok(experts) => {
                *self.write_state() = LoadState::Ready(Arc::new(experts));
                tracing::info!("Models ready");
                Ok(())
            }
            Err(e) => {
                *self.write_state() = LoadState::Uninitialized;
                tracing::error!("Model loading failed: {e}");
                Err(e)
            }
        }
    }

    /// The loaded networks, or NotReady.
    pub fn models(&self) -> Result<Arc<ExpertSet<B>>, TriageError> {
        match &*self.read_state() {
            LoadState::Ready(experts) => Ok(Arc::clone(experts)),
            _ => Err(TriageError::NotReady),
        }
    }

    fn load_all(&self) -> Result<ExpertSet<B>, TriageError> {
        let router = self.load_role(&self.catalog.router)?;

        let mut experts = std::collections::HashMap::new();
        for (modality, entry) in &self.catalog.experts {
            let scoring = self.load_role(entry)?;
            if scoring.num_classes() != modality.num_classes() {
                return Err(TriageError::model_load(
                    &entry.stem,
                    format!(
                        "{} outputs for {} {modality} labels",
                        scoring.num_classes(),
                        modality.num_classes()
                    ),
                ));
            }
            scoring
                .resolve(modality.explanation_layer())
                .map_err(|e| TriageError::model_load(&entry.stem, e))?;
            experts.insert(*modality, scoring);
        }

        Ok(ExpertSet::new(router, experts))
    }

    fn load_role(&self, entry: &ModelRole) -> Result<ScoringFunction<B>, TriageError> {
        self.weight_reads.fetch_add(1, Ordering::Relaxed);
        let (config, net) = self.store.load::<B>(&entry.stem, &entry.config, &self.device)?;
        Ok(ScoringFunction::new(entry.stem.clone(), config, net))
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, LoadState<B>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, LoadState<B>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write freshly initialised weights for every role in `catalog`.
pub fn provision<B: AutodiffBackend>(
    store:   &WeightStore,
    catalog: &ModelCatalog,
    device:  &B::Device,
) -> Result<usize, TriageError> {
    let mut written = 0;
    for entry in catalog.roles() {
        let net = entry.config.init::<B>(device);
        store.save(&entry.stem, &net, &entry.config)?;
        written += 1;
    }
    Ok(written)
}
