// ============================================================
// Layer 5 — Router + Expert Set
// ============================================================
// One router scoring function (4 outputs, one per modality) and
// one expert per modality. Routing is a single deterministic
// forward pass: softmax → argmax → modality. A caller-supplied
// modality name skips the router entirely when it is valid; an
// invalid one is logged and the router decides.

use std::collections::HashMap;

use burn::{prelude::*, tensor::activation::softmax, tensor::backend::AutodiffBackend};

use crate::domain::decision::argmax;
use crate::domain::error::TriageError;
use crate::domain::modality::{Modality, ROUTER_WEIGHT_FILE};
use crate::ml::model::ExpertNetConfig;
use crate::ml::scoring::{to_host, ScoringFunction};

/// How the modality for a request was chosen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Routing {
    pub modality:   Modality,
    /// Router softmax probability; None when forced.
    pub confidence: Option<f32>,
    pub forced:     bool,
}

pub struct ExpertSet<B: AutodiffBackend> {
    router:  ScoringFunction<B>,
    experts: HashMap<Modality, ScoringFunction<B>>,
}

impl<B: AutodiffBackend> ExpertSet<B> {
    pub fn new(router: ScoringFunction<B>, experts: HashMap<Modality, ScoringFunction<B>>) -> Self {
        Self { router, experts }
    }

    pub fn router(&self) -> &ScoringFunction<B> {
        &self.router
    }

    pub fn expert(&self, modality: Modality) -> Result<&ScoringFunction<B>, TriageError> {
        self.experts
            .get(&modality)
            .ok_or_else(|| TriageError::UnknownModality(modality.to_string()))
    }

    pub fn route(
        &self,
        image:  &Tensor<B::InnerBackend, 4>,
        forced: Option<&str>,
    ) -> Result<Routing, TriageError> {
        if let Some(name) = forced {
            match name.parse::<Modality>() {
                Ok(modality) => {
                    tracing::debug!(%modality, "Modality forced by caller");
                    return Ok(Routing { modality, confidence: None, forced: true });
                }
                Err(e) => tracing::warn!("{e}; falling back to the router"),
            }
        }

        let probs = to_host(softmax(self.router.forward(image), 1))?;
        let (index, confidence) = argmax(&probs)
            .ok_or_else(|| TriageError::Tensor("router produced no outputs".to_string()))?;
        let modality = Modality::from_router_index(index)?;

        tracing::debug!(%modality, confidence, "Router decision");
        Ok(Routing { modality, confidence: Some(confidence), forced: false })
    }
}

// ─── ModelCatalog ─────────────────────────────────────────────────────────────
/// Weight-file stem and declared architecture for one role.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRole {
    pub stem:   String,
    pub config: ExpertNetConfig,
}

/// Every role the pipeline loads: the router plus one expert per
/// modality.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelCatalog {
    pub router:  ModelRole,
    pub experts: Vec<(Modality, ModelRole)>,
}

impl ModelCatalog {
    pub fn standard() -> Self {
        Self {
            router: ModelRole {
                stem:   ROUTER_WEIGHT_FILE.to_string(),
                config: ExpertNetConfig::router(),
            },
            experts: Modality::ALL
                .iter()
                .map(|&m| {
                    (m, ModelRole {
                        stem:   m.weight_file().to_string(),
                        config: ExpertNetConfig::for_modality(m),
                    })
                })
                .collect(),
        }
    }

    pub fn expert(&self, modality: Modality) -> Option<&ModelRole> {
        self.experts.iter().find(|(m, _)| *m == modality).map(|(_, entry)| entry)
    }

    /// All roles, router first.
    pub fn roles(&self) -> impl Iterator<Item = &ModelRole> {
        std::iter::once(&self.router).chain(self.experts.iter().map(|(_, entry)| entry))
    }

    /// Freshly initialised networks for every role.
    pub fn init_expert_set<B: AutodiffBackend>(&self, device: &B::Device) -> ExpertSet<B> {
        let router = ScoringFunction::new(
            self.router.stem.clone(),
            self.router.config.clone(),
            self.router.config.init(device),
        );
        let experts = self
            .experts
            .iter()
            .map(|(m, entry)| {
                let net = entry.config.init(device);
                (*m, ScoringFunction::new(entry.stem.clone(), entry.config.clone(), net))
            })
            .collect();
        ExpertSet::new(router, experts)
    }
}

#[cfg(test)]
impl ModelCatalog {
    /// Standard roles with tiny networks.
    pub(crate) fn tiny(dropout: f64) -> Self {
        let mut catalog = Self::standard();
        catalog.router.config =
            ExpertNetConfig::tiny(catalog.router.config.architecture, Modality::ALL.len(), 0.0);
        for (m, entry) in catalog.experts.iter_mut() {
            entry.config = ExpertNetConfig::tiny(m.architecture(), m.num_classes(), dropout);
        }
        catalog
    }
}
