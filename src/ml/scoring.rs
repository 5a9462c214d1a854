// ============================================================
// Layer 5 — Scoring Function
// ============================================================
// One loaded network (router or expert) behind a uniform contract:
//
//   forward(image)           → logits, deterministic, lock-free
//   session()                → exclusive ModeSession<Deterministic>
//     .into_stochastic()     → sample(image) with dropout active
//     .into_attribution()    → capture(image, layer, class)
//
// Two copies of the weights are held:
//   frozen  — inner backend, no autodiff graph; every forward pass
//   tracked — autodiff backend with parameters excluded from the
//             graph; only the tail of an attribution pass runs here
//
// The session owns the scoring function's mode lock for its whole
// lifetime, so estimation and attribution are exclusive per
// scoring function while plain forwards stay concurrent. Dropping
// a session in any state, including during a panic, puts the
// mode back to Deterministic.

use std::marker::PhantomData;
use std::sync::{Mutex, MutexGuard, PoisonError};

use burn::{module::AutodiffModule, prelude::*, tensor::backend::AutodiffBackend};

use crate::domain::error::TriageError;
use crate::domain::modality::LayerSelector;
use crate::ml::mode::{Attribution, Deterministic, EvalMode, SessionState, Stochastic};
use crate::ml::model::{ExpertNet, ExpertNetConfig, LayerHandle};

type Inner<B> = <B as AutodiffBackend>::InnerBackend;

pub struct ScoringFunction<B: AutodiffBackend> {
    role:    String,
    config:  ExpertNetConfig,
    tracked: ExpertNet<B>,
    frozen:  ExpertNet<Inner<B>>,
    mode:    Mutex<EvalMode>,
}

impl<B: AutodiffBackend> ScoringFunction<B> {
    pub fn new(role: impl Into<String>, config: ExpertNetConfig, net: ExpertNet<B>) -> Self {
        let tracked = net.no_grad();
        let frozen = tracked.valid();
        Self {
            role: role.into(),
            config,
            tracked,
            frozen,
            mode: Mutex::new(EvalMode::Deterministic),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn config(&self) -> &ExpertNetConfig {
        &self.config
    }

    pub fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    pub fn resolve(&self, selector: LayerSelector) -> Result<LayerHandle, TriageError> {
        self.frozen
            .resolve(selector)
            .ok_or(TriageError::ExplanationLayerUnresolved(selector))
    }

    /// Deterministic forward pass. Takes no lock.
    pub fn forward(&self, image: &Tensor<Inner<B>, 4>) -> Tensor<Inner<B>, 2> {
        self.frozen.forward(image.clone(), EvalMode::Deterministic)
    }

    /// Mode of the active session, or Deterministic when idle.
    /// Blocks while a session is open.
    pub fn current_mode(&self) -> EvalMode {
        *self.lock()
    }

    /// Open an exclusive session in deterministic mode.
    pub fn session(&self) -> ModeSession<'_, B, Deterministic> {
        let mut guard = self.lock();
        *guard = EvalMode::Deterministic;
        ModeSession { scoring: self, guard: Some(guard), _state: PhantomData }
    }

    // A poisoned lock only means a session panicked; its Drop has
    // already restored the mode.
    fn lock(&self) -> MutexGuard<'_, EvalMode> {
        self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ─── ModeSession ──────────────────────────────────────────────────────────────
pub struct ModeSession<'a, B: AutodiffBackend, S: SessionState> {
    scoring: &'a ScoringFunction<B>,
    guard:   Option<MutexGuard<'a, EvalMode>>,
    _state:  PhantomData<S>,
}

impl<'a, B: AutodiffBackend, S: SessionState> ModeSession<'a, B, S> {
    pub fn mode(&self) -> EvalMode {
        S::MODE
    }

    fn transition<T: SessionState>(mut self) -> ModeSession<'a, B, T> {
        let mut guard = self.guard.take();
        if let Some(mode) = guard.as_mut() {
            **mode = T::MODE;
        }
        ModeSession { scoring: self.scoring, guard, _state: PhantomData }
    }
}

impl<B: AutodiffBackend, S: SessionState> Drop for ModeSession<'_, B, S> {
    fn drop(&mut self) {
        if let Some(mode) = self.guard.as_mut() {
            **mode = EvalMode::Deterministic;
        }
    }
}

impl<'a, B: AutodiffBackend> ModeSession<'a, B, Deterministic> {
    pub fn into_stochastic(self) -> ModeSession<'a, B, Stochastic> {
        self.transition()
    }

    pub fn into_attribution(self) -> ModeSession<'a, B, Attribution> {
        self.transition()
    }
}

impl<'a, B: AutodiffBackend> ModeSession<'a, B, Stochastic> {
    /// One stochastic pass: dropout active, batch-norm frozen.
    pub fn sample(&self, image: &Tensor<Inner<B>, 4>) -> Tensor<Inner<B>, 2> {
        self.scoring.frozen.forward(image.clone(), Stochastic::MODE)
    }

    pub fn into_deterministic(self) -> ModeSession<'a, B, Deterministic> {
        self.transition()
    }
}

/// Activation and gradient of one layer for one class score.
#[derive(Debug, Clone)]
pub struct LayerCapture<B: Backend> {
    /// [1, channels, h, w]
    pub activation: Tensor<B, 4>,
    /// d score / d activation, same shape
    pub gradient:   Tensor<B, 4>,
}

impl<'a, B: AutodiffBackend> ModeSession<'a, B, Attribution> {
    /// Forward to `layer`, lift the activation into a fresh autodiff
    /// leaf, finish the forward pass from there and back-propagate
    /// the `target_class` logit into the leaf.
    ///
    /// The leaf and the gradient container live only inside this
    /// call, so nothing is attached to the shared network.
    pub fn capture(
        &self,
        image:        &Tensor<Inner<B>, 4>,
        layer:        LayerHandle,
        target_class: usize,
    ) -> Result<LayerCapture<Inner<B>>, TriageError> {
        let classes = self.scoring.num_classes();
        if target_class >= classes {
            return Err(TriageError::ClassIndexOutOfRange { index: target_class, classes });
        }

        let activation = self.scoring.frozen.features(image.clone(), layer);
        let leaf = Tensor::<B, 4>::from_inner(activation.clone()).require_grad();

        let logits = self
            .scoring
            .tracked
            .classify_from(leaf.clone(), layer, Attribution::MODE);
        let score = logits.slice([0..1, target_class..target_class + 1]).sum();

        let grads = score.backward();
        let gradient = leaf.grad(&grads).ok_or_else(|| {
            TriageError::Tensor("no gradient reached the explanation layer".to_string())
        })?;

        Ok(LayerCapture { activation, gradient })
    }

    pub fn into_deterministic(self) -> ModeSession<'a, B, Deterministic> {
        self.transition()
    }
}

/// Pull a float tensor back to host memory.
pub fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, TriageError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TriageError::Tensor(format!("{e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::modality::Architecture;
    use crate::ml::TestBackend;
    use burn::tensor::Distribution;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn scoring(dropout: f64) -> ScoringFunction<TestBackend> {
        let cfg = ExpertNetConfig::tiny(Architecture::EfficientNetB2, 4, dropout);
        let net = cfg.init(&Default::default());
        ScoringFunction::new("best_BrainExpert", cfg, net)
    }

    fn image() -> Tensor<Inner<TestBackend>, 4> {
        Tensor::random([1, 3, 32, 32], Distribution::Uniform(-1.0, 1.0), &Default::default())
    }

    #[test]
    fn test_resting_mode_is_deterministic() {
        let s = scoring(0.4);
        assert_eq!(s.current_mode(), EvalMode::Deterministic);
    }

    #[test]
    fn test_session_transitions() {
        let s = scoring(0.4);
        let session = s.session();
        assert_eq!(session.mode(), EvalMode::Deterministic);
        let session = session.into_stochastic();
        assert_eq!(session.mode(), EvalMode::StochasticEstimation);
        let session = session.into_deterministic().into_attribution();
        assert_eq!(session.mode(), EvalMode::GradientAttribution);
        drop(session);
        assert_eq!(s.current_mode(), EvalMode::Deterministic);
    }

    #[test]
    fn test_second_session_waits_for_the_first() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let s = scoring(0.4);
        let entered = AtomicBool::new(false);

        std::thread::scope(|scope| {
            let first = s.session().into_stochastic();
            let waiter = scope.spawn(|| {
                let second = s.session();
                entered.store(true, Ordering::SeqCst);
                second.mode()
            });

            std::thread::sleep(Duration::from_millis(100));
            assert!(!entered.load(Ordering::SeqCst), "second session opened while first held");
            assert_eq!(first.mode(), EvalMode::StochasticEstimation);
            drop(first);

            assert_eq!(waiter.join().unwrap(), EvalMode::Deterministic);
        });
        assert!(entered.load(Ordering::SeqCst));
        assert_eq!(s.current_mode(), EvalMode::Deterministic);
    }

    #[test]
    fn test_panic_inside_session_restores_mode() {
        let s = scoring(0.4);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _session = s.session().into_stochastic();
            panic!("forward pass failed");
        }));
        assert!(outcome.is_err());
        assert_eq!(s.current_mode(), EvalMode::Deterministic);
    }

    #[test]
    fn test_capture_shapes_match() {
        let s = scoring(0.4);
        let layer = s.resolve(LayerSelector::HeadConv).unwrap();
        let session = s.session().into_attribution();
        let capture = session.capture(&image(), layer, 1).unwrap();
        assert_eq!(capture.activation.dims(), capture.gradient.dims());
        assert_eq!(capture.activation.dims()[1], 8);
    }

    #[test]
    fn test_capture_rejects_bad_class() {
        let s = scoring(0.0);
        let layer = s.resolve(LayerSelector::HeadConv).unwrap();
        let session = s.session().into_attribution();
        let err = session.capture(&image(), layer, 4).unwrap_err();
        assert!(matches!(err, TriageError::ClassIndexOutOfRange { index: 4, classes: 4 }));
    }

    #[test]
    fn test_unresolved_selector_is_reported() {
        let s = scoring(0.0);
        assert!(matches!(
            s.resolve(LayerSelector::Block(7)),
            Err(TriageError::ExplanationLayerUnresolved(LayerSelector::Block(7)))
        ));
    }
}
