// ============================================================
// Layer 5 — Evaluation Modes
// ============================================================
// A scoring function is always in exactly one of three modes:
//
//   Deterministic         — resting state, dropout off
//   StochasticEstimation  — dropout ON, batch-norm still frozen
//   GradientAttribution   — dropout off, gradients tracked
//
// Batch-norm never leaves inference behaviour in any mode: its
// running statistics are frozen parameters, not batch statistics.
//
// Mode changes only happen through a ModeSession (see scoring.rs).
// The session's type parameter is one of the marker types below,
// and only a Deterministic session can become an Attribution one,
// so "attribute while dropout is active" does not type-check.

/// Runtime view of the current mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    Deterministic,
    StochasticEstimation,
    GradientAttribution,
}

impl EvalMode {
    pub fn dropout_active(self) -> bool {
        matches!(self, EvalMode::StochasticEstimation)
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Type-level session state. Sealed: the three markers below are
/// the only states.
pub trait SessionState: sealed::Sealed {
    const MODE: EvalMode;
}

#[derive(Debug)]
pub struct Deterministic;

#[derive(Debug)]
pub struct Stochastic;

#[derive(Debug)]
pub struct Attribution;

impl sealed::Sealed for Deterministic {}
impl sealed::Sealed for Stochastic {}
impl sealed::Sealed for Attribution {}

impl SessionState for Deterministic {
    const MODE: EvalMode = EvalMode::Deterministic;
}

impl SessionState for Stochastic {
    const MODE: EvalMode = EvalMode::StochasticEstimation;
}

impl SessionState for Attribution {
    const MODE: EvalMode = EvalMode::GradientAttribution;
}
