// ============================================================
// Layer 5 — Uncertainty Estimator (Monte-Carlo dropout)
// ============================================================
// Runs the same input through an expert `sample_count` times with
// dropout active and batch-norm frozen, softmaxes each pass, and
// reduces the samples to
//
//   mean_probabilities — per-class mean, used for the prediction
//   uncertainty        — mean over classes of the per-class sample
//                        standard deviation (N − 1 denominator)
//
// The only randomness is the dropout masks; the input is never
// perturbed. The scalar measures how much repeated stochastic
// passes DISAGREE. It is a frequency-of-disagreement proxy, not a
// Bayesian posterior, and it says nothing about distance from any
// ground truth. The rejection threshold is tuned against exactly
// this statistic.
//
// More samples make the estimate itself less noisy at a linear
// latency cost; 25 is the default.
//
// Reference: Gal & Ghahramani (2016) Dropout as a Bayesian Approximation

use burn::{prelude::*, tensor::activation::softmax, tensor::backend::AutodiffBackend};

use crate::domain::decision::argmax;
use crate::domain::error::TriageError;
use crate::ml::scoring::{to_host, ScoringFunction};

pub const DEFAULT_MC_SAMPLES: usize = 25;
/// Upper bound on a per-request sample count.
pub const MAX_MC_SAMPLES: usize = 1_000;

#[derive(Debug, Clone, PartialEq)]
pub struct UncertaintyResult {
    /// Length = class count, sums to 1
    pub mean_probabilities: Vec<f32>,
    /// ≥ 0; exactly 0 when every sample is identical
    pub uncertainty:        f32,
}

impl UncertaintyResult {
    /// Argmax class and its mean probability.
    pub fn predicted_class(&self) -> Option<(usize, f32)> {
        argmax(&self.mean_probabilities)
    }
}

pub fn estimate<B: AutodiffBackend>(
    scoring:      &ScoringFunction<B>,
    image:        &Tensor<B::InnerBackend, 4>,
    sample_count: usize,
) -> Result<UncertaintyResult, TriageError> {
    if !(1..=MAX_MC_SAMPLES).contains(&sample_count) {
        return Err(TriageError::InvalidSampleCount);
    }

    // Any early return drops the session, which restores the
    // deterministic mode.
    let session = scoring.session().into_stochastic();
    let mut samples = Vec::with_capacity(sample_count);
    for _ in 0..sample_count {
        let probs = softmax(session.sample(image), 1);
        samples.push(to_host(probs)?);
    }
    drop(session.into_deterministic());

    let result = reduce_samples(&samples)?;
    tracing::debug!(
        role = scoring.role(),
        samples = sample_count,
        uncertainty = result.uncertainty,
        "MC dropout estimate"
    );
    Ok(result)
}

/// Reduce softmax samples to their mean and mean-of-std.
///
/// Deviations are taken from the first sample (shifted-data
/// variance), so identical samples give exactly zero spread and a
/// mean equal to the sample itself.
pub fn reduce_samples(samples: &[Vec<f32>]) -> Result<UncertaintyResult, TriageError> {
    let first = samples
        .first()
        .ok_or(TriageError::InvalidSampleCount)?;
    let classes = first.len();
    if samples.iter().any(|s| s.len() != classes) {
        return Err(TriageError::Tensor("samples differ in class count".to_string()));
    }

    let n = samples.len() as f64;
    let mut mean_probabilities = Vec::with_capacity(classes);
    let mut std_sum = 0.0f64;

    for c in 0..classes {
        let origin = f64::from(first[c]);
        let (sum, sum_sq) = samples.iter().fold((0.0f64, 0.0f64), |(s, sq), sample| {
            let d = f64::from(sample[c]) - origin;
            (s + d, sq + d * d)
        });

        mean_probabilities.push((origin + sum / n) as f32);

        if samples.len() > 1 {
            let variance = ((sum_sq - sum * sum / n) / (n - 1.0)).max(0.0);
            std_sum += variance.sqrt();
        }
    }

    let uncertainty = if classes == 0 { 0.0 } else { (std_sum / classes as f64) as f32 };
    Ok(UncertaintyResult { mean_probabilities, uncertainty })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::modality::Architecture;
    use crate::ml::mode::EvalMode;
    use crate::ml::model::ExpertNetConfig;
    use crate::ml::TestBackend;
    use burn::tensor::Distribution;

    fn image() -> Tensor<<TestBackend as AutodiffBackend>::InnerBackend, 4> {
        Tensor::random([1, 3, 32, 32], Distribution::Uniform(-1.0, 1.0), &Default::default())
    }

    fn scoring(cfg: ExpertNetConfig) -> ScoringFunction<TestBackend> {
        let net = cfg.init(&Default::default());
        ScoringFunction::new("test-expert", cfg, net)
    }

    fn assert_sums_to_one(probs: &[f32]) {
        let total: f32 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-4, "sum = {total}");
    }

    #[test]
    fn test_reduce_two_opposite_samples() {
        let result = reduce_samples(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(result.mean_probabilities, vec![0.5, 0.5]);
        // each class: values {1, 0}, sample std = sqrt(0.5)
        assert!((result.uncertainty - 0.5f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_reduce_identical_samples_is_exactly_zero() {
        let sample = vec![0.1, 0.2, 0.3, 0.4];
        let samples = vec![sample.clone(); 25];
        let result = reduce_samples(&samples).unwrap();
        assert_eq!(result.uncertainty, 0.0);
        assert_eq!(result.mean_probabilities, sample);
    }

    #[test]
    fn test_reduce_single_sample() {
        let result = reduce_samples(&[vec![0.25, 0.75]]).unwrap();
        assert_eq!(result.uncertainty, 0.0);
        assert_eq!(result.predicted_class(), Some((1, 0.75)));
    }

    #[test]
    fn test_reduce_rejects_empty_and_ragged() {
        assert!(matches!(reduce_samples(&[]), Err(TriageError::InvalidSampleCount)));
        assert!(reduce_samples(&[vec![0.5, 0.5], vec![1.0]]).is_err());
    }

    #[test]
    fn test_zero_samples_is_an_error() {
        let s = scoring(ExpertNetConfig::tiny(Architecture::ResNet50, 9, 0.45));
        assert!(matches!(
            estimate(&s, &image(), 0),
            Err(TriageError::InvalidSampleCount)
        ));
    }

    #[test]
    fn test_oversized_sample_count_is_an_error() {
        let s = scoring(ExpertNetConfig::tiny(Architecture::ResNet50, 9, 0.45));
        for n in [MAX_MC_SAMPLES + 1, usize::MAX] {
            assert!(matches!(estimate(&s, &image(), n), Err(TriageError::InvalidSampleCount)));
        }
        assert_eq!(s.current_mode(), EvalMode::Deterministic);
    }

    #[test]
    fn test_without_dropout_uncertainty_is_zero() {
        let s = scoring(ExpertNetConfig::tiny(Architecture::ResNet50, 9, 0.0));
        let result = estimate(&s, &image(), 25).unwrap();
        assert_eq!(result.uncertainty, 0.0);
        assert_eq!(result.mean_probabilities.len(), 9);
        assert_sums_to_one(&result.mean_probabilities);
    }

    #[test]
    fn test_with_dropout_samples_disagree() {
        let mut cfg = ExpertNetConfig::tiny(Architecture::DenseNet121, 5, 0.5);
        // dropout straight on the pooled features
        cfg.hidden = None;
        let s = scoring(cfg);

        let result = estimate(&s, &image(), 25).unwrap();
        assert!(result.uncertainty > 0.0);
        assert_eq!(result.mean_probabilities.len(), 5);
        assert_sums_to_one(&result.mean_probabilities);
        assert_eq!(s.current_mode(), EvalMode::Deterministic);
    }

    #[test]
    fn test_any_sample_count_sums_to_one() {
        let s = scoring(ExpertNetConfig::tiny(Architecture::EfficientNetB2, 4, 0.4));
        for n in [1, 2, 7] {
            let result = estimate(&s, &image(), n).unwrap();
            assert!(result.uncertainty >= 0.0);
            assert_eq!(result.mean_probabilities.len(), 4);
            assert_sums_to_one(&result.mean_probabilities);
        }
    }
}
