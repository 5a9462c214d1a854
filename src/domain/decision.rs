// ============================================================
// Layer 3 — Decision Policy
// ============================================================
// Turns (mean probabilities, uncertainty) into a verdict.
//
//   uncertainty <= threshold → ACCEPTED with a triage score
//   anything else            → REJECTED (no diagnosis surfaced)
//
// "Anything else" includes a non-finite uncertainty or threshold:
// NaN never compares, so it must never reach the accept branch.
//
// Triage score (0..=100, higher = attend sooner):
//
//   score = round_half_up(confidence * 70 + (1 - uncertainty) * 30)
//
// Confidence and uncertainty are first quantised to 4 decimals,
// the precision they are reported at, and the sum is computed in
// integer basis points. That makes the half-integer boundary
// exact: confidence 0.7 with uncertainty 0.05 is 77.5 → 78, never
// 77 because of float noise.
//
// Pure and deterministic: no I/O, no randomness.

use crate::domain::inference_result::{
    AcceptedDiagnosis, ClassProbability, InferenceResult, RejectedSample, REJECTION_REASON,
};
use crate::domain::modality::Modality;

/// Uncertainty above this is rejected. Tuned together with the
/// mean-of-per-class-std statistic; changing one means re-deriving
/// the other.
pub const DEFAULT_UNCERTAINTY_THRESHOLD: f32 = 0.15;

const CONFIDENCE_WEIGHT: i64 = 70;
const STABILITY_WEIGHT:  i64 = 30;
const BASIS_POINTS:      i64 = 10_000;

/// Index and value of the largest probability. Ties go to the
/// lowest index.
pub fn argmax(probs: &[f32]) -> Option<(usize, f32)> {
    probs
        .iter()
        .copied()
        .enumerate()
        .fold(None, |best, (i, p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((i, p)),
        })
}

fn to_basis_points(value: f32) -> i64 {
    (f64::from(value.clamp(0.0, 1.0)) * BASIS_POINTS as f64).round() as i64
}

pub fn triage_score(confidence: f32, uncertainty: f32) -> u8 {
    let c = to_basis_points(confidence);
    let u = to_basis_points(uncertainty);
    let weighted = c * CONFIDENCE_WEIGHT + (BASIS_POINTS - u) * STABILITY_WEIGHT;
    let score = (weighted + BASIS_POINTS / 2) / BASIS_POINTS;
    score.clamp(0, 100) as u8
}

pub fn decide(
    mean_probabilities: &[f32],
    uncertainty:        f32,
    modality:           Modality,
    threshold:          f32,
) -> InferenceResult {
    let accept = uncertainty.is_finite() && threshold.is_finite() && uncertainty <= threshold;
    if !accept {
        return InferenceResult::Rejected(RejectedSample {
            modality,
            reason:         REJECTION_REASON.to_string(),
            uncertainty,
            heatmap_base64: None,
        });
    }

    let labels = modality.labels();
    let Some((index, confidence)) = argmax(mean_probabilities) else {
        return InferenceResult::failure("empty probability vector");
    };
    if mean_probabilities.len() != labels.len() {
        return InferenceResult::failure(format!(
            "{} probabilities for {} {} labels",
            mean_probabilities.len(),
            labels.len(),
            modality
        ));
    }

    let all_probabilities = labels
        .iter()
        .zip(mean_probabilities)
        .map(|(label, &probability)| ClassProbability { label: label.to_string(), probability })
        .collect();

    InferenceResult::Accepted(AcceptedDiagnosis {
        modality,
        diagnosis:       labels[index].to_string(),
        diagnosis_index: index,
        confidence,
        uncertainty,
        triage_score:    triage_score(confidence, uncertainty),
        all_probabilities,
        heatmap_base64:  None,
    })
}
