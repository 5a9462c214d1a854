// ============================================================
// Layer 1 — Human-readable Report
// ============================================================
// Formats an InferenceResult for the terminal:
//
//   Status:      ACCEPTED
//   Modality:    brain
//   Diagnosis:   No Tumor
//   Confidence:  70.0%
//   Uncertainty: 5.0%
//   Triage:      78 / 100
//
//   Probabilities:
//     No Tumor               70.0%  ██████████████
//     Glioma                 10.0%  ██
//
// Probabilities are listed highest first.

use std::fmt::Write as _;

use crate::domain::inference_result::{ClassProbability, InferenceResult};

const BAR_WIDTH: f32 = 20.0;

pub fn render(result: &InferenceResult) -> String {
    let mut out = String::new();
    // fmt::Write on a String cannot fail
    let _ = write_report(&mut out, result);
    out
}

fn write_report(out: &mut String, result: &InferenceResult) -> std::fmt::Result {
    match result {
        InferenceResult::Accepted(a) => {
            writeln!(out, "Status:      ACCEPTED")?;
            writeln!(out, "Modality:    {}", a.modality)?;
            writeln!(out, "Diagnosis:   {}", a.diagnosis)?;
            writeln!(out, "Confidence:  {:.1}%", a.confidence * 100.0)?;
            writeln!(out, "Uncertainty: {:.1}%", a.uncertainty * 100.0)?;
            writeln!(out, "Triage:      {} / 100", a.triage_score)?;
            writeln!(out)?;
            writeln!(out, "Probabilities:")?;
            for p in sorted(&a.all_probabilities) {
                let bar = "█".repeat((p.probability * BAR_WIDTH).round() as usize);
                writeln!(out, "  {:<22} {:>5.1}%  {bar}", p.label, p.probability * 100.0)?;
            }
        }
        InferenceResult::Rejected(r) => {
            writeln!(out, "Status:      REJECTED")?;
            writeln!(out, "Modality:    {}", r.modality)?;
            writeln!(out, "Reason:      {}", r.reason)?;
            writeln!(out, "Uncertainty: {:.1}%", r.uncertainty * 100.0)?;
            writeln!(out, "Refer this image for manual review.")?;
        }
        InferenceResult::Error(e) => {
            writeln!(out, "Status:      ERROR")?;
            writeln!(out, "Diagnosis:   {}", e.diagnosis)?;
            writeln!(out, "Error:       {}", e.error)?;
        }
    }

    let heatmap = if result.heatmap_base64().is_some() { "attached" } else { "none" };
    writeln!(out, "Heatmap:     {heatmap}")
}

fn sorted(probs: &[ClassProbability]) -> Vec<&ClassProbability> {
    let mut sorted: Vec<&ClassProbability> = probs.iter().collect();
    sorted.sort_by(|a, b| b.probability.total_cmp(&a.probability));
    sorted
}
