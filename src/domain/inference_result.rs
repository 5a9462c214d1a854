// ============================================================
// Layer 3 — Inference Result
// ============================================================
// The terminal artifact handed back to the transport layer.
//
// Three shapes, tagged by "status" when serialised:
//
//   ACCEPTED — modality, diagnosis, diagnosis_index, confidence,
//              uncertainty, triage_score, all_probabilities,
//              heatmap_base64
//   REJECTED — modality, reason, uncertainty, heatmap_base64
//              (no diagnosis field exists on this variant, so a
//              rejected sample can never leak one)
//   ERROR    — diagnosis "Analysis Failed", confidence 0,
//              uncertainty 1, error message, no heatmap
//
// Values are kept at full precision in memory; the JSON form
// reports probabilities, confidence and uncertainty at 4 decimals.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::domain::modality::Modality;

pub const REJECTION_REASON: &str = "High Uncertainty";
pub const FAILED_DIAGNOSIS: &str = "Analysis Failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceStatus {
    Accepted,
    Rejected,
    Error,
}

/// One entry of the label → probability map.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbability {
    pub label:       String,
    pub probability: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedDiagnosis {
    pub modality:        Modality,
    pub diagnosis:       String,
    pub diagnosis_index: usize,
    #[serde(serialize_with = "rounded")]
    pub confidence:      f32,
    #[serde(serialize_with = "rounded")]
    pub uncertainty:     f32,
    pub triage_score:    u8,
    #[serde(serialize_with = "probability_map")]
    pub all_probabilities: Vec<ClassProbability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heatmap_base64:  Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedSample {
    pub modality:       Modality,
    pub reason:         String,
    #[serde(serialize_with = "rounded")]
    pub uncertainty:    f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heatmap_base64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedInference {
    pub diagnosis:   String,
    pub confidence:  f32,
    pub uncertainty: f32,
    pub error:       String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InferenceResult {
    Accepted(AcceptedDiagnosis),
    Rejected(RejectedSample),
    Error(FailedInference),
}

impl InferenceResult {
    /// Build the ERROR shape from any displayable failure.
    pub fn failure(error: impl std::fmt::Display) -> Self {
        InferenceResult::Error(FailedInference {
            diagnosis:   FAILED_DIAGNOSIS.to_string(),
            confidence:  0.0,
            uncertainty: 1.0,
            error:       error.to_string(),
        })
    }

    pub fn status(&self) -> InferenceStatus {
        match self {
            InferenceResult::Accepted(_) => InferenceStatus::Accepted,
            InferenceResult::Rejected(_) => InferenceStatus::Rejected,
            InferenceResult::Error(_)    => InferenceStatus::Error,
        }
    }

    pub fn modality(&self) -> Option<Modality> {
        match self {
            InferenceResult::Accepted(a) => Some(a.modality),
            InferenceResult::Rejected(r) => Some(r.modality),
            InferenceResult::Error(_)    => None,
        }
    }

    pub fn uncertainty(&self) -> f32 {
        match self {
            InferenceResult::Accepted(a) => a.uncertainty,
            InferenceResult::Rejected(r) => r.uncertainty,
            InferenceResult::Error(e)    => e.uncertainty,
        }
    }

    pub fn heatmap_base64(&self) -> Option<&str> {
        match self {
            InferenceResult::Accepted(a) => a.heatmap_base64.as_deref(),
            InferenceResult::Rejected(r) => r.heatmap_base64.as_deref(),
            InferenceResult::Error(_)    => None,
        }
    }

    /// Attach the rendered overlay. ERROR results never carry one.
    pub fn with_overlay(mut self, payload: String) -> Self {
        match &mut self {
            InferenceResult::Accepted(a) => a.heatmap_base64 = Some(payload),
            InferenceResult::Rejected(r) => r.heatmap_base64 = Some(payload),
            InferenceResult::Error(_)    => {}
        }
        self
    }
}

fn round4(value: f32) -> f64 {
    (f64::from(value) * 10_000.0).round() / 10_000.0
}

fn rounded<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round4(*value))
}

// Serialised as a JSON object in label order.
fn probability_map<S: Serializer>(
    probs:      &[ClassProbability],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(probs.len()))?;
    for p in probs {
        map.serialize_entry(&p.label, &round4(p.probability))?;
    }
    map.end()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected() -> InferenceResult {
        InferenceResult::Rejected(RejectedSample {
            modality:       Modality::Skin,
            reason:         REJECTION_REASON.to_string(),
            uncertainty:    0.212_345_6,
            heatmap_base64: None,
        })
    }

    #[test]
    fn test_rejected_json_has_no_diagnosis() {
        let json = serde_json::to_value(rejected()).unwrap();
        assert_eq!(json["status"], "REJECTED");
        assert_eq!(json["modality"], "skin");
        assert_eq!(json["reason"], "High Uncertainty");
        assert_eq!(json["uncertainty"], 0.2123);
        assert!(json.get("diagnosis").is_none());
        assert!(json.get("triage_score").is_none());
    }

    #[test]
    fn test_with_overlay_sets_payload() {
        let result = rejected().with_overlay("aGVhdG1hcA==".to_string());
        assert_eq!(result.heatmap_base64(), Some("aGVhdG1hcA=="));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["heatmap_base64"], "aGVhdG1hcA==");
    }

    #[test]
    fn test_failure_shape() {
        let result = InferenceResult::failure("could not decode image: bad header")
            .with_overlay("ignored".to_string());
        assert_eq!(result.status(), InferenceStatus::Error);
        assert_eq!(result.heatmap_base64(), None);
        assert_eq!(result.uncertainty(), 1.0);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "ERROR");
        assert_eq!(json["diagnosis"], "Analysis Failed");
        assert_eq!(json["confidence"], 0.0);
        assert_eq!(json["error"], "could not decode image: bad header");
    }

    #[test]
    fn test_probability_map_keeps_label_order() {
        let accepted = InferenceResult::Accepted(AcceptedDiagnosis {
            modality:        Modality::Ecg,
            diagnosis:       "Normal".to_string(),
            diagnosis_index: 2,
            confidence:      0.6,
            uncertainty:     0.01,
            triage_score:    71,
            all_probabilities: Modality::Ecg
                .labels()
                .iter()
                .zip([0.1f32, 0.2, 0.6, 0.1])
                .map(|(l, p)| ClassProbability { label: l.to_string(), probability: p })
                .collect(),
            heatmap_base64: None,
        });
        let text = serde_json::to_string(&accepted).unwrap();
        let abnormal = text.find("\"Abnormal\"").unwrap();
        let history  = text.find("\"History of MI\"").unwrap();
        assert!(abnormal < history);
        assert!(text.contains("\"status\":\"ACCEPTED\""));
    }
}
