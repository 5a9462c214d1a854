// ============================================================
// Layer 3 — Modality Registry
// ============================================================
// Static mapping of modality ↔ class labels ↔ explanation layer.
//
// The label order IS the class-index contract: label i names
// output i of that modality's scoring function. Never reorder.
//
// Router output order: 0 brain, 1 lung, 2 skin, 3 ecg.
//
// Each architecture family designates a different internal layer
// as its last spatial feature layer before pooling:
//   EfficientNet  → the 1x1 head convolution   (HeadConv)
//   DenseNet      → the last dense block        (LastBlock)
//   ResNet        → the last residual stage     (LastBlock)

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::TriageError;

const BRAIN_LABELS: &[&str] = &["Glioma", "Meningioma", "No Tumor", "Pituitary"];

const LUNG_LABELS: &[&str] = &[
    "Bacterial Pneumonia",
    "Corona Virus Disease",
    "Normal",
    "Tuberculosis",
    "Viral Pneumonia",
];

const SKIN_LABELS: &[&str] = &[
    "Actinic Keratosis",
    "Atopic Dermatitis",
    "Benign Keratosis",
    "Dermatofibroma",
    "Melanocytic Nevus",
    "Melanoma",
    "Squamous Cell Carcinoma",
    "Tinea Ringworm",
    "Vascular Lesion",
];

const ECG_LABELS: &[&str] = &["Abnormal", "Infarction", "Normal", "History of MI"];

/// Weight file stem of the modality router.
pub const ROUTER_WEIGHT_FILE: &str = "best_ModalityRouter";

// ─── Modality ─────────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Brain,
    Lung,
    Skin,
    Ecg,
}

impl Modality {
    /// All modalities in router output order.
    pub const ALL: [Modality; 4] = [Modality::Brain, Modality::Lung, Modality::Skin, Modality::Ecg];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Brain => "brain",
            Modality::Lung  => "lung",
            Modality::Skin  => "skin",
            Modality::Ecg   => "ecg",
        }
    }

    /// Map a router argmax back to a modality.
    pub fn from_router_index(index: usize) -> Result<Self, TriageError> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| TriageError::UnknownModality(format!("router index {index}")))
    }

    /// Ordered class labels for this modality.
    pub fn labels(&self) -> &'static [&'static str] {
        match self {
            Modality::Brain => BRAIN_LABELS,
            Modality::Lung  => LUNG_LABELS,
            Modality::Skin  => SKIN_LABELS,
            Modality::Ecg   => ECG_LABELS,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.labels().len()
    }

    pub fn architecture(&self) -> Architecture {
        match self {
            Modality::Brain => Architecture::EfficientNetB2,
            Modality::Lung  => Architecture::DenseNet121,
            Modality::Skin  => Architecture::ResNet50,
            Modality::Ecg   => Architecture::EfficientNetB0,
        }
    }

    /// The layer Grad-CAM attributes to for this modality's expert.
    pub fn explanation_layer(&self) -> LayerSelector {
        self.architecture().explanation_layer()
    }

    /// Weight file stem inside the models directory.
    pub fn weight_file(&self) -> &'static str {
        match self {
            Modality::Brain => "best_BrainExpert",
            Modality::Lung  => "best_LungExpert",
            Modality::Skin  => "best_SkinExpert",
            Modality::Ecg   => "best_ECGExpert",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "brain" => Ok(Modality::Brain),
            "lung"  => Ok(Modality::Lung),
            "skin"  => Ok(Modality::Skin),
            "ecg"   => Ok(Modality::Ecg),
            _       => Err(TriageError::UnknownModality(s.to_string())),
        }
    }
}

// ─── Architecture families ────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    EfficientNetB0,
    EfficientNetB2,
    DenseNet121,
    ResNet34,
    ResNet50,
}

impl Architecture {
    pub fn explanation_layer(&self) -> LayerSelector {
        match self {
            Architecture::EfficientNetB0 | Architecture::EfficientNetB2 => LayerSelector::HeadConv,
            Architecture::DenseNet121
            | Architecture::ResNet34
            | Architecture::ResNet50 => LayerSelector::LastBlock,
        }
    }
}

// ─── LayerSelector ────────────────────────────────────────────────────────────
/// Declarative name of a network's explanation layer.
///
/// Resolved against a concrete network into a layer handle; resolution
/// can fail when the network does not have the named layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerSelector {
    /// The 1x1 convolution that follows the last block.
    HeadConv,
    /// The last feature block.
    LastBlock,
    /// A feature block by zero-based index.
    Block(usize),
}

// ─── Lookup by name ───────────────────────────────────────────────────────────
pub fn labels_for(modality: &str) -> Result<&'static [&'static str], TriageError> {
    Ok(modality.parse::<Modality>()?.labels())
}

pub fn explanation_layer_selector(modality: &str) -> Result<LayerSelector, TriageError> {
    Ok(modality.parse::<Modality>()?.explanation_layer())
}
