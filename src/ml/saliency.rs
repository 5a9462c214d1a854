// ============================================================
// Layer 5 — Saliency Explainer (Grad-CAM)
// ============================================================
// Highlights the regions of the input that drove one class score:
//
//   1. activation A and gradient dS/dA at the explanation layer
//   2. channel weights   w_c = spatial mean of dS/dA_c
//   3. map               relu(Σ_c w_c · A_c)
//   4. bilinear resize to 224×224, min-max normalise to [0, 1]
//
// Always runs in deterministic mode with dropout off, so two
// explanations of the same input and class are identical.
// An expert whose explanation layer cannot be found degrades to
// an all-zero map instead of failing the request.
//
// Reference: Selvaraju et al. (2017) Grad-CAM

use burn::{
    prelude::*,
    tensor::{
        backend::AutodiffBackend,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};
use image::{GrayImage, Luma};

use crate::domain::error::TriageError;
use crate::domain::modality::LayerSelector;
use crate::ml::scoring::{to_host, ScoringFunction};

pub const SALIENCY_SIZE: usize = 224;

// Below this the map is treated as flat.
const FLAT_RANGE: f32 = 1e-12;

/// Row-major heat map, every value in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct SaliencyMap {
    width:  usize,
    height: usize,
    values: Vec<f32>,
}

impl SaliencyMap {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self { width, height, values: vec![0.0; width * height] }
    }

    /// Min-max normalise raw non-negative scores. A flat map, or one
    /// containing non-finite values, becomes all zeros.
    pub fn normalized(width: usize, height: usize, raw: Vec<f32>) -> Result<Self, TriageError> {
        if raw.len() != width * height {
            return Err(TriageError::Tensor(format!(
                "saliency grid has {} values for {width}x{height}",
                raw.len()
            )));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Ok(Self::zeros(width, height));
        }

        let (min, max) = raw
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = max - min;
        if raw.is_empty() || range <= FLAT_RANGE {
            return Ok(Self::zeros(width, height));
        }

        let values = raw.into_iter().map(|v| ((v - min) / range).clamp(0.0, 1.0)).collect();
        Ok(Self { width, height, values })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        (x < self.width && y < self.height).then(|| self.values[y * self.width + x])
    }

    pub fn is_all_zero(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }

    /// 8-bit grey image, 0 → black, 1 → white.
    pub fn to_luma8(&self) -> GrayImage {
        GrayImage::from_fn(self.width as u32, self.height as u32, |x, y| {
            let v = self.values[y as usize * self.width + x as usize];
            Luma([(v * 255.0).round() as u8])
        })
    }
}

pub fn explain<B: AutodiffBackend>(
    scoring:      &ScoringFunction<B>,
    selector:     LayerSelector,
    image:        &Tensor<B::InnerBackend, 4>,
    target_class: usize,
) -> Result<SaliencyMap, TriageError> {
    let classes = scoring.num_classes();
    if target_class >= classes {
        return Err(TriageError::ClassIndexOutOfRange { index: target_class, classes });
    }

    let layer = match scoring.resolve(selector) {
        Ok(layer) => layer,
        Err(e) => {
            tracing::warn!(role = scoring.role(), "{e}; returning an empty saliency map");
            return Ok(SaliencyMap::zeros(SALIENCY_SIZE, SALIENCY_SIZE));
        }
    };

    let capture = scoring.session().into_attribution().capture(image, layer, target_class)?;

    // ── Step 1: channel weights from pooled gradients ──
    let weights = capture.gradient.mean_dim(3).mean_dim(2);

    // ── Step 2: weighted channel sum, negatives clipped ──
    let cam = (capture.activation * weights).sum_dim(1).clamp_min(0.0);

    // ── Step 3: resize to display resolution ──
    let resized = interpolate(
        cam,
        [SALIENCY_SIZE, SALIENCY_SIZE],
        InterpolateOptions::new(InterpolateMode::Bilinear),
    );

    let map = SaliencyMap::normalized(SALIENCY_SIZE, SALIENCY_SIZE, to_host(resized)?)?;
    tracing::debug!(
        role = scoring.role(),
        class = target_class,
        layer = layer.stage(),
        empty = map.is_all_zero(),
        "Grad-CAM computed"
    );
    Ok(map)
}
