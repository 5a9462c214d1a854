// ============================================================
// Layer 4 — Image Preprocessor
// ============================================================
// Turns an uploaded image payload into the network input.
//
// Any format the decoder understands (PNG, JPEG, TIFF) and any
// colour type is accepted; everything is converted to 8-bit RGB
// first so grayscale scans and RGBA screenshots behave the same.
//
// Steps (applied in order):
//   1. Decode the raw bytes
//   2. Convert to RGB
//   3. Resize to 224×224 (bilinear, aspect ratio not preserved)
//   4. Scale to [0, 1] and normalise per channel with the
//      ImageNet mean / std the networks were trained with
//   5. Lay out channel-first: [1, 3, H, W]
//
// The resized RGB image is kept as well; the saliency overlay is
// drawn on top of it.

use burn::prelude::*;
use image::{imageops::FilterType, RgbImage};

use crate::domain::error::TriageError;

pub const INPUT_SIZE: u32 = 224;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD:  [f32; 3] = [0.229, 0.224, 0.225];

/// Decoded input ready for the networks.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Resized RGB image, for rendering the overlay
    pub display: RgbImage,
    /// Normalised pixels, channel-first, length 3·H·W
    pub pixels:  Vec<f32>,
}

impl PreparedImage {
    pub fn width(&self) -> usize {
        self.display.width() as usize
    }

    pub fn height(&self) -> usize {
        self.display.height() as usize
    }

    /// [1, 3, H, W] input tensor.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 4> {
        let data = TensorData::new(self.pixels.clone(), [1, 3, self.height(), self.width()]);
        Tensor::from_data(data, device)
    }
}

pub struct ImagePreprocessor {
    size: u32,
}

impl ImagePreprocessor {
    pub fn new() -> Self {
        Self { size: INPUT_SIZE }
    }

    /// Smaller inputs keep unit tests fast.
    pub fn with_size(size: u32) -> Self {
        Self { size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn prepare(&self, bytes: &[u8]) -> Result<PreparedImage, TriageError> {
        if bytes.is_empty() {
            return Err(TriageError::Decode("empty image payload".to_string()));
        }

        // ── Step 1-2: decode and convert ──
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| TriageError::Decode(e.to_string()))?
            .to_rgb8();

        // ── Step 3: resize ──
        let display = image::imageops::resize(&decoded, self.size, self.size, FilterType::Triangle);

        // ── Step 4-5: normalise, channel-first ──
        let plane = (self.size * self.size) as usize;
        let mut pixels = vec![0.0f32; 3 * plane];
        for (i, px) in display.pixels().enumerate() {
            for c in 0..3 {
                let v = f32::from(px[c]) / 255.0;
                pixels[c * plane + i] = (v - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            }
        }

        tracing::debug!(
            source_width = decoded.width(),
            source_height = decoded.height(),
            size = self.size,
            "Image prepared"
        );
        Ok(PreparedImage { display, pixels })
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageOutputFormat::Png)
        .unwrap();
    out
}
