// ============================================================
// Layer 4 — Saliency Overlay Rendering
// ============================================================
// Colours a saliency map with the JET colormap, blends it 50/50
// over the resized input and returns the result as a base64 PNG,
// the payload carried in `heatmap_base64`.
//
//   value 0.0 → dark blue, 0.5 → green/yellow, 1.0 → dark red
//
// The map is brought to the display size first if they differ.

use std::io::Cursor;

use base64::Engine as _;
use image::{imageops::FilterType, DynamicImage, ImageOutputFormat, Rgb, RgbImage};

use crate::domain::error::TriageError;
use crate::ml::saliency::SaliencyMap;

const HEAT_WEIGHT: f32 = 0.5;

/// JET colour for an 8-bit intensity.
pub fn jet(value: u8) -> Rgb<u8> {
    let v = f32::from(value) / 255.0;
    let channel = |offset: f32| ((1.5 - (4.0 * v - offset).abs()).clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Blend the coloured map over `display`.
pub fn blend(display: &RgbImage, map: &SaliencyMap) -> RgbImage {
    let (w, h) = display.dimensions();
    let mut heat = map.to_luma8();
    if heat.dimensions() != (w, h) {
        heat = image::imageops::resize(&heat, w, h, FilterType::Triangle);
    }

    RgbImage::from_fn(w, h, |x, y| {
        let base = display.get_pixel(x, y);
        let colour = jet(heat.get_pixel(x, y)[0]);
        let mix = |c: usize| {
            (f32::from(base[c]) * (1.0 - HEAT_WEIGHT) + f32::from(colour[c]) * HEAT_WEIGHT).round() as u8
        };
        Rgb([mix(0), mix(1), mix(2)])
    })
}

/// Encode an RGB image as PNG bytes.
pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, TriageError> {
    let dynamic = DynamicImage::ImageRgb8(img.clone());
    let mut cursor = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| TriageError::Render(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

pub fn encode_payload(png: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(png)
}

/// Inverse of `encode_payload`, for writing an overlay to disk.
pub fn decode_payload(payload: &str) -> Result<Vec<u8>, TriageError> {
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| TriageError::Render(format!("invalid heatmap payload: {e}")))
}

/// Blend, encode and base64 in one go.
pub fn render_payload(display: &RgbImage, map: &SaliencyMap) -> Result<String, TriageError> {
    let png = encode_png(&blend(display, map))?;
    Ok(encode_payload(&png))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(jet(0), Rgb([0, 0, 128]));
        assert_eq!(jet(255), Rgb([128, 0, 0]));
        let mid = jet(128);
        assert!(mid[1] > 200, "middle of the scale should be green-ish: {mid:?}");
    }

    #[test]
    fn test_zero_map_still_tints() {
        let display = RgbImage::from_pixel(4, 4, Rgb([200, 200, 200]));
        let out = blend(&display, &SaliencyMap::zeros(4, 4));
        assert_eq!(out.get_pixel(0, 0), &Rgb([100, 100, 164]));
    }

    #[test]
    fn test_map_is_resized_to_display() {
        let display = RgbImage::from_pixel(10, 6, Rgb([0, 0, 0]));
        let out = blend(&display, &SaliencyMap::zeros(224, 224));
        assert_eq!(out.dimensions(), (10, 6));
    }

    #[test]
    fn test_payload_is_a_png() {
        let display = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
        let map = SaliencyMap::normalized(2, 2, vec![0.0, 1.0, 2.0, 3.0]).unwrap();
        let payload = render_payload(&display, &map).unwrap();

        let png = decode_payload(&payload).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.to_rgb8().dimensions(), (8, 8));
    }

    #[test]
    fn test_bad_payload_is_rejected() {
        assert!(matches!(decode_payload("%%%"), Err(TriageError::Render(_))));
    }
}
