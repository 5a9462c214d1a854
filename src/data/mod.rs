// ============================================================
// Layer 4 — Image Pipeline
// ============================================================
// This layer handles everything between raw upload bytes and
// network-ready tensors, and back again for the overlay.
//
// The pipeline flows in this order:
//
//   image bytes (PNG / JPEG / TIFF)
//       │
//       ▼
//   ImagePreprocessor → decode, RGB, 224×224, ImageNet normalise
//       │
//       ▼
//   PreparedImage     → [1, 3, H, W] tensor + resized display copy
//       │
//       ▼
//   (ml layer: route, estimate, explain)
//       │
//       ▼
//   overlay           → JET colormap blend, PNG, base64
//
// Reference: image crate docs (imageops, DynamicImage)

/// Decodes and normalises uploaded images
pub mod preprocessor;

/// Renders saliency maps over the input image
pub mod overlay;
