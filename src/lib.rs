#![recursion_limit = "256"]

// ============================================================
// triage-vision
// ============================================================
// Multi-modality medical image triage:
//
//   image ─► router ─► modality expert ─► MC dropout ─► Grad-CAM
//                                              │            │
//                                              ▼            ▼
//                                     accept / reject   overlay PNG
//
// Layers (each only depends on the ones below it):
//   1. cli          — argument parsing, terminal report
//   2. application  — triage workflow, weight provisioning
//   3. domain       — modalities, decision policy, result shape
//   4. data         — image decoding and overlay rendering
//   5. ml           — networks, uncertainty, saliency (Burn)
//   6. infra        — weight files and the model registry

pub mod application;
pub mod cli;
pub mod data;
pub mod domain;
pub mod infra;
pub mod ml;
