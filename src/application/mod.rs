// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// a specific goal (triaging an image or provisioning weights).
//
// Rules for this layer:
//   - No ML math or model code here
//   - No UI or printing here (that's Layer 1)
//   - No direct file access beyond config loading
//     (weights belong to Layer 6)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// The per-request triage workflow
pub mod triage_use_case;

// Writing untrained weights for every role
pub mod provision_use_case;
