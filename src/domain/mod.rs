// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Pure Rust types and rules of the triage system.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O
//   - Only plain structs, enums, traits and pure functions
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

// Accept/reject verdict and triage scoring
pub mod decision;

// Error taxonomy shared by every layer
pub mod error;

// The result returned to the transport layer
pub mod inference_result;

// Modality ↔ labels ↔ explanation layer lookup
pub mod modality;

// Core abstractions (traits) that other layers implement
pub mod traits;
