// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Handles the concerns that don't belong in any business layer:
//
//   weight_store.rs — Saving and loading network weights
//                     Uses Burn's CompactRecorder for the
//                     parameters and a JSON sidecar with the
//                     ExpertNetConfig, checked on load.
//
//   model_store.rs  — The model registry
//                     Loads the router and the four experts
//                     once, validates them, and hands out the
//                     shared ExpertSet. Requests before that
//                     get NotReady.
//
// Reference: Rust Book §7 (Modules)
//            Burn Book §5 (Records and Checkpointing)

/// Weight files and architecture sidecars
pub mod weight_store;

/// Load-once registry of router and experts
pub mod model_store;
