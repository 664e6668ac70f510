//! Top-level orchestrator for the patient safety prediction pipeline.
//!
//! Wires together the knowledge graph, prompt router, secure gateway,
//! response normalizer, mechanistic validator, ensemble aggregator, risk
//! scorer, hypothesis generator, alert engine, and audit trail into the
//! single `process_patient` entry point. No HTTP listener and no CLI live
//! here; this crate is a library meant to be embedded by a service layer.

mod engine;
mod types;

pub use engine::PSPEngine;
pub use types::{PredictionResult, ProcessOptions};
