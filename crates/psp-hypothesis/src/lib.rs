//! Generates mechanistic safety hypotheses explaining *why* a patient is at
//! risk, by walking the knowledge graph upstream from a predicted adverse
//! event and matching activated entities against elevated biomarkers.

mod generator;
mod types;

pub use generator::HypothesisGenerator;
pub use types::{EvidenceLevel, MechanisticHypothesis};
