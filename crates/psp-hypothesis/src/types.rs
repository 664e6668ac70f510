//! Output types produced by the hypothesis generator.

use chrono::{DateTime, Utc};
use psp_common::AdverseEventType;

/// Strength of evidence supporting a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceLevel {
    /// Supported by KG pathway + model + biomarkers.
    Strong,
    /// Supported by KG pathway + one of model/biomarkers.
    Moderate,
    /// Supported by model alone or a partial KG match.
    Weak,
    /// Novel hypothesis from model reasoning only.
    Speculative,
}

impl EvidenceLevel {
    pub fn multiplier(&self) -> f64 {
        match self {
            EvidenceLevel::Strong => 1.0,
            EvidenceLevel::Moderate => 0.7,
            EvidenceLevel::Weak => 0.4,
            EvidenceLevel::Speculative => 0.2,
        }
    }
}

/// A mechanistic hypothesis explaining a predicted adverse event: a specific
/// biological pathway or mechanism believed to be contributing to risk.
#[derive(Debug, Clone)]
pub struct MechanisticHypothesis {
    pub hypothesis_id: String,
    pub patient_id: String,
    pub adverse_event: AdverseEventType,
    pub title: String,
    pub mechanism_chain: Vec<String>,
    pub mechanism_description: String,
    pub supporting_evidence: Vec<String>,
    pub evidence_level: EvidenceLevel,
    pub confidence: f64,
    pub testable_predictions: Vec<String>,
    pub suggested_biomarkers: Vec<String>,
    pub therapeutic_implications: Vec<String>,
    pub timestamp: DateTime<Utc>,
}
