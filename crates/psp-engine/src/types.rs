//! Pipeline options and the aggregate result of a `process_patient` run.

use chrono::{DateTime, Utc};
use psp_alerts::Alert;
use psp_common::{AdverseEventType, Prediction, SafetyIndex};
use psp_ensemble::EnsemblePrediction;
use psp_hypothesis::MechanisticHypothesis;
use psp_validator::ValidationReport;
use std::collections::HashMap;

/// Which optional pipeline stages to run for a `process_patient` call.
#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    pub generate_hypotheses: bool,
    pub validate_predictions: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            generate_hypotheses: true,
            validate_predictions: true,
        }
    }
}

/// Complete result of running the prediction pipeline for a patient across
/// one or more adverse events: every artifact produced at every stage.
#[derive(Debug, Clone)]
pub struct PredictionResult {
    pub patient_id: String,
    pub adverse_events: Vec<AdverseEventType>,
    pub safety_indices: HashMap<AdverseEventType, SafetyIndex>,
    pub ensemble_predictions: HashMap<AdverseEventType, EnsemblePrediction>,
    pub individual_predictions: HashMap<AdverseEventType, Vec<Prediction>>,
    pub hypotheses: HashMap<AdverseEventType, Vec<MechanisticHypothesis>>,
    pub validation_reports: HashMap<AdverseEventType, Vec<ValidationReport>>,
    pub alerts: Vec<Alert>,
    pub session_id: String,
    pub pipeline_duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl PredictionResult {
    pub(crate) fn new(patient_id: impl Into<String>, adverse_events: Vec<AdverseEventType>) -> Self {
        Self {
            patient_id: patient_id.into(),
            adverse_events,
            safety_indices: HashMap::new(),
            ensemble_predictions: HashMap::new(),
            individual_predictions: HashMap::new(),
            hypotheses: HashMap::new(),
            validation_reports: HashMap::new(),
            alerts: Vec::new(),
            session_id: String::new(),
            pipeline_duration_ms: 0,
            timestamp: Utc::now(),
        }
    }
}
