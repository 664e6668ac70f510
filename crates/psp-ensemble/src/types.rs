//! Output types produced by the ensemble aggregator.

use chrono::{DateTime, Utc};
use psp_common::{AdverseEventType, Prediction};

/// Disagreement analysis across a set of model predictions.
#[derive(Debug, Clone)]
pub struct DisagreementReport {
    pub is_disagreement: bool,
    pub disagreement_score: f64,
    pub max_divergence: f64,
    pub divergent_pair: (String, String),
    pub analysis: String,
}

impl DisagreementReport {
    pub fn none() -> Self {
        Self {
            is_disagreement: false,
            disagreement_score: 0.0,
            max_divergence: 0.0,
            divergent_pair: (String::new(), String::new()),
            analysis: String::new(),
        }
    }
}

/// Calibration quality metrics for the ensemble.
#[derive(Debug, Clone)]
pub struct CalibrationMetrics {
    pub mean_confidence: f64,
    pub confidence_spread: f64,
    pub calibration_adjustment: f64,
    pub effective_confidence: f64,
}

/// Which aggregation strategy produced an `EnsemblePrediction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMethod {
    ConfidenceWeighted,
    Median,
    ConservativeMax,
    SingleModel,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::ConfidenceWeighted => "confidence_weighted",
            AggregationMethod::Median => "median",
            AggregationMethod::ConservativeMax => "conservative_max",
            AggregationMethod::SingleModel => "single_model",
        }
    }
}

/// Aggregated prediction from the ensemble, with uncertainty quantification.
#[derive(Debug, Clone)]
pub struct EnsemblePrediction {
    pub patient_id: String,
    pub adverse_event: AdverseEventType,
    pub risk_score: f64,
    pub confidence: f64,
    pub uncertainty_lower: f64,
    pub uncertainty_upper: f64,
    pub individual_predictions: Vec<Prediction>,
    pub disagreement: DisagreementReport,
    pub calibration: CalibrationMetrics,
    pub aggregation_method: AggregationMethod,
    pub reasoning_summary: String,
    pub combined_key_drivers: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl EnsemblePrediction {
    /// Inter-model agreement, `1.0` meaning unanimous.
    pub fn model_agreement(&self) -> f64 {
        1.0 - self.disagreement.disagreement_score
    }
}
