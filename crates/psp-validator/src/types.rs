//! Output types produced by the mechanistic validator.

use chrono::{DateTime, Utc};

/// Outcome of a single mechanistic check or the overall validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Plausible,
    Implausible,
    InsufficientData,
}

/// Result of one of the five mechanistic checks.
#[derive(Debug, Clone)]
pub struct ValidationCheck {
    pub check_name: String,
    pub result: ValidationResult,
    pub details: String,
    pub confidence: f64,
}

impl ValidationCheck {
    pub fn new(check_name: impl Into<String>, result: ValidationResult, details: impl Into<String>, confidence: f64) -> Self {
        Self {
            check_name: check_name.into(),
            result,
            details: details.into(),
            confidence,
        }
    }
}

/// Suggested score/confidence adjustments from an Implausible or Plausible
/// overall result. Advisory only; the validator never blocks a prediction.
#[derive(Debug, Clone, Default)]
pub struct ValidationAdjustments {
    pub suggested_score_multiplier: Option<f64>,
    pub suggested_confidence_multiplier: Option<f64>,
}

/// Full report of a prediction's mechanistic plausibility.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub prediction_model_id: String,
    pub patient_id: String,
    pub adverse_event: psp_common::AdverseEventType,
    pub overall_result: ValidationResult,
    pub overall_confidence: f64,
    pub checks: Vec<ValidationCheck>,
    pub warnings: Vec<String>,
    pub adjustments: ValidationAdjustments,
    pub timestamp: DateTime<Utc>,
}

impl ValidationReport {
    /// Valid and Plausible are both non-blocking outcomes.
    pub fn is_valid(&self) -> bool {
        matches!(self.overall_result, ValidationResult::Valid | ValidationResult::Plausible)
    }
}
