//! Alert, severity, and escalation types produced by the alert engine.

use chrono::{DateTime, Utc};
use psp_common::AdverseEventType;
use serde::Serialize;
use std::collections::HashMap;

/// Alert severity, aligned with clinical urgency. Ordered so that
/// `severity >= AlertSeverity::Urgent` reads naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum AlertSeverity {
    Info = 0,
    Warning = 1,
    Urgent = 2,
    Critical = 3,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Urgent => "URGENT",
            AlertSeverity::Critical => "CRITICAL",
        }
    }
}

/// Category of safety alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertType {
    ThresholdBreach,
    RateOfChange,
    GradeEscalation,
    ModelDisagreement,
    ValidationFailure,
    TrendWorsening,
    BiomarkerSpike,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ThresholdBreach => "threshold_breach",
            AlertType::RateOfChange => "rate_of_change",
            AlertType::GradeEscalation => "grade_escalation",
            AlertType::ModelDisagreement => "model_disagreement",
            AlertType::ValidationFailure => "validation_failure",
            AlertType::TrendWorsening => "trend_worsening",
            AlertType::BiomarkerSpike => "biomarker_spike",
        }
    }
}

/// Lifecycle status of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
    Suppressed,
}

/// A safety alert generated from a Safety Index evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub alert_id: String,
    pub patient_id: String,
    pub adverse_event: AdverseEventType,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub status: AlertStatus,
    pub title: String,
    pub message: String,
    pub safety_index_score: f64,
    pub trigger_value: f64,
    pub threshold_value: f64,
    pub recommended_actions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub acknowledged_by: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Alert {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        alert_id: String,
        patient_id: String,
        adverse_event: AdverseEventType,
        alert_type: AlertType,
        severity: AlertSeverity,
        title: String,
        message: String,
        safety_index_score: f64,
        trigger_value: f64,
        threshold_value: f64,
        recommended_actions: Vec<String>,
    ) -> Self {
        Self {
            alert_id,
            patient_id,
            adverse_event,
            alert_type,
            severity,
            status: AlertStatus::Active,
            title,
            message,
            safety_index_score,
            trigger_value,
            threshold_value,
            recommended_actions,
            created_at: Utc::now(),
            acknowledged_at: None,
            resolved_at: None,
            acknowledged_by: String::new(),
            metadata: HashMap::new(),
        }
    }
}

/// Rule for escalating an alert left unacknowledged for too long.
#[derive(Debug, Clone)]
pub struct EscalationRule {
    pub after_minutes: i64,
    pub escalate_to_severity: AlertSeverity,
    pub notify_roles: Vec<String>,
    pub message_suffix: String,
}

/// A callback invoked synchronously for every newly generated alert.
/// A handler that panics or returns an error is logged and otherwise ignored;
/// it never aborts alert delivery to the remaining handlers.
pub type AlertHandler = Box<dyn Fn(&Alert) -> Result<(), String> + Send + Sync>;
