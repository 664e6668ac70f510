//! Record and event-type vocabulary for the audit trail.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Types of events recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditEventType {
    PredictionRequest,
    ModelCall,
    ModelResponse,
    Normalization,
    EnsembleAggregation,
    HypothesisGeneration,
    MechanisticValidation,
    SafetyIndexComputation,
    AlertGenerated,
    AlertAcknowledged,
    AlertResolved,
    ConfigurationChange,
    Error,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::PredictionRequest => "prediction_request",
            AuditEventType::ModelCall => "model_call",
            AuditEventType::ModelResponse => "model_response",
            AuditEventType::Normalization => "normalization",
            AuditEventType::EnsembleAggregation => "ensemble_aggregation",
            AuditEventType::HypothesisGeneration => "hypothesis_generation",
            AuditEventType::MechanisticValidation => "mechanistic_validation",
            AuditEventType::SafetyIndexComputation => "safety_index_computation",
            AuditEventType::AlertGenerated => "alert_generated",
            AuditEventType::AlertAcknowledged => "alert_acknowledged",
            AuditEventType::AlertResolved => "alert_resolved",
            AuditEventType::ConfigurationChange => "configuration_change",
            AuditEventType::Error => "error",
        }
    }
}

/// A JSON-valued map with deterministic (sorted) key order, used for content
/// hashing as well as storage of arbitrary input/output/parameter payloads.
pub type DataMap = BTreeMap<String, serde_json::Value>;

/// An immutable audit record. Once appended to the trail it is never
/// mutated; `content_hash`/`chain_hash` make tampering detectable.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub record_id: u64,
    pub event_type: AuditEventType,
    pub timestamp: DateTime<Utc>,
    pub patient_id: String,
    pub session_id: String,
    pub actor: String,
    pub input_data: DataMap,
    pub output_data: DataMap,
    pub parameters: DataMap,
    pub duration_ms: u64,
    pub parent_record_id: Option<u64>,
    pub content_hash: String,
    pub chain_hash: String,
}

/// Inputs to [`crate::AuditTrail::record`], gathered via builder methods so
/// callers only set the fields relevant to their event.
#[derive(Debug, Clone, Default)]
pub struct AuditEvent {
    pub patient_id: String,
    pub session_id: String,
    pub actor: String,
    pub input_data: DataMap,
    pub output_data: DataMap,
    pub parameters: DataMap,
    pub duration_ms: u64,
    pub parent_record_id: Option<u64>,
}

impl AuditEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patient_id(mut self, patient_id: impl Into<String>) -> Self {
        self.patient_id = patient_id.into();
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn input_data(mut self, input_data: DataMap) -> Self {
        self.input_data = input_data;
        self
    }

    pub fn output_data(mut self, output_data: DataMap) -> Self {
        self.output_data = output_data;
        self
    }

    pub fn parameters(mut self, parameters: DataMap) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn parent_record_id(mut self, parent_record_id: u64) -> Self {
        self.parent_record_id = Some(parent_record_id);
        self
    }
}

/// A single operation in a reconstructed prediction's provenance chain.
#[derive(Debug, Clone, Serialize)]
pub struct OperationSummary {
    pub record_id: u64,
    pub event_type: &'static str,
    pub actor: String,
    pub duration_ms: u64,
    pub input_summary: BTreeMap<String, String>,
    pub output_summary: BTreeMap<String, String>,
    pub parameters: DataMap,
}

/// Full reconstructed provenance for a prediction session.
#[derive(Debug, Clone, Serialize)]
pub struct Provenance {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub record_count: usize,
    pub patient_id: String,
    pub operations: Vec<OperationSummary>,
}

/// Aggregate statistics over the audit trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    pub total_records: usize,
    pub unique_patients: usize,
    pub unique_sessions: usize,
    pub event_counts: BTreeMap<String, usize>,
    pub oldest_timestamp: Option<DateTime<Utc>>,
    pub newest_timestamp: Option<DateTime<Utc>>,
}
