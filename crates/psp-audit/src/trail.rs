//! Append-only, hash-chained audit trail.

use crate::types::{
    AuditEvent, AuditEventType, AuditRecord, AuditSummary, DataMap, OperationSummary, Provenance,
};
use chrono::{DateTime, Utc};
use psp_common::config::AuditConfig;
use psp_common::{Error, Result};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

const GENESIS: &str = "genesis";

struct Inner {
    records: Vec<AuditRecord>,
    record_counter: u64,
    session_counter: u64,
    last_chain_hash: String,
}

/// Immutable, append-only audit trail for full prediction reproducibility.
///
/// Every record is content-hashed and chained to the previous record's hash,
/// so `verify_chain_integrity` can detect any after-the-fact tampering.
/// Records beyond `max_records` are archived: logged, then dropped from the
/// in-memory trail. This crate does not persist archived records anywhere;
/// a durable archive sink is left to the embedding application.
pub struct AuditTrail {
    max_records: usize,
    inner: Mutex<Inner>,
}

impl AuditTrail {
    pub fn new(config: &AuditConfig) -> Self {
        tracing::info!(max_records = config.max_records, "audit trail initialized");
        Self {
            max_records: config.max_records,
            inner: Mutex::new(Inner {
                records: Vec::new(),
                record_counter: 0,
                session_counter: 0,
                last_chain_hash: GENESIS.to_string(),
            }),
        }
    }

    /// Start a new audit session for a patient, recording a session-start
    /// event, and return the session ID.
    pub fn start_session(&self, patient_id: &str) -> String {
        let session_id = {
            let mut inner = self.inner.lock().unwrap();
            inner.session_counter += 1;
            format!("SESSION-{:08}", inner.session_counter)
        };

        let mut input_data = DataMap::new();
        input_data.insert("action".to_string(), json!("session_start"));

        self.record(
            AuditEventType::PredictionRequest,
            AuditEvent::new()
                .patient_id(patient_id)
                .session_id(session_id.clone())
                .actor("system")
                .input_data(input_data),
        );

        session_id
    }

    /// Append a record to the trail and return its record ID.
    pub fn record(&self, event_type: AuditEventType, event: AuditEvent) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.record_counter += 1;
        let record_id = inner.record_counter;

        let content = content_value(
            record_id,
            event_type,
            &event.patient_id,
            &event.session_id,
            &event.actor,
            &event.input_data,
            &event.output_data,
            &event.parameters,
            event.duration_ms,
            event.parent_record_id,
        );
        let content_hash = compute_hash(&content);
        let chain_hash = compute_hash_str(&format!("{}:{}", inner.last_chain_hash, content_hash));

        let record = AuditRecord {
            record_id,
            event_type,
            timestamp: Utc::now(),
            patient_id: event.patient_id,
            session_id: event.session_id,
            actor: event.actor,
            input_data: event.input_data,
            output_data: event.output_data,
            parameters: event.parameters,
            duration_ms: event.duration_ms,
            parent_record_id: event.parent_record_id,
            content_hash,
            chain_hash: chain_hash.clone(),
        };

        tracing::debug!(
            record_id,
            event_type = event_type.as_str(),
            patient_id = %record.patient_id,
            session_id = %record.session_id,
            "audit record appended"
        );

        inner.records.push(record);
        inner.last_chain_hash = chain_hash;

        if inner.records.len() > self.max_records {
            let excess = inner.records.len() - self.max_records;
            Self::archive_oldest(&mut inner.records, excess);
        }

        record_id
    }

    fn archive_oldest(records: &mut Vec<AuditRecord>, count: usize) {
        let archived: Vec<AuditRecord> = records.drain(..count).collect();
        if let (Some(first), Some(last)) = (archived.first(), archived.last()) {
            tracing::info!(
                count = archived.len(),
                first_id = first.record_id,
                last_id = last.record_id,
                "archived audit records"
            );
        }
    }

    /// Look up a single record by ID.
    pub fn get_record(&self, record_id: u64) -> Option<AuditRecord> {
        self.inner
            .lock()
            .unwrap()
            .records
            .iter()
            .find(|r| r.record_id == record_id)
            .cloned()
    }

    /// All records for a session, in chronological order.
    pub fn get_session_records(&self, session_id: &str) -> Vec<AuditRecord> {
        self.inner
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect()
    }

    /// All records for a patient, optionally filtered by event type and/or a
    /// minimum timestamp.
    pub fn get_patient_records(
        &self,
        patient_id: &str,
        event_type: Option<AuditEventType>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<AuditRecord> {
        self.inner
            .lock()
            .unwrap()
            .records
            .iter()
            .filter(|r| r.patient_id == patient_id)
            .filter(|r| event_type.map(|t| r.event_type == t).unwrap_or(true))
            .filter(|r| since.map(|s| r.timestamp >= s).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Reconstruct the full chain of operations for a prediction session.
    pub fn get_prediction_provenance(&self, session_id: &str) -> Result<Provenance> {
        let records = self.get_session_records(session_id);
        let first = records
            .first()
            .ok_or_else(|| Error::Audit(format!("session '{session_id}' not found")))?;
        let last = records.last().unwrap();

        let operations = records
            .iter()
            .map(|r| OperationSummary {
                record_id: r.record_id,
                event_type: r.event_type.as_str(),
                actor: r.actor.clone(),
                duration_ms: r.duration_ms,
                input_summary: summarize_data(&r.input_data, 5),
                output_summary: summarize_data(&r.output_data, 5),
                parameters: r.parameters.clone(),
            })
            .collect();

        Ok(Provenance {
            session_id: session_id.to_string(),
            start_time: first.timestamp,
            end_time: last.timestamp,
            total_duration_ms: records.iter().map(|r| r.duration_ms).sum(),
            record_count: records.len(),
            patient_id: first.patient_id.clone(),
            operations,
        })
    }

    /// Verify the integrity of the hash chain by recomputing every content
    /// and chain hash from scratch.
    pub fn verify_chain_integrity(&self) -> (bool, String) {
        let inner = self.inner.lock().unwrap();
        if inner.records.is_empty() {
            return (true, "Audit trail is empty".to_string());
        }

        let mut prev_chain_hash = GENESIS.to_string();
        for record in &inner.records {
            let content = content_value(
                record.record_id,
                record.event_type,
                &record.patient_id,
                &record.session_id,
                &record.actor,
                &record.input_data,
                &record.output_data,
                &record.parameters,
                record.duration_ms,
                record.parent_record_id,
            );
            let expected_content_hash = compute_hash(&content);
            if record.content_hash != expected_content_hash {
                return (
                    false,
                    format!("Content hash mismatch at record {}", record.record_id),
                );
            }

            let expected_chain_hash =
                compute_hash_str(&format!("{}:{}", prev_chain_hash, record.content_hash));
            if record.chain_hash != expected_chain_hash {
                return (
                    false,
                    format!("Chain hash mismatch at record {}", record.record_id),
                );
            }
            prev_chain_hash = record.chain_hash.clone();
        }

        (
            true,
            format!(
                "Audit trail integrity verified ({} records)",
                inner.records.len()
            ),
        )
    }

    /// Total number of records currently retained in memory.
    pub fn record_count(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    /// Aggregate statistics over the retained records.
    pub fn summary(&self) -> AuditSummary {
        let inner = self.inner.lock().unwrap();
        let mut event_counts: BTreeMap<String, usize> = BTreeMap::new();
        for record in &inner.records {
            *event_counts
                .entry(record.event_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        let unique_patients: HashSet<&str> = inner
            .records
            .iter()
            .map(|r| r.patient_id.as_str())
            .filter(|p| !p.is_empty())
            .collect();
        let unique_sessions: HashSet<&str> = inner
            .records
            .iter()
            .map(|r| r.session_id.as_str())
            .filter(|s| !s.is_empty())
            .collect();

        AuditSummary {
            total_records: inner.records.len(),
            unique_patients: unique_patients.len(),
            unique_sessions: unique_sessions.len(),
            event_counts,
            oldest_timestamp: inner.records.first().map(|r| r.timestamp),
            newest_timestamp: inner.records.last().map(|r| r.timestamp),
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn content_value(
    record_id: u64,
    event_type: AuditEventType,
    patient_id: &str,
    session_id: &str,
    actor: &str,
    input_data: &DataMap,
    output_data: &DataMap,
    parameters: &DataMap,
    duration_ms: u64,
    parent_record_id: Option<u64>,
) -> serde_json::Value {
    json!({
        "record_id": record_id,
        "event_type": event_type.as_str(),
        "patient_id": patient_id,
        "session_id": session_id,
        "actor": actor,
        "input_data": input_data,
        "output_data": output_data,
        "parameters": parameters,
        "duration_ms": duration_ms,
        "parent_record_id": parent_record_id,
    })
}

/// `serde_json::Value`'s object variant preserves the insertion order of a
/// `json!` macro invocation, but every nested map here is a `BTreeMap`, so
/// `to_string` always serializes in sorted key order, matching
/// `json.dumps(..., sort_keys=True)`.
fn compute_hash(content: &serde_json::Value) -> String {
    compute_hash_str(&content.to_string())
}

fn compute_hash_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn summarize_data(data: &DataMap, max_keys: usize) -> BTreeMap<String, String> {
    let mut summary = BTreeMap::new();
    for (i, (key, value)) in data.iter().enumerate() {
        if i >= max_keys {
            summary.insert(
                "...".to_string(),
                format!("({} more keys)", data.len() - max_keys),
            );
            break;
        }
        let rendered = match value {
            serde_json::Value::Object(map) => format!("dict({} keys)", map.len()),
            serde_json::Value::Array(arr) => format!("list({} items)", arr.len()),
            serde_json::Value::String(s) if s.len() > 100 => format!("{}...", &s[..100]),
            other => other.to_string(),
        };
        summary.insert(key.clone(), rendered);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_chain_and_verify_as_intact() {
        let trail = AuditTrail::new(&AuditConfig::default());
        let session_id = trail.start_session("PT-001");
        trail.record(
            AuditEventType::ModelCall,
            AuditEvent::new()
                .patient_id("PT-001")
                .session_id(session_id.clone())
                .actor("claude-safety-v2"),
        );
        trail.record(
            AuditEventType::SafetyIndexComputation,
            AuditEvent::new()
                .patient_id("PT-001")
                .session_id(session_id.clone()),
        );

        assert_eq!(trail.record_count(), 3);
        let (valid, _) = trail.verify_chain_integrity();
        assert!(valid);

        let session_records = trail.get_session_records(&session_id);
        assert_eq!(session_records.len(), 3);
    }

    #[test]
    fn tampering_with_a_record_breaks_chain_verification() {
        let trail = AuditTrail::new(&AuditConfig::default());
        trail.start_session("PT-002");
        trail.record(AuditEventType::ModelCall, AuditEvent::new().patient_id("PT-002"));

        {
            let mut inner = trail.inner.lock().unwrap();
            inner.records[0].patient_id = "PT-999".to_string();
        }

        let (valid, message) = trail.verify_chain_integrity();
        assert!(!valid);
        assert!(message.contains("Content hash mismatch"));
    }

    #[test]
    fn provenance_reconstructs_session_operations() {
        let trail = AuditTrail::new(&AuditConfig::default());
        let session_id = trail.start_session("PT-003");
        trail.record(
            AuditEventType::ModelCall,
            AuditEvent::new()
                .patient_id("PT-003")
                .session_id(session_id.clone())
                .duration_ms(42),
        );

        let provenance = trail.get_prediction_provenance(&session_id).unwrap();
        assert_eq!(provenance.patient_id, "PT-003");
        assert_eq!(provenance.record_count, 2);
        assert_eq!(provenance.total_duration_ms, 42);
    }

    #[test]
    fn provenance_for_unknown_session_is_an_error() {
        let trail = AuditTrail::new(&AuditConfig::default());
        assert!(trail.get_prediction_provenance("SESSION-NOPE").is_err());
    }

    #[test]
    fn exceeding_max_records_archives_the_oldest() {
        // Archival drops the oldest records from memory without re-seeding the
        // chain, so `verify_chain_integrity` on the truncated trail reports a
        // break at the new first record — it only proves no *in-memory*
        // tampering, not full history back to genesis.
        let config = AuditConfig { max_records: 2 };
        let trail = AuditTrail::new(&config);
        for i in 0..5 {
            trail.record(
                AuditEventType::ModelCall,
                AuditEvent::new().patient_id(format!("PT-{i}")),
            );
        }
        assert_eq!(trail.record_count(), 2);
        let (valid, _) = trail.verify_chain_integrity();
        assert!(!valid);
    }
}
