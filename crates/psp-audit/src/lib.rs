//! Immutable, hash-chained audit trail recording every prediction, model
//! call, validation, and alert with full provenance, so any prediction can
//! be reproduced and explained after the fact.

mod trail;
mod types;

pub use trail::AuditTrail;
pub use types::{
    AuditEvent, AuditEventType, AuditRecord, AuditSummary, DataMap, OperationSummary, Provenance,
};
