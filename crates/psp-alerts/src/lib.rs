//! Evaluates Safety Index scores into actionable clinical alerts: threshold
//! breaches, rate-of-change spikes, model disagreement, and sustained
//! worsening trends, with cooldown suppression and time-based escalation.

mod alerts;
mod types;

pub use alerts::AlertEngine;
pub use types::{
    Alert, AlertHandler, AlertSeverity, AlertStatus, AlertType, EscalationRule,
};
