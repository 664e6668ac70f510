//! Mechanistic plausibility checks for foundation-model predictions against
//! the knowledge graph: pathway existence, temporal window, biomarker
//! consistency, cascade ordering, and magnitude plausibility.

mod types;
mod validator;

pub use types::{ValidationAdjustments, ValidationCheck, ValidationReport, ValidationResult};
pub use validator::MechanisticValidator;
