//! Routes patient safety queries to the optimal foundation model(s) based
//! on query complexity, clinical domain, latency budget, and model
//! capabilities.

mod router;
mod types;

pub use router::PromptRouter;
pub use types::{ClinicalDomain, ModelCapability, QueryComplexity, RoutingDecision, SafetyQuery};
