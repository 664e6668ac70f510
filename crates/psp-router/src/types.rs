//! Query, model capability, and decision types used by the router.

use std::collections::{HashMap, HashSet};

/// Complexity classification of a safety prediction query, ordered
/// `Simple < Moderate < Complex < Expert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QueryComplexity {
    Simple,
    Moderate,
    Complex,
    Expert,
}

impl QueryComplexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryComplexity::Simple => "simple",
            QueryComplexity::Moderate => "moderate",
            QueryComplexity::Complex => "complex",
            QueryComplexity::Expert => "expert",
        }
    }
}

/// Clinical domain a query falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClinicalDomain {
    CytokineKinetics,
    Neurotoxicity,
    Hemophagocytic,
    Coagulopathy,
    GeneralSafety,
}

impl ClinicalDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClinicalDomain::CytokineKinetics => "cytokine_kinetics",
            ClinicalDomain::Neurotoxicity => "neurotoxicity",
            ClinicalDomain::Hemophagocytic => "hemophagocytic",
            ClinicalDomain::Coagulopathy => "coagulopathy",
            ClinicalDomain::GeneralSafety => "general_safety",
        }
    }
}

/// Describes a foundation model's capabilities and constraints.
#[derive(Debug, Clone)]
pub struct ModelCapability {
    pub model_id: String,
    pub provider: String,
    pub max_complexity: QueryComplexity,
    pub clinical_domains: HashSet<ClinicalDomain>,
    pub avg_latency_ms: u32,
    pub max_tokens: u32,
    pub cost_per_1k_tokens: f64,
    pub supports_structured_output: bool,
    pub reliability_score: f64,
}

impl ModelCapability {
    pub fn new(model_id: impl Into<String>, provider: impl Into<String>, max_complexity: QueryComplexity) -> Self {
        Self {
            model_id: model_id.into(),
            provider: provider.into(),
            max_complexity,
            clinical_domains: HashSet::new(),
            avg_latency_ms: 1000,
            max_tokens: 8192,
            cost_per_1k_tokens: 0.01,
            supports_structured_output: true,
            reliability_score: 0.95,
        }
    }

    pub fn with_domains(mut self, domains: impl IntoIterator<Item = ClinicalDomain>) -> Self {
        self.clinical_domains = domains.into_iter().collect();
        self
    }
}

/// The router's decision about which models to invoke.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub primary_model: ModelCapability,
    pub ensemble_models: Vec<ModelCapability>,
    pub complexity: QueryComplexity,
    pub domain: ClinicalDomain,
    pub rationale: String,
    pub estimated_latency_ms: u32,
}

impl RoutingDecision {
    /// Primary model followed by any ensemble models.
    pub fn all_models(&self) -> Vec<&ModelCapability> {
        std::iter::once(&self.primary_model)
            .chain(self.ensemble_models.iter())
            .collect()
    }
}

/// A structured safety prediction query.
#[derive(Debug, Clone, Default)]
pub struct SafetyQuery {
    pub patient_id: String,
    pub query_text: String,
    pub biomarker_count: u32,
    pub hours_since_infusion: f64,
    pub requires_mechanistic_reasoning: bool,
    pub latency_budget_ms: u32,
    pub adverse_events: Vec<String>,
    pub context: HashMap<String, serde_json::Value>,
}

impl SafetyQuery {
    pub fn new(patient_id: impl Into<String>, query_text: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
            query_text: query_text.into(),
            biomarker_count: 0,
            hours_since_infusion: 0.0,
            requires_mechanistic_reasoning: false,
            latency_budget_ms: 5000,
            adverse_events: Vec::new(),
            context: HashMap::new(),
        }
    }
}
