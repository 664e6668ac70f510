//! Shared domain types used across every pipeline component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Adverse events tracked by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AdverseEventType {
    #[serde(rename = "CRS")]
    Crs,
    #[serde(rename = "ICANS")]
    Icans,
    #[serde(rename = "HLH")]
    Hlh,
}

impl AdverseEventType {
    /// The string value used in node IDs (`AE:<value>`) and wire formats.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdverseEventType::Crs => "CRS",
            AdverseEventType::Icans => "ICANS",
            AdverseEventType::Hlh => "HLH",
        }
    }

    /// The graph node ID for this adverse event (`AE:CRS`, etc.).
    pub fn node_id(&self) -> String {
        format!("AE:{}", self.as_str())
    }
}

impl std::fmt::Display for AdverseEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Risk stratification derived from a composite Safety Index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskCategory {
    Low,
    Moderate,
    High,
    Critical,
}

/// A score from one of the four signal domains (biomarker/pathway/model/clinical).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainScore {
    pub domain: String,
    pub score: f64,
    pub confidence: f64,
    #[serde(default)]
    pub components: HashMap<String, f64>,
    pub timestamp: DateTime<Utc>,
}

impl DomainScore {
    /// Construct a domain score, clamping `score` and `confidence` to `[0,1]`.
    pub fn new(domain: impl Into<String>, score: f64, confidence: f64) -> Self {
        Self {
            domain: domain.into(),
            score: score.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            components: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_components(mut self, components: HashMap<String, f64>) -> Self {
        self.components = components;
        self
    }
}

/// Patient-level composite Safety Index for a single adverse event type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyIndex {
    pub patient_id: String,
    pub adverse_event: AdverseEventType,
    pub composite_score: f64,
    pub risk_category: RiskCategory,
    pub domain_scores: Vec<DomainScore>,
    pub trend: f64,
    pub hours_since_infusion: f64,
    pub prediction_horizon_hours: f64,
    pub model_agreement: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SafetyIndex {
    /// Map a composite score to its risk category per the §3 threshold table.
    pub fn categorize(score: f64) -> RiskCategory {
        if score < 0.3 {
            RiskCategory::Low
        } else if score < 0.6 {
            RiskCategory::Moderate
        } else if score < 0.8 {
            RiskCategory::High
        } else {
            RiskCategory::Critical
        }
    }

    /// Confidence-weighted composite across domain scores.
    pub fn compute_composite(
        domain_scores: &[DomainScore],
        domain_weights: &HashMap<String, f64>,
    ) -> f64 {
        if domain_scores.is_empty() {
            return 0.0;
        }

        let equal_weight = 1.0 / domain_scores.len() as f64;
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for ds in domain_scores {
            let w = *domain_weights.get(&ds.domain).unwrap_or(&equal_weight);
            let effective_weight = w * ds.confidence;
            weighted_sum += ds.score * effective_weight;
            weight_total += effective_weight;
        }

        if weight_total == 0.0 {
            return 0.0;
        }

        (weighted_sum / weight_total).clamp(0.0, 1.0)
    }

    /// Exponentially-weighted linear-regression trend, `decay_rate = 0.1`.
    ///
    /// `previous_scores` is `(score, hours_ago)`, oldest first. Positive slope
    /// means worsening risk. Returns `0.0` when the regression is underdetermined.
    pub fn compute_trend(current_score: f64, previous_scores: &[(f64, f64)]) -> f64 {
        if previous_scores.is_empty() {
            return 0.0;
        }

        const DECAY_RATE: f64 = 0.1;

        let mut sum_w = 0.0;
        let mut sum_wt = 0.0;
        let mut sum_ws = 0.0;
        let mut sum_wtt = 0.0;
        let mut sum_wts = 0.0;

        let mut points: Vec<(f64, f64)> = previous_scores.to_vec();
        points.push((current_score, 0.0));

        for (score, hours_ago) in points {
            let t = -hours_ago;
            let w = (-DECAY_RATE * hours_ago).exp();
            sum_w += w;
            sum_wt += w * t;
            sum_ws += w * score;
            sum_wtt += w * t * t;
            sum_wts += w * t * score;
        }

        let denom = sum_w * sum_wtt - sum_wt * sum_wt;
        if denom.abs() < 1e-12 {
            return 0.0;
        }

        (sum_w * sum_wts - sum_wt * sum_ws) / denom
    }
}

/// Canonical output of the Normalizer: a model's prediction for one adverse event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub model_id: String,
    pub patient_id: String,
    pub adverse_event: AdverseEventType,
    pub risk_score: f64,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub key_drivers: Vec<String>,
    pub raw_response: serde_json::Value,
    pub latency_ms: u64,
    pub tokens_used: u64,
    pub timestamp: DateTime<Utc>,
}

impl Prediction {
    /// Construct a prediction, clamping `risk_score` and `confidence` to `[0,1]`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model_id: impl Into<String>,
        patient_id: impl Into<String>,
        adverse_event: AdverseEventType,
        risk_score: f64,
        confidence: f64,
        reasoning: impl Into<String>,
        key_drivers: Vec<String>,
        raw_response: serde_json::Value,
        latency_ms: u64,
        tokens_used: u64,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            patient_id: patient_id.into(),
            adverse_event,
            risk_score: risk_score.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            key_drivers,
            raw_response,
            latency_ms,
            tokens_used,
            timestamp: Utc::now(),
        }
    }
}

/// Input snapshot for a single patient at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientSnapshot {
    pub patient_id: String,
    pub hours_since_infusion: f64,
    #[serde(default)]
    pub biomarkers: HashMap<String, f64>,
    /// `node_id -> [(value, hours_ago), ...]`
    #[serde(default)]
    pub biomarker_history: HashMap<String, Vec<(f64, f64)>>,
    pub disease_burden: f64,
    pub prior_therapies: u32,
    pub age_years: u32,
    #[serde(default)]
    pub comorbidities: Vec<String>,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub dose: f64,
    /// `(score, hours_ago)` from prior Safety Index computations, oldest first.
    #[serde(default)]
    pub previous_safety_indices: Vec<(f64, f64)>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
}

impl Default for PatientSnapshot {
    fn default() -> Self {
        Self {
            patient_id: String::new(),
            hours_since_infusion: 0.0,
            biomarkers: HashMap::new(),
            biomarker_history: HashMap::new(),
            disease_burden: 0.5,
            prior_therapies: 3,
            age_years: 60,
            comorbidities: Vec::new(),
            product: String::new(),
            dose: 0.0,
            previous_safety_indices: Vec::new(),
            context: HashMap::new(),
        }
    }
}
