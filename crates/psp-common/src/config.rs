//! Layered configuration for the patient safety prediction platform.
//!
//! Every sub-config carries a `Default` impl with the exact numeric defaults
//! drawn from the reference implementation. A deployment composes `Config`
//! from whatever layered source it likes (file, env, flags); this crate only
//! promises a sound default.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level configuration, one section per component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub graph: GraphConfig,
    pub gateway: GatewayConfig,
    pub router: RouterConfig,
    pub validator: ValidatorConfig,
    pub ensemble: EnsembleConfig,
    pub scorer: ScorerConfig,
    pub alerts: AlertConfig,
    pub audit: AuditConfig,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            graph: GraphConfig::default(),
            gateway: GatewayConfig::default(),
            router: RouterConfig::default(),
            validator: ValidatorConfig::default(),
            ensemble: EnsembleConfig::default(),
            scorer: ScorerConfig::default(),
            alerts: AlertConfig::default(),
            audit: AuditConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

/// Knowledge Graph configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub max_hops_default: u32,
    pub upstream_max_depth_default: u32,
    pub similarity_threshold_mult: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_hops_default: 6,
            upstream_max_depth_default: 4,
            similarity_threshold_mult: 2.0,
        }
    }
}

/// Per-model endpoint limits used by the Gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpointLimits {
    pub requests_per_minute: u32,
    pub tokens_per_minute: u64,
}

/// Secure Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub circuit_failure_threshold: u32,
    pub circuit_recovery_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub default_limits: ModelEndpointLimits,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            circuit_failure_threshold: 5,
            circuit_recovery_timeout_secs: 30,
            request_timeout_secs: 30,
            default_limits: ModelEndpointLimits {
                requests_per_minute: 60,
                tokens_per_minute: 100_000,
            },
        }
    }
}

/// Prompt Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub max_ensemble_size: usize,
    pub ensemble_threshold_is_complex: bool,
    pub latency_budget_slack: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_ensemble_size: 3,
            ensemble_threshold_is_complex: true,
            latency_budget_slack: 1.2,
        }
    }
}

/// Mechanistic Validator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    pub strict_mode: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { strict_mode: false }
    }
}

/// Ensemble Aggregator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    pub disagreement_threshold: f64,
    pub confidence_floor: f64,
    pub fallback_to_median_on_disagreement: bool,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            disagreement_threshold: 0.25,
            confidence_floor: 0.1,
            fallback_to_median_on_disagreement: true,
        }
    }
}

/// Patient Safety Index Scorer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    pub domain_weights: HashMap<String, f64>,
    pub prediction_horizon_hours: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        let mut domain_weights = HashMap::new();
        domain_weights.insert("biomarker".to_string(), 0.30);
        domain_weights.insert("pathway".to_string(), 0.25);
        domain_weights.insert("model".to_string(), 0.25);
        domain_weights.insert("clinical".to_string(), 0.20);
        Self {
            domain_weights,
            prediction_horizon_hours: 24.0,
        }
    }
}

/// Per-adverse-event alert thresholds, mirroring the reference defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertThresholdDefaults {
    pub warning: f64,
    pub urgent: f64,
    pub critical: f64,
    pub rate_of_change_per_hour: f64,
    pub cooldown_seconds: u64,
}

/// Alert Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub thresholds: HashMap<String, AlertThresholdDefaults>,
    pub escalate_urgent_after_minutes: i64,
    pub escalate_critical_after_minutes: i64,
    pub disagreement_threshold: f64,
    pub disagreement_cooldown_seconds: u64,
    pub trend_cooldown_seconds: u64,
    pub min_score_history: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        let mut thresholds = HashMap::new();
        thresholds.insert(
            "CRS".to_string(),
            AlertThresholdDefaults {
                warning: 0.4,
                urgent: 0.6,
                critical: 0.8,
                rate_of_change_per_hour: 0.05,
                cooldown_seconds: 1800,
            },
        );
        thresholds.insert(
            "ICANS".to_string(),
            AlertThresholdDefaults {
                warning: 0.35,
                urgent: 0.55,
                critical: 0.75,
                rate_of_change_per_hour: 0.04,
                cooldown_seconds: 1800,
            },
        );
        thresholds.insert(
            "HLH".to_string(),
            AlertThresholdDefaults {
                warning: 0.3,
                urgent: 0.5,
                critical: 0.7,
                rate_of_change_per_hour: 0.03,
                cooldown_seconds: 1800,
            },
        );
        Self {
            thresholds,
            escalate_urgent_after_minutes: 15,
            escalate_critical_after_minutes: 30,
            disagreement_threshold: 0.6,
            disagreement_cooldown_seconds: 3600,
            trend_cooldown_seconds: 3600,
            min_score_history: 3,
        }
    }
}

/// Audit Trail configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub max_records: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_records: 100_000,
        }
    }
}

/// Engine (orchestrator) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub max_hypotheses: usize,
    pub min_hypothesis_confidence: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_hypotheses: 5,
            min_hypothesis_confidence: 0.2,
        }
    }
}
