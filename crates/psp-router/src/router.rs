//! `PromptRouter`: complexity/domain assessment, eligibility filtering, and
//! scored ranking of registered foundation models.

use crate::types::{ClinicalDomain, ModelCapability, QueryComplexity, RoutingDecision, SafetyQuery};
use psp_common::config::RouterConfig;
use std::collections::HashMap;
use std::sync::Mutex;

/// Routes safety queries to the optimal foundation model(s).
pub struct PromptRouter {
    config: RouterConfig,
    models: Mutex<HashMap<String, ModelCapability>>,
    model_health: Mutex<HashMap<String, bool>>,
}

impl PromptRouter {
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            models: Mutex::new(HashMap::new()),
            model_health: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_model(&self, capability: ModelCapability) {
        tracing::info!(
            model_id = %capability.model_id,
            provider = %capability.provider,
            complexity = capability.max_complexity.as_str(),
            "registered model"
        );
        self.model_health.lock().unwrap().insert(capability.model_id.clone(), true);
        self.models.lock().unwrap().insert(capability.model_id.clone(), capability);
    }

    pub fn update_model_health(&self, model_id: &str, healthy: bool) {
        self.model_health.lock().unwrap().insert(model_id.to_string(), healthy);
    }

    /// Route a query, or `None` if no model is eligible (`NoRoutingCandidate`).
    pub fn route(&self, query: &SafetyQuery) -> Option<RoutingDecision> {
        let complexity = Self::assess_complexity(query);
        let domain = Self::assess_domain(query);

        let eligible = self.filter_eligible(query, complexity);
        if eligible.is_empty() {
            tracing::warn!(
                patient_id = %query.patient_id,
                complexity = complexity.as_str(),
                domain = domain.as_str(),
                "no eligible models for query"
            );
            return None;
        }

        let ranked = Self::rank_models(&eligible, complexity, domain, query);
        let primary = ranked[0].clone();

        let ensemble_threshold = if self.config.ensemble_threshold_is_complex {
            QueryComplexity::Complex
        } else {
            QueryComplexity::Moderate
        };

        let mut ensemble_models = Vec::new();
        if complexity >= ensemble_threshold && ranked.len() > 1 {
            let mut used_providers = std::collections::HashSet::new();
            used_providers.insert(primary.provider.clone());

            for model in &ranked[1..] {
                if ensemble_models.len() >= self.config.max_ensemble_size.saturating_sub(1) {
                    break;
                }
                if !used_providers.contains(&model.provider) || ranked.len() <= 2 {
                    ensemble_models.push(model.clone());
                    used_providers.insert(model.provider.clone());
                }
            }
        }

        let estimated_latency_ms = std::iter::once(&primary)
            .chain(ensemble_models.iter())
            .map(|m| m.avg_latency_ms)
            .max()
            .unwrap_or(primary.avg_latency_ms);

        let rationale = Self::build_rationale(&primary, &ensemble_models, complexity, domain, &ensemble_threshold);

        tracing::info!(
            patient_id = %query.patient_id,
            primary = %primary.model_id,
            ensemble = ensemble_models.len(),
            complexity = complexity.as_str(),
            "routed query"
        );

        Some(RoutingDecision {
            primary_model: primary,
            ensemble_models,
            complexity,
            domain,
            rationale,
            estimated_latency_ms,
        })
    }

    fn assess_complexity(query: &SafetyQuery) -> QueryComplexity {
        if query.requires_mechanistic_reasoning {
            let lower = query.query_text.to_lowercase();
            if lower.contains("hypothesis") || lower.contains("novel") {
                return QueryComplexity::Expert;
            }
            return QueryComplexity::Complex;
        }

        if query.biomarker_count >= 5 && query.hours_since_infusion > 0.0 {
            return QueryComplexity::Moderate;
        }

        if query.biomarker_count <= 2 {
            return QueryComplexity::Simple;
        }

        QueryComplexity::Moderate
    }

    fn assess_domain(query: &SafetyQuery) -> ClinicalDomain {
        let lower = query.query_text.to_lowercase();
        let ae_set: std::collections::HashSet<&str> =
            query.adverse_events.iter().map(String::as_str).collect();

        if ae_set.contains("ICANS") || lower.contains("icans") {
            return ClinicalDomain::Neurotoxicity;
        }
        if ae_set.contains("HLH") || lower.contains("hlh") {
            return ClinicalDomain::Hemophagocytic;
        }
        if lower.contains("coagulopathy") || lower.contains("dic") {
            return ClinicalDomain::Coagulopathy;
        }
        if ae_set.contains("CRS") || lower.contains("cytokine") {
            return ClinicalDomain::CytokineKinetics;
        }

        ClinicalDomain::GeneralSafety
    }

    fn filter_eligible(&self, query: &SafetyQuery, complexity: QueryComplexity) -> Vec<ModelCapability> {
        let models = self.models.lock().unwrap();
        let health = self.model_health.lock().unwrap();

        models
            .values()
            .filter(|m| *health.get(&m.model_id).unwrap_or(&false))
            .filter(|m| m.max_complexity >= complexity)
            .filter(|m| {
                (m.avg_latency_ms as f64) <= query.latency_budget_ms as f64 * self.config.latency_budget_slack
            })
            .cloned()
            .collect()
    }

    fn rank_models(
        models: &[ModelCapability],
        complexity: QueryComplexity,
        domain: ClinicalDomain,
        query: &SafetyQuery,
    ) -> Vec<ModelCapability> {
        let max_cost = models
            .iter()
            .map(|m| m.cost_per_1k_tokens)
            .fold(0.0_f64, f64::max)
            .max(1.0);

        let mut scored: Vec<(f64, ModelCapability)> = models
            .iter()
            .map(|m| {
                let mut score = 0.0;

                if m.clinical_domains.contains(&domain) {
                    score += 0.30;
                }

                score += m.reliability_score * 0.25;

                let cost_efficiency = 1.0 - (m.cost_per_1k_tokens / max_cost);
                score += cost_efficiency * 0.15;

                let latency_ratio = m.avg_latency_ms as f64 / (query.latency_budget_ms.max(1) as f64);
                let latency_score = (1.0 - latency_ratio).max(0.0);
                score += latency_score * 0.10;

                if m.supports_structured_output {
                    let importance = if complexity >= QueryComplexity::Complex { 0.20 } else { 0.10 };
                    score += importance;
                }

                (score, m.clone())
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(_, m)| m).collect()
    }

    fn build_rationale(
        primary: &ModelCapability,
        ensemble: &[ModelCapability],
        complexity: QueryComplexity,
        domain: ClinicalDomain,
        ensemble_threshold: &QueryComplexity,
    ) -> String {
        let mut parts = vec![
            format!("Query complexity: {}", complexity.as_str()),
            format!("Clinical domain: {}", domain.as_str()),
            format!("Primary model: {} ({})", primary.model_id, primary.provider),
        ];

        if !ensemble.is_empty() {
            let names: Vec<&str> = ensemble.iter().map(|m| m.model_id.as_str()).collect();
            parts.push(format!("Ensemble models: {}", names.join(", ")));
            parts.push(format!(
                "Ensemble triggered by complexity >= {}",
                ensemble_threshold.as_str()
            ));
        }

        if primary.clinical_domains.contains(&domain) {
            parts.push(format!("{} has domain expertise in {}", primary.model_id, domain.as_str()));
        }

        parts.join("; ")
    }

    /// Format a query into a model-facing prompt.
    pub fn format_prompt(&self, query: &SafetyQuery, system_context: &str) -> String {
        let mut sections = Vec::new();

        if !system_context.is_empty() {
            sections.push(format!("SYSTEM CONTEXT:\n{system_context}"));
        }

        sections.push(
            "TASK: Predict adverse event risk for a cell therapy patient. \
             Return a structured JSON response with risk_score (0.0-1.0), \
             confidence (0.0-1.0), adverse_event, reasoning, and key_drivers."
                .to_string(),
        );

        sections.push(format!("PATIENT ID: {}", query.patient_id));
        sections.push(format!("HOURS SINCE INFUSION: {}", query.hours_since_infusion));
        sections.push(format!("ADVERSE EVENTS TO ASSESS: {}", query.adverse_events.join(", ")));

        if !query.context.is_empty() {
            let lines: Vec<String> = query
                .context
                .iter()
                .map(|(k, v)| format!("  {k}: {v}"))
                .collect();
            sections.push(format!("CLINICAL CONTEXT:\n{}", lines.join("\n")));
        }

        sections.push(format!("QUERY: {}", query.query_text));

        sections.join("\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, provider: &str, complexity: QueryComplexity) -> ModelCapability {
        ModelCapability::new(id, provider, complexity)
    }

    #[test]
    fn no_eligible_models_returns_none() {
        let router = PromptRouter::new(RouterConfig::default());
        let query = SafetyQuery::new("PAT-1", "assess risk");
        assert!(router.route(&query).is_none());
    }

    #[test]
    fn simple_query_routes_to_single_model() {
        let router = PromptRouter::new(RouterConfig::default());
        router.register_model(model("m1", "openai", QueryComplexity::Expert));
        let mut query = SafetyQuery::new("PAT-1", "check levels");
        query.biomarker_count = 1;
        let decision = router.route(&query).unwrap();
        assert_eq!(decision.primary_model.model_id, "m1");
        assert!(decision.ensemble_models.is_empty());
    }

    #[test]
    fn expert_complexity_triggers_ensemble_with_distinct_providers() {
        let router = PromptRouter::new(RouterConfig::default());
        router.register_model(model("m1", "openai", QueryComplexity::Expert));
        router.register_model(model("m2", "anthropic", QueryComplexity::Expert));
        router.register_model(model("m3", "openai", QueryComplexity::Expert));

        let mut query = SafetyQuery::new("PAT-1", "generate a novel hypothesis");
        query.requires_mechanistic_reasoning = true;
        let decision = router.route(&query).unwrap();
        assert_eq!(decision.complexity, QueryComplexity::Expert);
        assert!(!decision.ensemble_models.is_empty());
    }

    #[test]
    fn latency_budget_excludes_slow_models() {
        let router = PromptRouter::new(RouterConfig::default());
        let mut slow = model("slow", "openai", QueryComplexity::Simple);
        slow.avg_latency_ms = 10_000;
        router.register_model(slow);

        let mut query = SafetyQuery::new("PAT-1", "check");
        query.biomarker_count = 1;
        query.latency_budget_ms = 1000;
        assert!(router.route(&query).is_none());
    }
}
