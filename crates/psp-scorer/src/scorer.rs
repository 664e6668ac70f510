//! Computes a patient's composite Safety Index across four signal domains:
//! biomarker trajectories, knowledge-graph pathway activation, foundation
//! model predictions, and clinical context.

use std::collections::HashMap;

use psp_common::config::ScorerConfig;
use psp_common::{AdverseEventType, DomainScore, PatientSnapshot, SafetyIndex};
use psp_graph::KnowledgeGraph;

use crate::thresholds::{peak_window, thresholds_for};

/// A single foundation model's score contribution, as handed off by the
/// ensemble or gateway layer.
#[derive(Debug, Clone)]
pub struct ModelScoreInput {
    pub model_name: String,
    pub score: f64,
    pub confidence: f64,
}

/// Computes the patient-level Safety Index by integrating biomarker data,
/// knowledge-graph pathway activation, model predictions, and clinical
/// context into a single composite score.
pub struct PatientRiskScorer<'g> {
    graph: &'g KnowledgeGraph,
    domain_weights: HashMap<String, f64>,
}

impl<'g> PatientRiskScorer<'g> {
    pub fn new(graph: &'g KnowledgeGraph, config: &ScorerConfig) -> Self {
        Self {
            graph,
            domain_weights: config.domain_weights.clone(),
        }
    }

    pub fn compute(
        &self,
        patient: &PatientSnapshot,
        adverse_event: AdverseEventType,
        model_predictions: &[ModelScoreInput],
    ) -> SafetyIndex {
        tracing::info!(
            adverse_event = %adverse_event,
            patient_id = %patient.patient_id,
            hours_since_infusion = patient.hours_since_infusion,
            "computing safety index"
        );

        let biomarker_domain = self.score_biomarker_domain(patient, adverse_event);
        let pathway_domain = self.score_pathway_domain(patient, adverse_event);
        let model_domain = Self::score_model_domain(model_predictions);
        let clinical_domain = self.score_clinical_domain(patient, adverse_event);

        let domain_scores = vec![biomarker_domain, pathway_domain, model_domain, clinical_domain];

        let composite = SafetyIndex::compute_composite(&domain_scores, &self.domain_weights);
        let trend = SafetyIndex::compute_trend(composite, &patient.previous_safety_indices);

        let model_agreement = if model_predictions.len() > 1 {
            let scores: Vec<f64> = model_predictions.iter().map(|p| p.score).collect();
            let mean = scores.iter().sum::<f64>() / scores.len() as f64;
            let variance =
                scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
            (1.0 - variance.sqrt() * 2.0).max(0.0)
        } else {
            1.0
        };

        let mut metadata = HashMap::new();
        metadata.insert(
            "product".to_string(),
            serde_json::Value::String(patient.product.clone()),
        );

        SafetyIndex {
            patient_id: patient.patient_id.clone(),
            adverse_event,
            composite_score: composite,
            risk_category: SafetyIndex::categorize(composite),
            domain_scores,
            trend,
            hours_since_infusion: patient.hours_since_infusion,
            prediction_horizon_hours: 24.0,
            model_agreement,
            timestamp: chrono::Utc::now(),
            metadata,
        }
    }

    fn score_biomarker_domain(
        &self,
        patient: &PatientSnapshot,
        adverse_event: AdverseEventType,
    ) -> DomainScore {
        let thresholds = thresholds_for(adverse_event);
        let mut component_scores: HashMap<String, f64> = HashMap::new();
        let mut values_found = 0usize;

        for thresh in thresholds {
            let value = match patient.biomarkers.get(thresh.biomarker_id) {
                Some(v) => *v,
                None => continue,
            };
            values_found += 1;

            let level_score = if thresh.grade3_threshold > thresh.normal_upper {
                if value <= thresh.normal_upper {
                    0.0
                } else if value <= thresh.grade1_threshold {
                    0.2 * (value - thresh.normal_upper) / (thresh.grade1_threshold - thresh.normal_upper)
                } else if value <= thresh.grade2_threshold {
                    0.2 + 0.3 * (value - thresh.grade1_threshold)
                        / (thresh.grade2_threshold - thresh.grade1_threshold)
                } else if value <= thresh.grade3_threshold {
                    0.5 + 0.3 * (value - thresh.grade2_threshold)
                        / (thresh.grade3_threshold - thresh.grade2_threshold)
                } else {
                    let excess = (value - thresh.grade3_threshold) / thresh.grade3_threshold;
                    (0.8 + 0.2 * excess).min(1.0)
                }
            } else if value >= thresh.normal_upper {
                0.0
            } else if value >= thresh.grade1_threshold {
                0.2 * (thresh.normal_upper - value) / (thresh.normal_upper - thresh.grade1_threshold)
            } else if value >= thresh.grade2_threshold {
                0.2 + 0.3 * (thresh.grade1_threshold - value)
                    / (thresh.grade1_threshold - thresh.grade2_threshold)
            } else if value >= thresh.grade3_threshold {
                0.5 + 0.3 * (thresh.grade2_threshold - value)
                    / (thresh.grade2_threshold - thresh.grade3_threshold)
            } else {
                1.0
            };

            let mut roc_score = 0.0;
            if thresh.rate_of_change_critical != 0.0 {
                if let Some(history) = patient.biomarker_history.get(thresh.biomarker_id) {
                    if let Some(&(most_recent_val, hours_ago)) = history.last() {
                        if hours_ago > 0.0 {
                            let rate = (value - most_recent_val) / hours_ago;
                            roc_score =
                                ((rate / thresh.rate_of_change_critical).abs() * 0.2).min(0.2);
                        }
                    }
                }
            }

            component_scores.insert(thresh.biomarker_id.to_string(), (level_score + roc_score).min(1.0));
        }

        if component_scores.is_empty() {
            return DomainScore::new("biomarker", 0.0, 0.0);
        }

        let confidence = (values_found as f64 / thresholds.len().max(1) as f64).min(1.0);

        let mut sorted_scores: Vec<f64> = component_scores.values().cloned().collect();
        sorted_scores.sort_by(|a, b| b.partial_cmp(a).unwrap());

        let aggregate = if sorted_scores.len() >= 2 {
            let top = (sorted_scores[0] + sorted_scores[1]) / 2.0 * 0.6;
            let rest = if sorted_scores.len() > 2 {
                sorted_scores[2..].iter().sum::<f64>() / (sorted_scores.len() - 2) as f64 * 0.4
            } else {
                0.0
            };
            top + rest
        } else {
            sorted_scores[0]
        };

        DomainScore::new("biomarker", aggregate.min(1.0), confidence)
            .with_components(component_scores)
    }

    fn score_pathway_domain(
        &self,
        patient: &PatientSnapshot,
        adverse_event: AdverseEventType,
    ) -> DomainScore {
        let ae_node_id = adverse_event.node_id();
        let upstream = self.graph.get_upstream_causes(&ae_node_id, 4);

        if upstream.is_empty() {
            return DomainScore::new("pathway", 0.0, 0.3);
        }

        let mut component_scores: HashMap<String, f64> = HashMap::new();
        let mut activated_weight = 0.0;
        let mut total_weight = 0.0;

        for (node, weight) in &upstream {
            total_weight += weight;
            if let Some(value) = patient.biomarkers.get(&node.node_id) {
                if let Some((_, high)) = psp_common::probe_reference_range(&node.properties) {
                    if *value > high {
                        let fold_change = value / high.max(1e-9);
                        let activation = (fold_change.max(1.0).log2() / 5.0).min(1.0);
                        activated_weight += weight * activation;
                        component_scores.insert(node.node_id.clone(), activation);
                    }
                }
            }
        }

        let score = if total_weight > 0.0 {
            activated_weight / total_weight
        } else {
            0.0
        };
        let confidence = (component_scores.len() as f64 / (5usize.min(upstream.len())).max(1) as f64)
            .min(1.0);

        DomainScore::new("pathway", score.min(1.0), confidence).with_components(component_scores)
    }

    fn score_model_domain(model_predictions: &[ModelScoreInput]) -> DomainScore {
        if model_predictions.is_empty() {
            return DomainScore::new("model", 0.0, 0.0);
        }

        let mut components = HashMap::new();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for pred in model_predictions {
            weighted_sum += pred.score * pred.confidence;
            weight_total += pred.confidence;
            components.insert(pred.model_name.clone(), pred.score);
        }

        let aggregate = if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            0.0
        };
        let avg_confidence = weight_total / model_predictions.len() as f64;

        DomainScore::new("model", aggregate.min(1.0), avg_confidence).with_components(components)
    }

    fn score_clinical_domain(
        &self,
        patient: &PatientSnapshot,
        adverse_event: AdverseEventType,
    ) -> DomainScore {
        let mut components = HashMap::new();

        components.insert("disease_burden".to_string(), patient.disease_burden);
        components.insert(
            "prior_therapies".to_string(),
            (patient.prior_therapies as f64 / 6.0).min(1.0),
        );

        let age_score = if patient.age_years < 50 {
            0.1
        } else if patient.age_years < 60 {
            0.2
        } else if patient.age_years < 70 {
            0.4
        } else {
            0.6
        };
        components.insert("age".to_string(), age_score);

        let comorbidity_score = (patient.comorbidities.len() as f64 * 0.15).min(1.0);
        components.insert("comorbidities".to_string(), comorbidity_score);

        let temporal_risk = Self::temporal_risk_curve(patient.hours_since_infusion, adverse_event);
        components.insert("temporal_risk".to_string(), temporal_risk);

        let weights: HashMap<&str, f64> = HashMap::from([
            ("disease_burden", 0.25),
            ("prior_therapies", 0.15),
            ("age", 0.15),
            ("comorbidities", 0.15),
            ("temporal_risk", 0.30),
        ]);

        let aggregate: f64 = components
            .iter()
            .map(|(k, v)| v * weights.get(k.as_str()).copied().unwrap_or(0.2))
            .sum();

        DomainScore::new("clinical", aggregate.min(1.0), 0.85).with_components(components)
    }

    fn temporal_risk_curve(hours_since_infusion: f64, adverse_event: AdverseEventType) -> f64 {
        let (peak_start, peak_end) = peak_window(adverse_event);

        if hours_since_infusion < 0.0 {
            0.1
        } else if hours_since_infusion < peak_start {
            0.2 + 0.5 * (hours_since_infusion / peak_start)
        } else if hours_since_infusion <= peak_end {
            let midpoint = (peak_start + peak_end) / 2.0;
            let distance_from_mid = (hours_since_infusion - midpoint).abs() / ((peak_end - peak_start) / 2.0);
            0.7 + 0.3 * (1.0 - distance_from_mid)
        } else {
            let hours_past_peak = hours_since_infusion - peak_end;
            0.3 * (-0.01 * hours_past_peak).exp()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psp_graph::{EdgeType, GraphEdge, GraphNode, NodeType};
    use std::collections::HashMap as Map;

    fn graph_with_il6() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new();
        let il6 = GraphNode::new("CYTOKINE:IL6", NodeType::Cytokine, "IL-6").with_properties(
            Map::from([("normal_range_pg_ml".to_string(), serde_json::json!([0.0, 7.0]))]),
        );
        let ae = GraphNode::new("AE:CRS", NodeType::AdverseEvent, "CRS");
        graph.add_node(il6);
        graph.add_node(ae);
        graph
            .add_edge(GraphEdge::new("CYTOKINE:IL6", "AE:CRS", EdgeType::Triggers, 0.9))
            .unwrap();
        graph
    }

    #[test]
    fn biomarker_domain_scores_zero_when_no_data_present() {
        let graph = graph_with_il6();
        let scorer = PatientRiskScorer::new(&graph, &ScorerConfig::default());
        let patient = PatientSnapshot {
            patient_id: "P1".to_string(),
            ..Default::default()
        };
        let index = scorer.compute(&patient, AdverseEventType::Crs, &[]);
        let biomarker = index.domain_scores.iter().find(|d| d.domain == "biomarker").unwrap();
        assert_eq!(biomarker.score, 0.0);
        assert_eq!(biomarker.confidence, 0.0);
    }

    #[test]
    fn elevated_il6_raises_biomarker_and_pathway_domains() {
        let graph = graph_with_il6();
        let scorer = PatientRiskScorer::new(&graph, &ScorerConfig::default());
        let mut patient = PatientSnapshot {
            patient_id: "P1".to_string(),
            hours_since_infusion: 48.0,
            ..Default::default()
        };
        patient.biomarkers.insert("CYTOKINE:IL6".to_string(), 600.0);

        let index = scorer.compute(&patient, AdverseEventType::Crs, &[]);
        let biomarker = index.domain_scores.iter().find(|d| d.domain == "biomarker").unwrap();
        let pathway = index.domain_scores.iter().find(|d| d.domain == "pathway").unwrap();

        assert!(biomarker.score > 0.5);
        assert!(pathway.score > 0.0);
    }

    #[test]
    fn model_domain_is_zero_confidence_with_no_predictions() {
        let graph = graph_with_il6();
        let scorer = PatientRiskScorer::new(&graph, &ScorerConfig::default());
        let patient = PatientSnapshot {
            patient_id: "P1".to_string(),
            ..Default::default()
        };
        let index = scorer.compute(&patient, AdverseEventType::Crs, &[]);
        let model = index.domain_scores.iter().find(|d| d.domain == "model").unwrap();
        assert_eq!(model.score, 0.0);
        assert_eq!(model.confidence, 0.0);
    }
}
