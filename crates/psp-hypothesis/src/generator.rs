//! Generates mechanistic safety hypotheses by walking the knowledge graph
//! upstream from a predicted adverse event and matching activated entities
//! against the patient's elevated biomarkers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use psp_common::{AdverseEventType, Prediction};
use psp_graph::{Direction, EdgeType, GraphNode, KnowledgeGraph, NodeType, PathStep};

use crate::types::{EvidenceLevel, MechanisticHypothesis};

/// `(node, causal_weight, fold_change)` for an upstream entity whose patient
/// biomarker reading is elevated above normal.
type ActivatedEntity<'g> = (&'g GraphNode, f64, f64);

/// Generates mechanistic hypotheses from a knowledge graph and patient
/// biomarker/model-prediction context.
///
/// The pipeline: find entities upstream of the adverse event with matching
/// elevated biomarkers, then build pathway, amplification-loop, and
/// escalation-risk hypotheses from them, filtered and ranked by confidence.
pub struct HypothesisGenerator<'g> {
    graph: &'g KnowledgeGraph,
    max_hypotheses: usize,
    min_confidence: f64,
    counter: AtomicU64,
}

impl<'g> HypothesisGenerator<'g> {
    pub fn new(graph: &'g KnowledgeGraph, max_hypotheses: usize, min_confidence: f64) -> Self {
        Self {
            graph,
            max_hypotheses,
            min_confidence,
            counter: AtomicU64::new(0),
        }
    }

    pub fn generate(
        &self,
        patient_id: &str,
        adverse_event: AdverseEventType,
        biomarkers: &HashMap<String, f64>,
        model_predictions: &[Prediction],
    ) -> Vec<MechanisticHypothesis> {
        tracing::info!(
            patient_id,
            adverse_event = %adverse_event,
            biomarker_count = biomarkers.len(),
            "generating mechanistic hypotheses"
        );

        let ae_node_id = adverse_event.node_id();
        let upstream = self.graph.get_upstream_causes(&ae_node_id, 5);
        let activated = self.find_activated_entities(&upstream, biomarkers);

        let mut hypotheses = Vec::new();
        hypotheses.extend(self.generate_pathway_hypotheses(
            patient_id,
            adverse_event,
            &ae_node_id,
            &activated,
            biomarkers,
            model_predictions,
        ));
        hypotheses.extend(self.detect_amplification_loops(patient_id, adverse_event, &activated));
        hypotheses.extend(self.generate_escalation_hypotheses(patient_id, adverse_event, &activated));

        hypotheses.retain(|h| h.confidence >= self.min_confidence);
        hypotheses.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());
        hypotheses.truncate(self.max_hypotheses);

        tracing::info!(
            patient_id,
            count = hypotheses.len(),
            "generated hypotheses"
        );

        hypotheses
    }

    fn find_activated_entities(
        &self,
        upstream: &[(&'g GraphNode, f64)],
        biomarkers: &HashMap<String, f64>,
    ) -> Vec<ActivatedEntity<'g>> {
        let mut activated = Vec::new();
        for (node, weight) in upstream {
            let value = match biomarkers.get(&node.node_id) {
                Some(v) => *v,
                None => continue,
            };

            match psp_common::probe_reference_range(&node.properties) {
                Some((_, high)) if high > 0.0 => {
                    let fold_change = value / high;
                    if fold_change > 1.5 {
                        activated.push((*node, *weight, fold_change));
                    }
                }
                _ if value > 0.0 => activated.push((*node, *weight, 1.0)),
                _ => {}
            }
        }
        activated
    }

    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("HYP-{n:06}")
    }

    #[allow(clippy::too_many_arguments)]
    fn generate_pathway_hypotheses(
        &self,
        patient_id: &str,
        adverse_event: AdverseEventType,
        ae_node_id: &str,
        activated: &[ActivatedEntity<'g>],
        biomarkers: &HashMap<String, f64>,
        model_predictions: &[Prediction],
    ) -> Vec<MechanisticHypothesis> {
        let mut hypotheses = Vec::new();

        for (node, causal_weight, fold_change) in activated {
            let path_result = self.graph.find_paths(&node.node_id, ae_node_id, 4, None);
            if path_result.paths.is_empty() {
                continue;
            }

            let best_path = &path_result.max_weight_path;
            let mut chain: Vec<String> = best_path.iter().map(|(src, _, _)| src.clone()).collect();
            if let Some((_, _, last_target)) = best_path.last() {
                chain.push(last_target.clone());
            }

            let evidence_level = self.assess_evidence_level(*fold_change, model_predictions);

            let mut evidence = vec![
                format!("{} is {:.1}x above normal range", node.name, fold_change),
                format!(
                    "KG path to {}: {} hops (causal weight: {:.2})",
                    adverse_event,
                    best_path.len(),
                    causal_weight
                ),
            ];
            if !model_predictions.is_empty() {
                let agreeing = model_predictions.iter().filter(|p| p.risk_score > 0.5).count();
                evidence.push(format!(
                    "{agreeing}/{} models predict elevated risk",
                    model_predictions.len()
                ));
            }

            let confidence =
                Self::compute_hypothesis_confidence(*causal_weight, *fold_change, evidence_level);
            let therapeutics = self.find_therapeutic_targets(&chain);
            let testable = self.build_testable_predictions(node, &chain);
            let suggested = self.suggest_monitoring_biomarkers(&chain, biomarkers);

            hypotheses.push(MechanisticHypothesis {
                hypothesis_id: self.next_id(),
                patient_id: patient_id.to_string(),
                adverse_event,
                title: format!(
                    "{}-driven {} via {}-step cascade",
                    node.name,
                    adverse_event,
                    best_path.len()
                ),
                mechanism_chain: chain,
                mechanism_description: self.describe_mechanism(best_path),
                supporting_evidence: evidence,
                evidence_level,
                confidence,
                testable_predictions: testable,
                suggested_biomarkers: suggested,
                therapeutic_implications: therapeutics,
                timestamp: Utc::now(),
            });
        }

        hypotheses
    }

    fn detect_amplification_loops(
        &self,
        patient_id: &str,
        adverse_event: AdverseEventType,
        activated: &[ActivatedEntity<'g>],
    ) -> Vec<MechanisticHypothesis> {
        let mut hypotheses = Vec::new();
        let activated_ids: HashSet<String> =
            activated.iter().map(|(node, _, _)| node.node_id.clone()).collect();
        let loop_edges: HashSet<EdgeType> = HashSet::from([EdgeType::Amplifies, EdgeType::Causes]);

        for (node, _, fold_change) in activated {
            let neighbors = self.graph.get_neighbors(&node.node_id, Some(&loop_edges), Direction::Out);
            for (_, target) in neighbors {
                if !activated_ids.contains(&target.node_id) || target.node_id == node.node_id {
                    continue;
                }
                let reverse = self.graph.get_neighbors(&target.node_id, Some(&loop_edges), Direction::Out);
                if reverse.iter().any(|(_, rev_target)| rev_target.node_id == node.node_id) {
                    hypotheses.push(MechanisticHypothesis {
                        hypothesis_id: self.next_id(),
                        patient_id: patient_id.to_string(),
                        adverse_event,
                        title: format!("Positive feedback loop: {} <-> {}", node.name, target.name),
                        mechanism_chain: vec![
                            node.node_id.clone(),
                            target.node_id.clone(),
                            node.node_id.clone(),
                        ],
                        mechanism_description: format!(
                            "{} and {} form a positive feedback loop that may sustain and \
                             amplify the inflammatory response. Both are currently elevated \
                             above normal, suggesting active loop engagement.",
                            node.name, target.name
                        ),
                        supporting_evidence: vec![
                            format!("{} is {:.1}x above normal", node.name, fold_change),
                            "Bidirectional amplification edges in knowledge graph".to_string(),
                        ],
                        evidence_level: EvidenceLevel::Moderate,
                        confidence: (fold_change / 20.0 + 0.3).min(0.8),
                        testable_predictions: vec![
                            format!("Blocking {} should reduce {}", node.name, target.name),
                            "Both markers should rise in parallel if loop is active".to_string(),
                        ],
                        suggested_biomarkers: Vec::new(),
                        therapeutic_implications: Vec::new(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        hypotheses
    }

    fn generate_escalation_hypotheses(
        &self,
        patient_id: &str,
        adverse_event: AdverseEventType,
        activated: &[ActivatedEntity<'g>],
    ) -> Vec<MechanisticHypothesis> {
        let mut hypotheses = Vec::new();
        let severe_edges: HashSet<EdgeType> =
            HashSet::from([EdgeType::Causes, EdgeType::Triggers, EdgeType::Activates]);

        for (node, _, fold_change) in activated {
            if !(*fold_change > 2.0 && *fold_change < 10.0) {
                continue;
            }

            let severe_signs = self.graph.get_neighbors(&node.node_id, Some(&severe_edges), Direction::Out);
            let severe_targets: Vec<&GraphNode> = severe_signs
                .iter()
                .map(|(_, n)| *n)
                .filter(|n| matches!(n.node_type, NodeType::AdverseEvent | NodeType::ClinicalSign))
                .collect();

            if severe_targets.is_empty() {
                continue;
            }

            let capped: Vec<&GraphNode> = severe_targets.iter().take(3).cloned().collect();
            let target_names: Vec<&str> = capped.iter().map(|n| n.name.as_str()).collect();

            let mut chain = vec![node.node_id.clone()];
            chain.extend(capped.iter().map(|n| n.node_id.clone()));

            hypotheses.push(MechanisticHypothesis {
                hypothesis_id: self.next_id(),
                patient_id: patient_id.to_string(),
                adverse_event,
                title: format!("Escalation risk: rising {} ({:.1}x)", node.name, fold_change),
                mechanism_chain: chain,
                mechanism_description: format!(
                    "{} is currently {:.1}x above normal. If it continues to rise, KG paths \
                     indicate it could trigger: {}. Close monitoring recommended.",
                    node.name,
                    fold_change,
                    target_names.join(", ")
                ),
                supporting_evidence: vec![
                    format!("{} at {:.1}x normal", node.name, fold_change),
                    format!(
                        "Direct pathway connections to {} severe outcomes",
                        severe_targets.len()
                    ),
                ],
                evidence_level: EvidenceLevel::Moderate,
                confidence: (fold_change / 15.0 + 0.2).min(0.6),
                testable_predictions: vec![format!(
                    "If {} exceeds 10x normal, expect clinical deterioration",
                    node.name
                )],
                suggested_biomarkers: vec![node.node_id.clone()],
                therapeutic_implications: Vec::new(),
                timestamp: Utc::now(),
            });
        }

        hypotheses
    }

    fn assess_evidence_level(
        &self,
        fold_change: f64,
        model_predictions: &[Prediction],
    ) -> EvidenceLevel {
        let has_biomarker = fold_change > 2.0;
        let has_model_support = if model_predictions.is_empty() {
            false
        } else {
            let high_risk = model_predictions.iter().filter(|p| p.risk_score > 0.5).count();
            high_risk as f64 > model_predictions.len() as f64 / 2.0
        };

        if has_biomarker && has_model_support {
            EvidenceLevel::Strong
        } else if has_biomarker || has_model_support {
            EvidenceLevel::Moderate
        } else {
            EvidenceLevel::Weak
        }
    }

    fn compute_hypothesis_confidence(
        causal_weight: f64,
        fold_change: f64,
        evidence_level: EvidenceLevel,
    ) -> f64 {
        let base = (causal_weight * 0.5 + (fold_change / 20.0).min(0.5)).min(1.0);
        (base * evidence_level.multiplier() + 0.1).min(1.0)
    }

    fn describe_mechanism(&self, path: &[PathStep]) -> String {
        if path.is_empty() {
            return "Unknown mechanism".to_string();
        }
        path.iter()
            .map(|(source_id, edge_type, target_id)| {
                let source_name = self
                    .graph
                    .get_node(source_id)
                    .map(|n| n.name.as_str())
                    .unwrap_or(source_id);
                let target_name = self
                    .graph
                    .get_node(target_id)
                    .map(|n| n.name.as_str())
                    .unwrap_or(target_id);
                format!("{source_name} {} {target_name}", edge_type.as_narrative_phrase())
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    fn find_therapeutic_targets(&self, chain: &[String]) -> Vec<String> {
        let mut therapeutics = Vec::new();
        let target_edges: HashSet<EdgeType> =
            HashSet::from([EdgeType::Targets, EdgeType::Inhibits, EdgeType::Treats]);

        for drug in self.graph.get_nodes_by_type(NodeType::Drug) {
            let targets = self.graph.get_neighbors(&drug.node_id, Some(&target_edges), Direction::Out);
            for (_, target_node) in targets {
                if chain.contains(&target_node.node_id) {
                    let mechanism = drug
                        .properties
                        .get("mechanism")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown mechanism");
                    therapeutics.push(format!(
                        "{} ({mechanism}) targets {}",
                        drug.name, target_node.name
                    ));
                    break;
                }
            }
        }

        therapeutics
    }

    fn build_testable_predictions(&self, trigger_node: &GraphNode, chain: &[String]) -> Vec<String> {
        let mut predictions = vec![format!(
            "If {} continues to rise, downstream markers in the cascade should follow within 6-12 hours",
            trigger_node.name
        )];

        for node_id in chain {
            if let Some(node) = self.graph.get_node(node_id) {
                if node.node_type == NodeType::Cytokine {
                    predictions.push(format!("Monitor {} for secondary elevation", node.name));
                }
            }
        }

        predictions.truncate(4);
        predictions
    }

    fn suggest_monitoring_biomarkers(
        &self,
        chain: &[String],
        current_biomarkers: &HashMap<String, f64>,
    ) -> Vec<String> {
        let mut suggestions = Vec::new();
        for node_id in chain {
            if current_biomarkers.contains_key(node_id) {
                continue;
            }
            if let Some(node) = self.graph.get_node(node_id) {
                if matches!(
                    node.node_type,
                    NodeType::Cytokine | NodeType::Biomarker | NodeType::Protein
                ) {
                    suggestions.push(node_id.clone());
                }
            }
        }
        suggestions.truncate(5);
        suggestions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psp_graph::{GraphEdge, GraphNode, NodeType};
    use std::collections::HashMap as Map;

    fn graph_with_crs_cascade() -> KnowledgeGraph {
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
    fn elevated_biomarker_produces_pathway_hypothesis() {
        let graph = graph_with_crs_cascade();
        let generator = HypothesisGenerator::new(&graph, 5, 0.2);
        let biomarkers = Map::from([("CYTOKINE:IL6".to_string(), 700.0)]);

        let hypotheses = generator.generate("PAT-1", AdverseEventType::Crs, &biomarkers, &[]);

        assert!(!hypotheses.is_empty());
        assert!(hypotheses[0].mechanism_chain.contains(&"CYTOKINE:IL6".to_string()));
    }

    #[test]
    fn no_elevated_biomarkers_produces_no_hypotheses() {
        let graph = graph_with_crs_cascade();
        let generator = HypothesisGenerator::new(&graph, 5, 0.2);
        let hypotheses = generator.generate("PAT-1", AdverseEventType::Crs, &Map::new(), &[]);
        assert!(hypotheses.is_empty());
    }

    #[test]
    fn hypotheses_are_sorted_by_descending_confidence() {
        let graph = graph_with_crs_cascade();
        let generator = HypothesisGenerator::new(&graph, 5, 0.0);
        let biomarkers = Map::from([("CYTOKINE:IL6".to_string(), 700.0)]);
        let hypotheses = generator.generate("PAT-1", AdverseEventType::Crs, &biomarkers, &[]);

        for pair in hypotheses.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }
}
