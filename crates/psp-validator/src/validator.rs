//! `MechanisticValidator`: five independent plausibility checks against the
//! knowledge graph, aggregated into an advisory overall verdict.

use crate::types::{ValidationAdjustments, ValidationCheck, ValidationReport, ValidationResult};
use chrono::Utc;
use psp_common::units::probe_reference_range;
use psp_common::{AdverseEventType, PatientSnapshot};
use psp_graph::KnowledgeGraph;

/// Hours-since-infusion window within which an adverse event is expected.
fn temporal_window(ae: AdverseEventType) -> (f64, f64) {
    match ae {
        AdverseEventType::Crs => (6.0, 336.0),
        AdverseEventType::Icans => (24.0, 504.0),
        AdverseEventType::Hlh => (48.0, 504.0),
    }
}

/// Disjunction of conjunctions of node IDs that must be elevated for a
/// biomarker-consistency match.
fn required_biomarker_patterns(ae: AdverseEventType) -> &'static [&'static [&'static str]] {
    match ae {
        AdverseEventType::Crs => &[&["CYTOKINE:IL6"], &["CYTOKINE:IFN_GAMMA"], &["BIOMARKER:CRP", "BIOMARKER:FERRITIN"]],
        AdverseEventType::Icans => &[&["CYTOKINE:IL6"], &["CYTOKINE:ANG2"], &["BIOMARKER:VWF"]],
        AdverseEventType::Hlh => &[&["BIOMARKER:FERRITIN"], &["CYTOKINE:IL18"], &["BIOMARKER:SCD25"]],
    }
}

/// Expected temporal order of first-elevation across the AE's biomarker cascade.
fn cascade_order(ae: AdverseEventType) -> &'static [&'static str] {
    match ae {
        AdverseEventType::Crs => &["CYTOKINE:IFN_GAMMA", "CYTOKINE:TNF_ALPHA", "CYTOKINE:IL6", "BIOMARKER:CRP", "BIOMARKER:FERRITIN"],
        AdverseEventType::Icans => &["CYTOKINE:IFN_GAMMA", "CYTOKINE:IL6", "CYTOKINE:ANG2", "BIOMARKER:VWF"],
        AdverseEventType::Hlh => &["CYTOKINE:IFN_GAMMA", "CYTOKINE:IL18", "BIOMARKER:FERRITIN", "BIOMARKER:SCD25"],
    }
}

/// Five independent checks of a prediction's mechanistic plausibility,
/// performed against the knowledge graph.
pub struct MechanisticValidator<'g> {
    graph: &'g KnowledgeGraph,
    strict_mode: bool,
}

impl<'g> MechanisticValidator<'g> {
    pub fn new(graph: &'g KnowledgeGraph, strict_mode: bool) -> Self {
        Self { graph, strict_mode }
    }

    pub fn validate(
        &self,
        model_id: &str,
        patient: &PatientSnapshot,
        adverse_event: AdverseEventType,
        risk_score: f64,
    ) -> ValidationReport {
        let mut checks = vec![
            self.check_pathway_existence(patient, adverse_event),
            self.check_temporal_plausibility(patient, adverse_event, risk_score),
            self.check_biomarker_consistency(patient, adverse_event, risk_score),
        ];

        if !patient.biomarker_history.is_empty() {
            checks.push(self.check_cascade_ordering(patient, adverse_event));
        }

        checks.push(self.check_magnitude_plausibility(patient, risk_score));

        let overall_result = self.aggregate_results(&checks);
        let overall_confidence = Self::aggregate_confidence(&checks);
        let adjustments = Self::adjustments_for(overall_result);

        ValidationReport {
            prediction_model_id: model_id.to_string(),
            patient_id: patient.patient_id.clone(),
            adverse_event,
            overall_result,
            overall_confidence,
            checks,
            warnings: Vec::new(),
            adjustments,
            timestamp: Utc::now(),
        }
    }

    fn check_pathway_existence(&self, patient: &PatientSnapshot, ae: AdverseEventType) -> ValidationCheck {
        if patient.biomarkers.is_empty() {
            return ValidationCheck::new(
                "pathway_existence",
                ValidationResult::InsufficientData,
                "no biomarkers supplied",
                0.0,
            );
        }

        let target = ae.node_id();
        let connected = patient
            .biomarkers
            .keys()
            .filter(|id| self.graph.validate_mechanism(id, &target, None).0)
            .count();
        let fraction = connected as f64 / patient.biomarkers.len() as f64;

        if fraction >= 0.5 {
            ValidationCheck::new(
                "pathway_existence",
                ValidationResult::Valid,
                format!("{:.0}% of biomarkers have a mechanistic path to {target}", fraction * 100.0),
                (fraction + 0.2).min(1.0),
            )
        } else if fraction > 0.0 {
            ValidationCheck::new(
                "pathway_existence",
                ValidationResult::Plausible,
                format!("{:.0}% of biomarkers have a mechanistic path to {target}", fraction * 100.0),
                fraction + 0.1,
            )
        } else {
            ValidationCheck::new(
                "pathway_existence",
                ValidationResult::Implausible,
                format!("no biomarker has a mechanistic path to {target}"),
                0.3,
            )
        }
    }

    fn check_temporal_plausibility(&self, patient: &PatientSnapshot, ae: AdverseEventType, risk_score: f64) -> ValidationCheck {
        let (start, end) = temporal_window(ae);
        let hours = patient.hours_since_infusion;

        if hours < 0.0 {
            if risk_score > 0.5 {
                return ValidationCheck::new(
                    "temporal_plausibility",
                    ValidationResult::Implausible,
                    "risk predicted before infusion occurred",
                    0.9,
                );
            }
            return ValidationCheck::new("temporal_plausibility", ValidationResult::Valid, "pre-infusion, low risk", 0.8);
        }

        if hours >= start && hours <= end {
            return ValidationCheck::new(
                "temporal_plausibility",
                ValidationResult::Valid,
                format!("{hours}h is within the expected {start}-{end}h window"),
                0.9,
            );
        }

        if hours < start {
            if risk_score > 0.7 {
                return ValidationCheck::new(
                    "temporal_plausibility",
                    ValidationResult::Plausible,
                    format!("{hours}h is before the expected window but risk is high"),
                    0.5,
                );
            }
            return ValidationCheck::new("temporal_plausibility", ValidationResult::Valid, "before window, low risk", 0.8);
        }

        if risk_score > 0.5 {
            return ValidationCheck::new(
                "temporal_plausibility",
                ValidationResult::Plausible,
                format!("{hours}h is after the expected window but risk is elevated"),
                0.4,
            );
        }
        ValidationCheck::new("temporal_plausibility", ValidationResult::Valid, "after window, low risk", 0.8)
    }

    fn check_biomarker_consistency(&self, patient: &PatientSnapshot, ae: AdverseEventType, risk_score: f64) -> ValidationCheck {
        let elevated = self.elevated_biomarkers(patient);

        let pattern_matches = required_biomarker_patterns(ae)
            .iter()
            .any(|conjunction| conjunction.iter().all(|id| elevated.contains(*id)));

        if pattern_matches {
            return ValidationCheck::new(
                "biomarker_consistency",
                ValidationResult::Valid,
                "elevated biomarkers match an expected pattern",
                0.85,
            );
        }

        if !elevated.is_empty() && risk_score > 0.3 {
            return ValidationCheck::new(
                "biomarker_consistency",
                ValidationResult::Plausible,
                "some biomarkers elevated but no canonical pattern matched",
                0.5,
            );
        }

        if elevated.is_empty() && risk_score > 0.5 {
            return ValidationCheck::new(
                "biomarker_consistency",
                ValidationResult::Implausible,
                "high risk predicted with no elevated biomarkers",
                0.7,
            );
        }

        ValidationCheck::new("biomarker_consistency", ValidationResult::Valid, "consistent with available biomarkers", 0.8)
    }

    fn check_cascade_ordering(&self, patient: &PatientSnapshot, ae: AdverseEventType) -> ValidationCheck {
        let order = cascade_order(ae);

        let times: Vec<(usize, f64)> = order
            .iter()
            .enumerate()
            .filter_map(|(i, id)| self.first_elevation_time(patient, id).map(|t| (i, t)))
            .collect();

        if times.len() < 2 {
            return ValidationCheck::new(
                "cascade_ordering",
                ValidationResult::InsufficientData,
                "fewer than two biomarkers with elevation history",
                0.3,
            );
        }

        let mut ordered_pairs = 0;
        let mut total_pairs = 0;
        for a in 0..times.len() {
            for b in (a + 1)..times.len() {
                total_pairs += 1;
                if times[a].1 <= times[b].1 {
                    ordered_pairs += 1;
                }
            }
        }

        let consistency = ordered_pairs as f64 / total_pairs as f64;

        if consistency >= 0.8 {
            ValidationCheck::new(
                "cascade_ordering",
                ValidationResult::Valid,
                format!("{:.0}% of biomarker pairs respect the expected cascade order", consistency * 100.0),
                0.8,
            )
        } else if consistency >= 0.5 {
            ValidationCheck::new(
                "cascade_ordering",
                ValidationResult::Plausible,
                format!("{:.0}% of biomarker pairs respect the expected cascade order", consistency * 100.0),
                0.5,
            )
        } else {
            ValidationCheck::new(
                "cascade_ordering",
                ValidationResult::Implausible,
                format!("only {:.0}% of biomarker pairs respect the expected cascade order", consistency * 100.0),
                0.6,
            )
        }
    }

    fn check_magnitude_plausibility(&self, patient: &PatientSnapshot, risk_score: f64) -> ValidationCheck {
        let max_fold_change = self.max_fold_change(patient);

        if risk_score >= 0.8 && max_fold_change < 3.0 {
            return ValidationCheck::new(
                "magnitude_plausibility",
                ValidationResult::Implausible,
                format!("risk {risk_score:.2} is high but max fold-change is only {max_fold_change:.1}x"),
                0.7,
            );
        }

        if risk_score < 0.3 && max_fold_change > 50.0 {
            return ValidationCheck::new(
                "magnitude_plausibility",
                ValidationResult::Implausible,
                format!("risk {risk_score:.2} is low despite a {max_fold_change:.1}x fold-change"),
                0.7,
            );
        }

        ValidationCheck::new("magnitude_plausibility", ValidationResult::Valid, "magnitude consistent with risk", 0.7)
    }

    fn aggregate_results(&self, checks: &[ValidationCheck]) -> ValidationResult {
        let implausible = checks.iter().filter(|c| c.result == ValidationResult::Implausible).count();
        if implausible >= 2 || (implausible == 1 && self.strict_mode) {
            return ValidationResult::Implausible;
        }

        let n = checks.len();
        let valid = checks.iter().filter(|c| c.result == ValidationResult::Valid).count();
        let valid_or_plausible = valid
            + checks.iter().filter(|c| c.result == ValidationResult::Plausible).count();
        let insufficient = checks.iter().filter(|c| c.result == ValidationResult::InsufficientData).count();

        if valid * 2 >= n {
            ValidationResult::Valid
        } else if valid_or_plausible * 2 >= n {
            ValidationResult::Plausible
        } else if insufficient * 2 > n {
            ValidationResult::InsufficientData
        } else {
            ValidationResult::Plausible
        }
    }

    fn aggregate_confidence(checks: &[ValidationCheck]) -> f64 {
        if checks.is_empty() {
            return 0.0;
        }
        checks.iter().map(|c| c.confidence).sum::<f64>() / checks.len() as f64
    }

    fn adjustments_for(result: ValidationResult) -> ValidationAdjustments {
        match result {
            ValidationResult::Implausible => ValidationAdjustments {
                suggested_score_multiplier: Some(0.5),
                suggested_confidence_multiplier: None,
            },
            ValidationResult::Plausible => ValidationAdjustments {
                suggested_score_multiplier: None,
                suggested_confidence_multiplier: Some(0.8),
            },
            _ => ValidationAdjustments::default(),
        }
    }

    fn reference_range(&self, node_id: &str) -> Option<(f64, f64)> {
        probe_reference_range(&self.graph.get_node(node_id)?.properties)
    }

    fn elevated_biomarkers(&self, patient: &PatientSnapshot) -> std::collections::HashSet<String> {
        patient
            .biomarkers
            .iter()
            .filter(|(id, value)| self.reference_range(id).map(|(_, high)| **value > high * 1.5).unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn first_elevation_time(&self, patient: &PatientSnapshot, node_id: &str) -> Option<f64> {
        let history = patient.biomarker_history.get(node_id)?;
        let (_, high) = self.reference_range(node_id)?;
        history
            .iter()
            .filter(|(value, _)| *value > high * 1.5)
            .map(|(_, hours_ago)| -hours_ago)
            .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.min(t))))
    }

    fn max_fold_change(&self, patient: &PatientSnapshot) -> f64 {
        patient
            .biomarkers
            .iter()
            .filter_map(|(id, value)| self.reference_range(id).map(|(_, high)| (*value, high)))
            .filter(|(_, high)| *high > 0.0)
            .map(|(value, high)| value / high)
            .fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psp_graph::{GraphEdge, GraphNode, EdgeType, NodeType};
    use serde_json::json;
    use std::collections::HashMap;

    fn graph_with_crs_pathway() -> KnowledgeGraph {
        let mut g = KnowledgeGraph::new();
        let il6 = GraphNode::new("CYTOKINE:IL6", NodeType::Cytokine, "IL-6")
            .with_properties(HashMap::from([("normal_range_pg_ml".to_string(), json!([0.0, 7.0]))]));
        g.add_node(il6);
        g.add_node(GraphNode::new("AE:CRS", NodeType::AdverseEvent, "CRS"));
        g.add_edge(GraphEdge::new("CYTOKINE:IL6", "AE:CRS", EdgeType::Triggers, 0.9)).unwrap();
        g
    }

    #[test]
    fn pathway_existence_is_valid_when_biomarkers_connect() {
        let g = graph_with_crs_pathway();
        let validator = MechanisticValidator::new(&g, false);
        let mut patient = PatientSnapshot::default();
        patient.patient_id = "PAT-1".to_string();
        patient.biomarkers.insert("CYTOKINE:IL6".to_string(), 5000.0);
        let report = validator.validate("m1", &patient, AdverseEventType::Crs, 0.8);
        let check = report.checks.iter().find(|c| c.check_name == "pathway_existence").unwrap();
        assert_eq!(check.result, ValidationResult::Valid);
    }

    #[test]
    fn pre_infusion_high_risk_is_implausible() {
        let g = graph_with_crs_pathway();
        let validator = MechanisticValidator::new(&g, false);
        let mut patient = PatientSnapshot::default();
        patient.hours_since_infusion = -1.0;
        let report = validator.validate("m1", &patient, AdverseEventType::Crs, 0.7);
        let check = report.checks.iter().find(|c| c.check_name == "temporal_plausibility").unwrap();
        assert_eq!(check.result, ValidationResult::Implausible);
    }

    #[test]
    fn empty_patient_produces_insufficient_data_for_pathway_check() {
        let g = graph_with_crs_pathway();
        let validator = MechanisticValidator::new(&g, false);
        let mut patient = PatientSnapshot::default();
        patient.hours_since_infusion = 48.0;
        let report = validator.validate("m1", &patient, AdverseEventType::Crs, 0.1);
        let check = report.checks.iter().find(|c| c.check_name == "pathway_existence").unwrap();
        assert_eq!(check.result, ValidationResult::InsufficientData);
    }
}
