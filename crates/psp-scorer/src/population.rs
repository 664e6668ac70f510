//! Population-level risk analysis: aggregates patient Safety Indices into
//! trial- and portfolio-level summaries, subgroup stratification, and early
//! stopping signal detection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use psp_common::{AdverseEventType, RiskCategory, SafetyIndex};

/// Aggregated Safety Index across a patient population (trial or portfolio).
#[derive(Debug, Clone)]
pub struct PopulationSafetyIndex {
    pub population_id: String,
    pub population_size: usize,
    pub adverse_event: AdverseEventType,
    pub mean_score: f64,
    pub median_score: f64,
    pub std_score: f64,
    pub high_risk_count: usize,
    pub critical_risk_count: usize,
    pub risk_distribution: HashMap<RiskCategory, usize>,
    pub top_risk_drivers: Vec<(String, f64)>,
    pub timestamp: DateTime<Utc>,
}

/// Risk analysis for a patient subgroup.
#[derive(Debug, Clone)]
pub struct SubgroupAnalysis {
    pub subgroup_name: String,
    pub patient_count: usize,
    pub mean_score: f64,
    pub high_risk_fraction: f64,
    pub relative_risk: f64,
}

/// Signal that a trial may need safety-related early stopping.
#[derive(Debug, Clone)]
pub struct EarlyStoppingSignal {
    pub signal_type: &'static str,
    pub description: String,
    pub severity: f64,
    pub affected_patients: usize,
    pub recommendation: &'static str,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Analyzes Safety Index data across patient populations: trial-level
/// aggregate metrics, subgroup stratification, and early-stopping signals.
pub struct PopulationRiskAnalyzer {
    high_risk_threshold: f64,
    critical_risk_threshold: f64,
    stop_rate_threshold: f64,
    stop_severity_threshold: f64,
}

impl Default for PopulationRiskAnalyzer {
    fn default() -> Self {
        Self {
            high_risk_threshold: 0.6,
            critical_risk_threshold: 0.8,
            stop_rate_threshold: 0.20,
            stop_severity_threshold: 0.85,
        }
    }
}

impl PopulationRiskAnalyzer {
    pub fn new(
        high_risk_threshold: f64,
        critical_risk_threshold: f64,
        stop_rate_threshold: f64,
        stop_severity_threshold: f64,
    ) -> Self {
        Self {
            high_risk_threshold,
            critical_risk_threshold,
            stop_rate_threshold,
            stop_severity_threshold,
        }
    }

    pub fn compute_population_index(
        &self,
        patient_indices: &[SafetyIndex],
        population_id: &str,
        adverse_event: AdverseEventType,
    ) -> psp_common::Result<PopulationSafetyIndex> {
        if patient_indices.is_empty() {
            return Err(psp_common::Error::InvalidInput(
                "cannot compute population index with no patients".to_string(),
            ));
        }

        let relevant: Vec<&SafetyIndex> = patient_indices
            .iter()
            .filter(|idx| idx.adverse_event == adverse_event)
            .collect();
        if relevant.is_empty() {
            return Err(psp_common::Error::InvalidInput(format!(
                "no patient indices for adverse event {adverse_event}"
            )));
        }

        let scores: Vec<f64> = relevant.iter().map(|idx| idx.composite_score).collect();
        let n = scores.len();

        let mean_score = mean(&scores);
        let median_score = median(&scores);
        let std_score = stdev(&scores);

        let high_risk_count = scores.iter().filter(|s| **s >= self.high_risk_threshold).count();
        let critical_risk_count = scores
            .iter()
            .filter(|s| **s >= self.critical_risk_threshold)
            .count();

        let mut risk_distribution: HashMap<RiskCategory, usize> = HashMap::new();
        for score in &scores {
            *risk_distribution.entry(SafetyIndex::categorize(*score)).or_insert(0) += 1;
        }

        let mut driver_totals: HashMap<String, f64> = HashMap::new();
        let mut driver_counts: HashMap<String, usize> = HashMap::new();
        for idx in &relevant {
            for ds in &idx.domain_scores {
                *driver_totals.entry(ds.domain.clone()).or_insert(0.0) += ds.score;
                *driver_counts.entry(ds.domain.clone()).or_insert(0) += 1;
            }
        }
        let mut top_drivers: Vec<(String, f64)> = driver_totals
            .iter()
            .map(|(domain, total)| (domain.clone(), total / driver_counts[domain] as f64))
            .collect();
        top_drivers.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

        tracing::info!(
            population_id,
            adverse_event = %adverse_event,
            n,
            mean_score,
            high_risk_count,
            critical_risk_count,
            "population index computed"
        );

        Ok(PopulationSafetyIndex {
            population_id: population_id.to_string(),
            population_size: n,
            adverse_event,
            mean_score,
            median_score,
            std_score,
            high_risk_count,
            critical_risk_count,
            risk_distribution,
            top_risk_drivers: top_drivers,
            timestamp: Utc::now(),
        })
    }

    pub fn stratify_subgroups(
        &self,
        patient_indices: &[SafetyIndex],
        patient_metadata: &HashMap<String, String>,
        stratify_by: &str,
    ) -> Vec<SubgroupAnalysis> {
        let mut groups: HashMap<String, Vec<f64>> = HashMap::new();
        for idx in patient_indices {
            let group_value = patient_metadata
                .get(&idx.patient_id)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string());
            groups.entry(group_value).or_default().push(idx.composite_score);
        }

        let all_scores: Vec<f64> = patient_indices.iter().map(|idx| idx.composite_score).collect();
        let overall_mean = if all_scores.is_empty() { 0.0 } else { mean(&all_scores) };

        let mut group_names: Vec<&String> = groups.keys().collect();
        group_names.sort();

        group_names
            .into_iter()
            .map(|group_name| {
                let scores = &groups[group_name];
                let group_mean = mean(scores);
                let high_risk_frac =
                    scores.iter().filter(|s| **s >= self.high_risk_threshold).count() as f64
                        / scores.len() as f64;
                let relative_risk = if overall_mean > 0.0 {
                    group_mean / overall_mean
                } else {
                    1.0
                };

                SubgroupAnalysis {
                    subgroup_name: format!("{stratify_by}={group_name}"),
                    patient_count: scores.len(),
                    mean_score: group_mean,
                    high_risk_fraction: high_risk_frac,
                    relative_risk,
                }
            })
            .collect()
    }

    pub fn detect_early_stopping_signals(
        &self,
        patient_indices: &[SafetyIndex],
    ) -> Vec<EarlyStoppingSignal> {
        let mut signals = Vec::new();
        if patient_indices.is_empty() {
            return signals;
        }

        let scores: Vec<f64> = patient_indices.iter().map(|idx| idx.composite_score).collect();
        let n = scores.len();

        let high_risk_count = scores.iter().filter(|s| **s >= self.high_risk_threshold).count();
        let high_risk_rate = high_risk_count as f64 / n as f64;

        if high_risk_rate >= self.stop_rate_threshold {
            signals.push(EarlyStoppingSignal {
                signal_type: "rate",
                description: format!(
                    "{high_risk_count}/{n} patients ({:.0}%) have Safety Index >= {}",
                    high_risk_rate * 100.0,
                    self.high_risk_threshold
                ),
                severity: (high_risk_rate / self.stop_rate_threshold).min(1.0),
                affected_patients: high_risk_count,
                recommendation: "Convene Data Safety Monitoring Board (DSMB) for review. \
                     Consider dose modification or enrollment pause.",
            });
        }

        let critical_patients: Vec<&SafetyIndex> = patient_indices
            .iter()
            .filter(|idx| idx.composite_score >= self.stop_severity_threshold)
            .collect();
        if !critical_patients.is_empty() {
            let worst = critical_patients
                .iter()
                .max_by(|a, b| a.composite_score.partial_cmp(&b.composite_score).unwrap())
                .unwrap();
            signals.push(EarlyStoppingSignal {
                signal_type: "severity",
                description: format!(
                    "{} patient(s) with Safety Index >= {}. Worst: {} at {:.3}",
                    critical_patients.len(),
                    self.stop_severity_threshold,
                    worst.patient_id,
                    worst.composite_score
                ),
                severity: worst.composite_score,
                affected_patients: critical_patients.len(),
                recommendation: "Immediate clinical review of critical-risk patients. \
                     Evaluate need for intervention escalation.",
            });
        }

        let worsening: Vec<&SafetyIndex> = patient_indices.iter().filter(|idx| idx.trend > 0.01).collect();
        if worsening.len() as f64 > n as f64 * 0.3 {
            let avg_trend = mean(&worsening.iter().map(|idx| idx.trend).collect::<Vec<_>>());
            signals.push(EarlyStoppingSignal {
                signal_type: "trend",
                description: format!(
                    "{}/{n} patients ({:.0}%) show worsening trend (avg +{:.4}/hr)",
                    worsening.len(),
                    (worsening.len() as f64 / n as f64) * 100.0,
                    avg_trend
                ),
                severity: (worsening.len() as f64 / n as f64).min(1.0),
                affected_patients: worsening.len(),
                recommendation: "Increase monitoring frequency. Review biomarker trajectories \
                     for accelerating cytokine release patterns.",
            });
        }

        signals
    }

    pub fn compute_portfolio_risk(
        &self,
        trial_indices: &HashMap<String, Vec<SafetyIndex>>,
        adverse_event: AdverseEventType,
    ) -> HashMap<String, PopulationSafetyIndex> {
        let mut results = HashMap::new();
        for (trial_id, indices) in trial_indices {
            match self.compute_population_index(indices, trial_id, adverse_event) {
                Ok(index) => {
                    results.insert(trial_id.clone(), index);
                }
                Err(err) => {
                    tracing::warn!(trial_id, error = %err, "skipping trial in portfolio risk");
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psp_common::DomainScore;

    fn index(patient_id: &str, score: f64, trend: f64) -> SafetyIndex {
        SafetyIndex {
            patient_id: patient_id.to_string(),
            adverse_event: AdverseEventType::Crs,
            composite_score: score,
            risk_category: SafetyIndex::categorize(score),
            domain_scores: vec![DomainScore::new("biomarker", score, 0.8)],
            trend,
            hours_since_infusion: 48.0,
            prediction_horizon_hours: 24.0,
            model_agreement: 1.0,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn empty_population_is_an_error() {
        let analyzer = PopulationRiskAnalyzer::default();
        let result = analyzer.compute_population_index(&[], "TRIAL-1", AdverseEventType::Crs);
        assert!(result.is_err());
    }

    #[test]
    fn high_risk_rate_triggers_early_stopping_signal() {
        let analyzer = PopulationRiskAnalyzer::default();
        let indices = vec![
            index("P1", 0.7, 0.0),
            index("P2", 0.7, 0.0),
            index("P3", 0.1, 0.0),
            index("P4", 0.1, 0.0),
            index("P5", 0.1, 0.0),
        ];
        let signals = analyzer.detect_early_stopping_signals(&indices);
        assert!(signals.iter().any(|s| s.signal_type == "rate"));
    }

    #[test]
    fn no_signals_when_population_is_low_risk() {
        let analyzer = PopulationRiskAnalyzer::default();
        let indices = vec![index("P1", 0.1, 0.0), index("P2", 0.15, 0.0)];
        let signals = analyzer.detect_early_stopping_signals(&indices);
        assert!(signals.is_empty());
    }
}
