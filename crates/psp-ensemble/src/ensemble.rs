//! Combines per-model predictions into a single calibrated estimate with
//! uncertainty quantification, falling back to robust aggregation when
//! models diverge significantly.

use std::collections::HashMap;

use chrono::Utc;
use psp_common::config::EnsembleConfig;
use psp_common::{Error, Prediction, Result};

use crate::types::{
    AggregationMethod, CalibrationMetrics, DisagreementReport, EnsemblePrediction,
};

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn stdev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
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

/// Aggregates multi-model predictions with calibrated uncertainty.
///
/// Supports three strategies: confidence-weighted mean (default), median
/// (used under disagreement), and conservative max (safety-critical opt-in).
pub struct EnsembleAggregator {
    disagreement_threshold: f64,
    fallback_to_median: bool,
    confidence_floor: f64,
    historical_calibration: HashMap<String, f64>,
}

impl EnsembleAggregator {
    pub fn new(config: &EnsembleConfig) -> Self {
        Self {
            disagreement_threshold: config.disagreement_threshold,
            fallback_to_median: config.fallback_to_median_on_disagreement,
            confidence_floor: config.confidence_floor,
            historical_calibration: HashMap::new(),
        }
    }

    pub fn with_historical_calibration(mut self, calibration: HashMap<String, f64>) -> Self {
        self.historical_calibration = calibration;
        self
    }

    /// Aggregate multiple model predictions into one ensemble prediction.
    ///
    /// `method` overrides auto-selection. Fails with `Error::InvalidInput`
    /// if `predictions` is empty.
    pub fn aggregate(
        &self,
        predictions: &[Prediction],
        method: Option<AggregationMethod>,
    ) -> Result<EnsemblePrediction> {
        if predictions.is_empty() {
            return Err(Error::InvalidInput(
                "cannot aggregate empty prediction list".to_string(),
            ));
        }

        if predictions.len() == 1 {
            return Ok(self.single_model_result(&predictions[0]));
        }

        let disagreement = self.detect_disagreement(predictions);

        let method = method.unwrap_or_else(|| {
            if disagreement.is_disagreement && self.fallback_to_median {
                tracing::info!(
                    score = disagreement.disagreement_score,
                    "disagreement detected; falling back to median aggregation"
                );
                AggregationMethod::Median
            } else {
                AggregationMethod::ConfidenceWeighted
            }
        });

        let calibrated = self.apply_calibration(predictions);

        let risk_score = match method {
            AggregationMethod::Median => self.aggregate_median(&calibrated),
            AggregationMethod::ConservativeMax => self.aggregate_conservative_max(&calibrated),
            AggregationMethod::ConfidenceWeighted | AggregationMethod::SingleModel => {
                self.aggregate_confidence_weighted(&calibrated)
            }
        };

        let (lower, upper) = self.compute_uncertainty(&calibrated, &disagreement);
        let calibration = self.compute_calibration_metrics(&calibrated, &disagreement);
        let reasoning_summary = Self::merge_reasoning(predictions);
        let combined_key_drivers = Self::merge_key_drivers(predictions);

        let patient_id = predictions[0].patient_id.clone();
        let adverse_event = predictions[0].adverse_event;

        let ensemble = EnsemblePrediction {
            patient_id: patient_id.clone(),
            adverse_event,
            risk_score,
            confidence: calibration.effective_confidence,
            uncertainty_lower: lower,
            uncertainty_upper: upper,
            individual_predictions: predictions.to_vec(),
            disagreement,
            calibration,
            aggregation_method: method,
            reasoning_summary,
            combined_key_drivers,
            timestamp: Utc::now(),
        };

        tracing::info!(
            patient_id = %patient_id,
            adverse_event = %adverse_event,
            score = ensemble.risk_score,
            lower = ensemble.uncertainty_lower,
            upper = ensemble.uncertainty_upper,
            confidence = ensemble.confidence,
            agreement = ensemble.model_agreement(),
            method = method.as_str(),
            "ensemble aggregated"
        );

        Ok(ensemble)
    }

    fn aggregate_confidence_weighted(&self, predictions: &[Prediction]) -> f64 {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for pred in predictions {
            let w = pred.confidence.max(self.confidence_floor);
            weighted_sum += pred.risk_score * w;
            weight_total += w;
        }
        if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            0.0
        }
    }

    fn aggregate_median(&self, predictions: &[Prediction]) -> f64 {
        let scores: Vec<f64> = predictions.iter().map(|p| p.risk_score).collect();
        median(&scores)
    }

    fn aggregate_conservative_max(&self, predictions: &[Prediction]) -> f64 {
        predictions
            .iter()
            .map(|p| p.risk_score)
            .fold(f64::MIN, f64::max)
    }

    fn detect_disagreement(&self, predictions: &[Prediction]) -> DisagreementReport {
        let scores: Vec<f64> = predictions.iter().map(|p| p.risk_score).collect();
        let n = scores.len();

        if n < 2 {
            return DisagreementReport::none();
        }

        let mut max_divergence = 0.0;
        let mut divergent_pair = (String::new(), String::new());

        for i in 0..n {
            for j in (i + 1)..n {
                let diff = (scores[i] - scores[j]).abs();
                if diff > max_divergence {
                    max_divergence = diff;
                    divergent_pair =
                        (predictions[i].model_id.clone(), predictions[j].model_id.clone());
                }
            }
        }

        let std_dev = stdev(&scores);
        let disagreement_score = (std_dev * 2.0).min(1.0);
        let is_disagreement = max_divergence > self.disagreement_threshold;

        let min_score = scores.iter().cloned().fold(f64::MAX, f64::min);
        let max_score = scores.iter().cloned().fold(f64::MIN, f64::max);

        let mut analysis = format!(
            "Score range: [{min_score:.3}, {max_score:.3}]; std dev: {std_dev:.3}; \
             max divergence: {max_divergence:.3} ({} vs {})",
            divergent_pair.0, divergent_pair.1
        );
        if is_disagreement {
            analysis.push_str(&format!(
                "; DISAGREEMENT DETECTED: exceeds threshold {}",
                self.disagreement_threshold
            ));
        }

        DisagreementReport {
            is_disagreement,
            disagreement_score,
            max_divergence,
            divergent_pair,
            analysis,
        }
    }

    fn compute_uncertainty(
        &self,
        predictions: &[Prediction],
        disagreement: &DisagreementReport,
    ) -> (f64, f64) {
        let scores: Vec<f64> = predictions.iter().map(|p| p.risk_score).collect();
        let confidences: Vec<f64> = predictions.iter().map(|p| p.confidence).collect();

        let mean_score = mean(&scores);
        let std_score = if scores.len() > 1 {
            stdev(&scores)
        } else {
            0.1
        };
        let avg_confidence = mean(&confidences);

        let uncertainty_factor =
            1.5 * (1.0 - avg_confidence) + disagreement.disagreement_score;
        let half_width = std_score * (1.0 + uncertainty_factor);

        let lower = (mean_score - half_width).max(0.0);
        let upper = (mean_score + half_width).min(1.0);
        (lower, upper)
    }

    fn compute_calibration_metrics(
        &self,
        predictions: &[Prediction],
        disagreement: &DisagreementReport,
    ) -> CalibrationMetrics {
        let confidences: Vec<f64> = predictions.iter().map(|p| p.confidence).collect();
        let mean_conf = mean(&confidences);
        let conf_spread = confidences.iter().cloned().fold(f64::MIN, f64::max)
            - confidences.iter().cloned().fold(f64::MAX, f64::min);

        let disagreement_penalty = disagreement.disagreement_score * 0.3;
        let uncertainty_penalty = (1.0 - mean_conf) * 0.2;

        let adjustment = (1.0 - disagreement_penalty - uncertainty_penalty).max(0.5);
        let effective = (mean_conf * adjustment).max(self.confidence_floor);

        CalibrationMetrics {
            mean_confidence: mean_conf,
            confidence_spread: conf_spread,
            calibration_adjustment: adjustment,
            effective_confidence: effective,
        }
    }

    /// Apply historical per-model calibration multipliers to confidence.
    /// Returns clones; never mutates the caller's predictions.
    fn apply_calibration(&self, predictions: &[Prediction]) -> Vec<Prediction> {
        if self.historical_calibration.is_empty() {
            return predictions.to_vec();
        }

        predictions
            .iter()
            .map(|pred| {
                let multiplier = *self
                    .historical_calibration
                    .get(&pred.model_id)
                    .unwrap_or(&1.0);
                if multiplier != 1.0 {
                    let mut calibrated = pred.clone();
                    calibrated.confidence =
                        (pred.confidence * multiplier).clamp(self.confidence_floor, 1.0);
                    calibrated
                } else {
                    pred.clone()
                }
            })
            .collect()
    }

    fn merge_reasoning(predictions: &[Prediction]) -> String {
        predictions
            .iter()
            .filter(|p| !p.reasoning.is_empty())
            .map(|p| {
                let truncated: String = p.reasoning.chars().take(500).collect();
                format!("[{}] {}", p.model_id, truncated)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn merge_key_drivers(predictions: &[Prediction]) -> Vec<String> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for pred in predictions {
            for driver in &pred.key_drivers {
                *counts.entry(driver.clone()).or_insert(0) += 1;
            }
        }
        let mut drivers: Vec<String> = counts.keys().cloned().collect();
        drivers.sort_by(|a, b| counts[b].cmp(&counts[a]).then_with(|| a.cmp(b)));
        drivers
    }

    fn single_model_result(&self, pred: &Prediction) -> EnsemblePrediction {
        let half_width = 0.15 * (1.0 - pred.confidence);
        let lower = (pred.risk_score - half_width).max(0.0);
        let upper = (pred.risk_score + half_width).min(1.0);

        EnsemblePrediction {
            patient_id: pred.patient_id.clone(),
            adverse_event: pred.adverse_event,
            risk_score: pred.risk_score,
            confidence: pred.confidence,
            uncertainty_lower: lower,
            uncertainty_upper: upper,
            individual_predictions: vec![pred.clone()],
            disagreement: DisagreementReport::none(),
            calibration: CalibrationMetrics {
                mean_confidence: pred.confidence,
                confidence_spread: 0.0,
                calibration_adjustment: 1.0,
                effective_confidence: pred.confidence,
            },
            aggregation_method: AggregationMethod::SingleModel,
            reasoning_summary: pred.reasoning.clone(),
            combined_key_drivers: pred.key_drivers.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psp_common::AdverseEventType;
    use serde_json::json;

    fn pred(model_id: &str, risk_score: f64, confidence: f64) -> Prediction {
        Prediction::new(
            model_id,
            "PATIENT-1",
            AdverseEventType::Crs,
            risk_score,
            confidence,
            format!("{model_id} reasoning"),
            vec!["fever".to_string()],
            json!({}),
            100,
            50,
        )
    }

    #[test]
    fn empty_predictions_is_an_error() {
        let aggregator = EnsembleAggregator::new(&EnsembleConfig::default());
        let result = aggregator.aggregate(&[], None);
        assert!(result.is_err());
    }

    #[test]
    fn single_prediction_skips_disagreement_and_widens_interval() {
        let aggregator = EnsembleAggregator::new(&EnsembleConfig::default());
        let predictions = vec![pred("gpt-4", 0.6, 0.8)];
        let ensemble = aggregator.aggregate(&predictions, None).unwrap();

        assert_eq!(ensemble.aggregation_method, AggregationMethod::SingleModel);
        assert!(!ensemble.disagreement.is_disagreement);
        assert_eq!(ensemble.model_agreement(), 1.0);
        assert!(ensemble.uncertainty_lower < ensemble.risk_score);
        assert!(ensemble.uncertainty_upper > ensemble.risk_score);
    }

    #[test]
    fn large_divergence_falls_back_to_median() {
        let aggregator = EnsembleAggregator::new(&EnsembleConfig::default());
        let predictions = vec![
            pred("gpt-4", 0.1, 0.9),
            pred("claude", 0.9, 0.9),
            pred("llama", 0.5, 0.9),
        ];
        let ensemble = aggregator.aggregate(&predictions, None).unwrap();

        assert!(ensemble.disagreement.is_disagreement);
        assert_eq!(ensemble.aggregation_method, AggregationMethod::Median);
        assert!((ensemble.risk_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn agreeing_models_use_confidence_weighted_mean() {
        let aggregator = EnsembleAggregator::new(&EnsembleConfig::default());
        let predictions = vec![pred("gpt-4", 0.5, 0.9), pred("claude", 0.55, 0.7)];
        let ensemble = aggregator.aggregate(&predictions, None).unwrap();

        assert_eq!(
            ensemble.aggregation_method,
            AggregationMethod::ConfidenceWeighted
        );
        let expected = (0.5 * 0.9 + 0.55 * 0.7) / (0.9 + 0.7);
        assert!((ensemble.risk_score - expected).abs() < 1e-9);
    }

    #[test]
    fn key_drivers_merge_by_frequency_then_lexicographic() {
        let mut p1 = pred("gpt-4", 0.5, 0.9);
        p1.key_drivers = vec!["fever".to_string(), "hypotension".to_string()];
        let mut p2 = pred("claude", 0.5, 0.9);
        p2.key_drivers = vec!["fever".to_string(), "tachycardia".to_string()];

        let aggregator = EnsembleAggregator::new(&EnsembleConfig::default());
        let ensemble = aggregator.aggregate(&[p1, p2], None).unwrap();

        assert_eq!(
            ensemble.combined_key_drivers,
            vec!["fever", "hypotension", "tachycardia"]
        );
    }

    #[test]
    fn historical_calibration_adjusts_confidence_without_mutating_input() {
        let predictions = vec![pred("gpt-4", 0.5, 0.6), pred("claude", 0.5, 0.6)];
        let mut calibration = HashMap::new();
        calibration.insert("gpt-4".to_string(), 1.5);

        let aggregator = EnsembleAggregator::new(&EnsembleConfig::default())
            .with_historical_calibration(calibration);
        let calibrated = aggregator.apply_calibration(&predictions);

        assert!((calibrated[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(predictions[0].confidence, 0.6);
    }
}
