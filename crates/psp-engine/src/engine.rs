//! `PSPEngine`: wires Router, Gateway, Normalizer, Validator, Ensemble,
//! Scorer, Hypothesis, and Alerts into the single `process_patient` pipeline.

use crate::types::{PredictionResult, ProcessOptions};
use futures::future::join_all;
use psp_alerts::AlertEngine;
use psp_audit::{AuditEvent, AuditEventType, AuditTrail, DataMap};
use psp_common::config::Config;
use psp_common::{AdverseEventType, PatientSnapshot, Prediction, Result};
use psp_ensemble::EnsembleAggregator;
use psp_gateway::SecureApiGateway;
use psp_graph::KnowledgeGraph;
use psp_hypothesis::HypothesisGenerator;
use psp_normalizer::{RawResponse, ResponseNormalizer};
use psp_router::{ModelCapability, PromptRouter, SafetyQuery};
use psp_scorer::{ModelScoreInput, PatientRiskScorer};
use psp_validator::MechanisticValidator;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// Top-level coordinator for the patient safety prediction pipeline.
///
/// Owns the knowledge graph (built once at startup, read-only thereafter)
/// and every stateful sub-component. All pipeline stages are accessed
/// through `&self`, so one engine can process many patients concurrently.
pub struct PSPEngine {
    graph: KnowledgeGraph,
    gateway: Option<Arc<SecureApiGateway>>,
    router: PromptRouter,
    normalizer: ResponseNormalizer,
    ensemble: EnsembleAggregator,
    alert_engine: AlertEngine,
    audit: AuditTrail,
    config: Config,
}

impl PSPEngine {
    /// Build the engine from an already-populated knowledge graph and a
    /// full configuration tree. Pass a gateway to enable model calls; a
    /// `None` gateway falls back to biomarker-only scoring for every AE.
    pub fn new(graph: KnowledgeGraph, config: Config, gateway: Option<Arc<SecureApiGateway>>) -> Self {
        Self {
            router: PromptRouter::new(config.router.clone()),
            normalizer: ResponseNormalizer::new(),
            ensemble: EnsembleAggregator::new(&config.ensemble),
            alert_engine: AlertEngine::new(&config.alerts),
            audit: AuditTrail::new(&config.audit),
            graph,
            gateway,
            config,
        }
    }

    /// Register a foundation model with the router.
    pub fn register_model(&self, capability: ModelCapability) {
        self.router.register_model(capability);
    }

    pub fn knowledge_graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn alert_engine(&self) -> &AlertEngine {
        &self.alert_engine
    }

    /// Run the full prediction pipeline for one patient across the given
    /// adverse events. Errors within a single AE's pipeline are caught,
    /// audited, and do not abort the remaining AEs.
    pub async fn process_patient(
        &self,
        patient: &PatientSnapshot,
        adverse_events: &[AdverseEventType],
        options: ProcessOptions,
    ) -> PredictionResult {
        let pipeline_start = Instant::now();
        let session_id = self.audit.start_session(&patient.patient_id);

        let mut input_data = DataMap::new();
        input_data.insert("biomarker_count".to_string(), json!(patient.biomarkers.len()));
        input_data.insert(
            "hours_since_infusion".to_string(),
            json!(patient.hours_since_infusion),
        );
        input_data.insert(
            "adverse_events".to_string(),
            json!(adverse_events.iter().map(|ae| ae.as_str()).collect::<Vec<_>>()),
        );
        self.audit.record(
            AuditEventType::PredictionRequest,
            AuditEvent::new()
                .patient_id(&patient.patient_id)
                .session_id(session_id.clone())
                .actor("PSPEngine")
                .input_data(input_data),
        );

        let mut result = PredictionResult::new(patient.patient_id.clone(), adverse_events.to_vec());
        result.session_id = session_id.clone();

        for &ae in adverse_events {
            if let Err(err) = self
                .process_adverse_event(patient, ae, &session_id, options, &mut result)
                .await
            {
                tracing::error!(
                    patient_id = %patient.patient_id,
                    adverse_event = ae.as_str(),
                    error = %err,
                    "error processing adverse event"
                );
                let mut output_data = DataMap::new();
                output_data.insert("adverse_event".to_string(), json!(ae.as_str()));
                output_data.insert("error".to_string(), json!("pipeline_failure"));
                self.audit.record(
                    AuditEventType::Error,
                    AuditEvent::new()
                        .patient_id(&patient.patient_id)
                        .session_id(session_id.clone())
                        .actor("PSPEngine")
                        .output_data(output_data),
                );
            }
        }

        result.pipeline_duration_ms = pipeline_start.elapsed().as_millis() as u64;
        tracing::info!(
            patient_id = %patient.patient_id,
            adverse_event_count = adverse_events.len(),
            duration_ms = result.pipeline_duration_ms,
            "pipeline complete"
        );

        result
    }

    async fn process_adverse_event(
        &self,
        patient: &PatientSnapshot,
        adverse_event: AdverseEventType,
        session_id: &str,
        options: ProcessOptions,
        result: &mut PredictionResult,
    ) -> Result<()> {
        let ae_start = Instant::now();

        let mut context = serde_json::Map::new();
        for (k, v) in &patient.biomarkers {
            context.insert(k.clone(), json!(v));
        }
        let mut query = SafetyQuery::new(&patient.patient_id, format!("Predict {} risk", adverse_event.as_str()));
        query.biomarker_count = patient.biomarkers.len() as u32;
        query.hours_since_infusion = patient.hours_since_infusion;
        query.requires_mechanistic_reasoning = options.generate_hypotheses;
        query.adverse_events = vec![adverse_event.as_str().to_string()];
        context.insert("disease_burden".to_string(), json!(patient.disease_burden));
        context.insert("prior_therapies".to_string(), json!(patient.prior_therapies));
        context.insert("car_t_product".to_string(), json!(patient.product));
        query.context = context.into_iter().collect();

        let routing_decision = self.router.route(&query);
        if routing_decision.is_none() {
            tracing::warn!("no models available for routing; using biomarker-only scoring");
        }

        let individual_predictions = match (&routing_decision, &self.gateway) {
            (Some(decision), Some(gateway)) => {
                self.call_models(&query, decision, Arc::clone(gateway), &patient.patient_id, session_id)
                    .await
            }
            _ => Vec::new(),
        };

        let mut validation_reports = Vec::new();
        if options.validate_predictions && !individual_predictions.is_empty() {
            let validator = MechanisticValidator::new(&self.graph, self.config.validator.strict_mode);
            for pred in &individual_predictions {
                let report = validator.validate(&pred.model_id, patient, adverse_event, pred.risk_score);

                let mut input_data = DataMap::new();
                input_data.insert("model_id".to_string(), json!(pred.model_id));
                input_data.insert("risk_score".to_string(), json!(pred.risk_score));
                let mut output_data = DataMap::new();
                output_data.insert("result".to_string(), json!(format!("{:?}", report.overall_result)));
                output_data.insert("confidence".to_string(), json!(report.overall_confidence));
                output_data.insert("warnings".to_string(), json!(report.warnings));
                self.audit.record(
                    AuditEventType::MechanisticValidation,
                    AuditEvent::new()
                        .patient_id(&patient.patient_id)
                        .session_id(session_id)
                        .actor("MechanisticValidator")
                        .input_data(input_data)
                        .output_data(output_data),
                );

                validation_reports.push(report);
            }
        }

        result
            .individual_predictions
            .insert(adverse_event, individual_predictions.clone());
        result.validation_reports.insert(adverse_event, validation_reports);

        if !individual_predictions.is_empty() {
            let ensemble_pred = self.ensemble.aggregate(&individual_predictions, None)?;

            let mut output_data = DataMap::new();
            output_data.insert("risk_score".to_string(), json!(ensemble_pred.risk_score));
            output_data.insert("confidence".to_string(), json!(ensemble_pred.confidence));
            output_data.insert(
                "method".to_string(),
                json!(ensemble_pred.aggregation_method.as_str()),
            );
            output_data.insert(
                "model_agreement".to_string(),
                json!(ensemble_pred.model_agreement()),
            );
            self.audit.record(
                AuditEventType::EnsembleAggregation,
                AuditEvent::new()
                    .patient_id(&patient.patient_id)
                    .session_id(session_id)
                    .actor("EnsembleAggregator")
                    .output_data(output_data),
            );

            result.ensemble_predictions.insert(adverse_event, ensemble_pred);
        }

        let model_scores: Vec<ModelScoreInput> = individual_predictions
            .iter()
            .map(|p| ModelScoreInput {
                model_name: p.model_id.clone(),
                score: p.risk_score,
                confidence: p.confidence,
            })
            .collect();

        let scorer = PatientRiskScorer::new(&self.graph, &self.config.scorer);
        let safety_index = scorer.compute(patient, adverse_event, &model_scores);

        let mut output_data = DataMap::new();
        output_data.insert("composite_score".to_string(), json!(safety_index.composite_score));
        output_data.insert(
            "risk_category".to_string(),
            json!(format!("{:?}", safety_index.risk_category)),
        );
        output_data.insert("trend".to_string(), json!(safety_index.trend));
        let domain_scores: DataMap = safety_index
            .domain_scores
            .iter()
            .map(|ds| (ds.domain.clone(), json!(ds.score)))
            .collect();
        output_data.insert("domain_scores".to_string(), json!(domain_scores));
        self.audit.record(
            AuditEventType::SafetyIndexComputation,
            AuditEvent::new()
                .patient_id(&patient.patient_id)
                .session_id(session_id)
                .actor("PatientRiskScorer")
                .output_data(output_data)
                .duration_ms(ae_start.elapsed().as_millis() as u64),
        );

        if options.generate_hypotheses {
            let hypothesis_gen = HypothesisGenerator::new(
                &self.graph,
                self.config.engine.max_hypotheses,
                self.config.engine.min_hypothesis_confidence,
            );
            let hypotheses = hypothesis_gen.generate(
                &patient.patient_id,
                adverse_event,
                &patient.biomarkers,
                &individual_predictions,
            );

            let mut output_data = DataMap::new();
            output_data.insert("count".to_string(), json!(hypotheses.len()));
            output_data.insert(
                "titles".to_string(),
                json!(hypotheses.iter().map(|h| h.title.clone()).collect::<Vec<_>>()),
            );
            self.audit.record(
                AuditEventType::HypothesisGeneration,
                AuditEvent::new()
                    .patient_id(&patient.patient_id)
                    .session_id(session_id)
                    .actor("HypothesisGenerator")
                    .output_data(output_data),
            );

            result.hypotheses.insert(adverse_event, hypotheses);
        }

        let alerts = self.alert_engine.evaluate(&safety_index);
        for alert in &alerts {
            let mut output_data = DataMap::new();
            output_data.insert("alert_id".to_string(), json!(alert.alert_id));
            output_data.insert("severity".to_string(), json!(alert.severity.as_str()));
            output_data.insert("type".to_string(), json!(alert.alert_type.as_str()));
            output_data.insert("title".to_string(), json!(alert.title));
            self.audit.record(
                AuditEventType::AlertGenerated,
                AuditEvent::new()
                    .patient_id(&patient.patient_id)
                    .session_id(session_id)
                    .actor("AlertEngine")
                    .output_data(output_data),
            );
        }
        result.alerts.extend(alerts);

        result.safety_indices.insert(adverse_event, safety_index);

        Ok(())
    }

    /// Call every model in a routing decision concurrently and normalize
    /// each response. A single model's failure is logged and audited but
    /// does not prevent the other models in the decision from completing.
    async fn call_models(
        &self,
        query: &SafetyQuery,
        decision: &psp_router::RoutingDecision,
        gateway: Arc<SecureApiGateway>,
        patient_id: &str,
        session_id: &str,
    ) -> Vec<Prediction> {
        let calls = decision.all_models().into_iter().cloned().map(|model_cap| {
            let gateway = Arc::clone(&gateway);
            let query = query.clone();
            let patient_id = patient_id.to_string();
            let session_id = session_id.to_string();
            let rationale = decision.rationale.clone();
            async move {
                let prompt = self.router.format_prompt(&query, &rationale);

                let mut input_data = DataMap::new();
                input_data.insert("prompt_length".to_string(), json!(prompt.len()));
                let mut parameters = DataMap::new();
                parameters.insert("model_id".to_string(), json!(model_cap.model_id));
                parameters.insert("provider".to_string(), json!(model_cap.provider));
                self.audit.record(
                    AuditEventType::ModelCall,
                    AuditEvent::new()
                        .patient_id(patient_id.clone())
                        .session_id(session_id.clone())
                        .actor(model_cap.model_id.clone())
                        .input_data(input_data)
                        .parameters(parameters),
                );

                let model_start = Instant::now();
                let estimated_tokens = (prompt.len() / 4).max(1) as u64;
                let call_result = gateway
                    .call_model(&model_cap.model_id, &prompt, model_cap.max_tokens, 0.2, estimated_tokens)
                    .await;
                let latency_ms = model_start.elapsed().as_millis() as u64;

                match call_result {
                    Ok(raw) => {
                        let ae = query
                            .adverse_events
                            .first()
                            .and_then(|s| match s.as_str() {
                                "CRS" => Some(AdverseEventType::Crs),
                                "ICANS" => Some(AdverseEventType::Icans),
                                "HLH" => Some(AdverseEventType::Hlh),
                                _ => None,
                            })
                            .unwrap_or(AdverseEventType::Crs);

                        let prediction = self.normalizer.normalize(
                            RawResponse::Json(raw),
                            &model_cap.model_id,
                            &patient_id,
                            ae,
                            latency_ms,
                            0,
                        );

                        let mut output_data = DataMap::new();
                        output_data.insert("risk_score".to_string(), json!(prediction.risk_score));
                        output_data.insert("confidence".to_string(), json!(prediction.confidence));
                        self.audit.record(
                            AuditEventType::ModelResponse,
                            AuditEvent::new()
                                .patient_id(patient_id.clone())
                                .session_id(session_id.clone())
                                .actor(model_cap.model_id.clone())
                                .output_data(output_data)
                                .duration_ms(latency_ms),
                        );

                        Some(prediction)
                    }
                    Err(err) => {
                        tracing::error!(model_id = %model_cap.model_id, error = %err, "model call failed");
                        let mut output_data = DataMap::new();
                        output_data.insert("error".to_string(), json!(err.to_string()));
                        self.audit.record(
                            AuditEventType::Error,
                            AuditEvent::new()
                                .patient_id(patient_id.clone())
                                .session_id(session_id.clone())
                                .actor(model_cap.model_id.clone())
                                .output_data(output_data),
                        );
                        None
                    }
                }
            }
        });

        join_all(calls).await.into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use psp_common::config::GatewayConfig;
    use psp_gateway::{HttpClient, HttpResponse, ModelEndpoint};
    use psp_graph::{EdgeType, GraphEdge, GraphNode, NodeType};
    use psp_router::{ClinicalDomain, ModelCapability, QueryComplexity};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    fn graph_with_crs_pathway() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new();
        graph.add_node(GraphNode::new("CYTOKINE:IL6", NodeType::Cytokine, "IL-6"));
        graph.add_node(GraphNode::new("AE:CRS", NodeType::AdverseEvent, "CRS"));
        graph
            .add_edge(GraphEdge::new("CYTOKINE:IL6", "AE:CRS", EdgeType::Triggers, 0.9))
            .unwrap();
        graph
    }

    fn patient() -> PatientSnapshot {
        let mut biomarkers = HashMap::new();
        biomarkers.insert("CYTOKINE:IL6".to_string(), 120.0);
        PatientSnapshot {
            patient_id: "PAT-1".to_string(),
            hours_since_infusion: 48.0,
            biomarkers,
            disease_burden: 0.4,
            prior_therapies: 2,
            age_years: 55,
            ..Default::default()
        }
    }

    struct FakeHttpClient {
        fail: AtomicBool,
    }

    #[async_trait]
    impl HttpClient for FakeHttpClient {
        async fn post(
            &self,
            _url: &str,
            _json: &serde_json::Value,
            _headers: &HashMap<String, String>,
            _timeout: Duration,
        ) -> std::result::Result<HttpResponse, String> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                Err("transport down".to_string())
            } else {
                Ok(HttpResponse {
                    status_code: 200,
                    body: json!({
                        "risk_score": 0.72,
                        "confidence": 0.8,
                        "reasoning": "elevated IL-6 consistent with CRS",
                        "key_drivers": ["IL6"],
                    }),
                })
            }
        }
    }

    fn engine_with_gateway(fail: bool) -> PSPEngine {
        let gw = SecureApiGateway::new(
            GatewayConfig::default(),
            Box::new(FakeHttpClient {
                fail: AtomicBool::new(fail),
            }),
        );
        gw.register_endpoint(ModelEndpoint::new("test-model", "https://models.test/v1"));

        let engine = PSPEngine::new(graph_with_crs_pathway(), Config::default(), Some(Arc::new(gw)));
        engine.register_model(
            ModelCapability::new("test-model", "test-provider", QueryComplexity::Expert)
                .with_domains([ClinicalDomain::CytokineKinetics, ClinicalDomain::GeneralSafety]),
        );
        engine
    }

    #[tokio::test]
    async fn full_pipeline_produces_safety_index_and_audit_trail() {
        let engine = engine_with_gateway(false);
        let result = engine
            .process_patient(&patient(), &[AdverseEventType::Crs], ProcessOptions::default())
            .await;

        assert!(result.safety_indices.contains_key(&AdverseEventType::Crs));
        assert!(result.ensemble_predictions.contains_key(&AdverseEventType::Crs));
        assert!(!result.individual_predictions[&AdverseEventType::Crs].is_empty());
        assert!(result.validation_reports.contains_key(&AdverseEventType::Crs));
        assert!(!result.session_id.is_empty());
        assert!(engine.audit_trail().record_count() > 0);
    }

    #[tokio::test]
    async fn no_gateway_falls_back_to_biomarker_only_scoring() {
        let engine = PSPEngine::new(graph_with_crs_pathway(), Config::default(), None);
        let result = engine
            .process_patient(&patient(), &[AdverseEventType::Crs], ProcessOptions::default())
            .await;

        assert!(result.individual_predictions[&AdverseEventType::Crs].is_empty());
        assert!(!result.ensemble_predictions.contains_key(&AdverseEventType::Crs));
        let index = &result.safety_indices[&AdverseEventType::Crs];
        assert!(index.composite_score >= 0.0);
    }

    #[tokio::test]
    async fn every_requested_adverse_event_gets_an_independent_safety_index() {
        let engine = PSPEngine::new(graph_with_crs_pathway(), Config::default(), None);
        let aes = [AdverseEventType::Crs, AdverseEventType::Icans, AdverseEventType::Hlh];
        let result = engine.process_patient(&patient(), &aes, ProcessOptions::default()).await;

        for ae in aes {
            assert!(result.safety_indices.contains_key(&ae), "missing safety index for {ae:?}");
        }
    }

    #[tokio::test]
    async fn model_transport_failure_is_audited_and_still_yields_a_biomarker_based_index() {
        let engine = engine_with_gateway(true);
        let result = engine
            .process_patient(&patient(), &[AdverseEventType::Crs], ProcessOptions::default())
            .await;

        assert!(result.individual_predictions[&AdverseEventType::Crs].is_empty());
        assert!(result.safety_indices.contains_key(&AdverseEventType::Crs));
    }
}
