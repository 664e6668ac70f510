//! Secure API gateway: endpoint registry, PII scrubbing, rate limiting,
//! circuit breaking, and audit logging around foundation-model calls.

use crate::circuit_breaker::CircuitBreaker;
use crate::http_client::{HttpClient, HttpResponse};
use crate::pii;
use crate::rate_limiter::RateLimiter;
use chrono::{DateTime, Utc};
use psp_common::config::GatewayConfig;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Gateway-specific failure classes, so callers can branch on kind for the
/// audit taxonomy rather than matching on an error string.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("model '{0}' is not registered")]
    UnknownModel(String),
    #[error("circuit breaker open for model '{0}'")]
    CircuitOpen(String),
    #[error("rate limited for model '{0}'")]
    RateLimited(String),
    #[error("transport failure calling model '{0}': {1}")]
    TransportFailure(String, String),
}

impl From<GatewayError> for psp_common::Error {
    fn from(err: GatewayError) -> Self {
        psp_common::Error::Gateway(err.to_string())
    }
}

/// Configuration for a single model API endpoint.
#[derive(Debug, Clone)]
pub struct ModelEndpoint {
    pub model_id: String,
    pub url: String,
    pub api_key_env_var: String,
    pub headers: HashMap<String, String>,
    pub rate_limit_rpm: u32,
    pub rate_limit_tpm: u64,
}

impl ModelEndpoint {
    pub fn new(model_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            url: url.into(),
            api_key_env_var: String::new(),
            headers: HashMap::new(),
            rate_limit_rpm: 60,
            rate_limit_tpm: 100_000,
        }
    }
}

/// Audit log entry for a single gateway API call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewayAuditEntry {
    pub request_id: String,
    pub model_id: String,
    pub endpoint_url: String,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    pub status_code: u16,
    pub tokens_used: u64,
    pub pii_redactions: Vec<String>,
    pub rate_limited: bool,
    pub circuit_state: String,
    pub error: Option<String>,
    pub prompt_hash: String,
}

struct Registered {
    endpoint: ModelEndpoint,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
}

/// Secure gateway for communicating with foundation model APIs.
pub struct SecureApiGateway {
    config: GatewayConfig,
    http_client: Box<dyn HttpClient>,
    registry: Mutex<HashMap<String, Registered>>,
    audit_log: Mutex<Vec<GatewayAuditEntry>>,
    request_counter: AtomicU64,
}

impl SecureApiGateway {
    pub fn new(config: GatewayConfig, http_client: Box<dyn HttpClient>) -> Self {
        Self {
            config,
            http_client,
            registry: Mutex::new(HashMap::new()),
            audit_log: Mutex::new(Vec::new()),
            request_counter: AtomicU64::new(0),
        }
    }

    pub fn register_endpoint(&self, endpoint: ModelEndpoint) {
        let limiter = RateLimiter::new(endpoint.rate_limit_rpm, endpoint.rate_limit_tpm);
        let breaker = CircuitBreaker::new(
            self.config.circuit_failure_threshold,
            self.config.circuit_recovery_timeout_secs,
        );
        tracing::info!(model_id = %endpoint.model_id, url = %endpoint.url, "registered model endpoint");
        self.registry.lock().unwrap().insert(
            endpoint.model_id.clone(),
            Registered {
                endpoint,
                limiter,
                breaker,
            },
        );
    }

    fn next_request_id(&self) -> String {
        let n = self.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("REQ-{n:08}")
    }

    fn push_audit(&self, entry: GatewayAuditEntry) {
        self.audit_log.lock().unwrap().push(entry);
    }

    /// Full secure pipeline: lookup, circuit check, rate limit, PII scrub,
    /// transport, audit. Never panics; all failure classes are returned as
    /// a [`GatewayError`], each already audited before returning.
    pub async fn call_model(
        &self,
        model_id: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
        estimated_tokens: u64,
    ) -> Result<Value, GatewayError> {
        let request_id = self.next_request_id();

        // Endpoint/breaker/limiter handles are cloned out under the lock so the
        // mutex isn't held across the await points below.
        let (url, headers, circuit_state_at_start) = {
            let registry = self.registry.lock().unwrap();
            let Some(registered) = registry.get(model_id) else {
                return Err(GatewayError::UnknownModel(model_id.to_string()));
            };

            if !registered.breaker.is_available() {
                let state = registered.breaker.state().as_str().to_string();
                drop(registry);
                self.push_audit(GatewayAuditEntry {
                    request_id,
                    model_id: model_id.to_string(),
                    endpoint_url: String::new(),
                    timestamp: Utc::now(),
                    latency_ms: 0,
                    status_code: 0,
                    tokens_used: 0,
                    pii_redactions: Vec::new(),
                    rate_limited: false,
                    circuit_state: state,
                    error: Some("Circuit breaker is OPEN".to_string()),
                    prompt_hash: String::new(),
                });
                return Err(GatewayError::CircuitOpen(model_id.to_string()));
            }

            (
                registered.endpoint.url.clone(),
                registered.endpoint.headers.clone(),
                registered.breaker.state().as_str().to_string(),
            )
        };

        let acquired = {
            let registry = self.registry.lock().unwrap();
            registry.get(model_id).unwrap().limiter.acquire(estimated_tokens)
        }
        .await;

        if !acquired {
            self.push_audit(GatewayAuditEntry {
                request_id,
                model_id: model_id.to_string(),
                endpoint_url: url,
                timestamp: Utc::now(),
                latency_ms: 0,
                status_code: 0,
                tokens_used: 0,
                pii_redactions: Vec::new(),
                rate_limited: true,
                circuit_state: circuit_state_at_start,
                error: Some("Rate limited".to_string()),
                prompt_hash: String::new(),
            });
            return Err(GatewayError::RateLimited(model_id.to_string()));
        }

        let (cleaned_prompt, redactions) = pii::strip(prompt);
        if !redactions.is_empty() {
            tracing::info!(request_id = %request_id, ?redactions, "stripped PII from prompt");
        }

        let prompt_hash = {
            let mut hasher = Sha256::new();
            hasher.update(cleaned_prompt.as_bytes());
            let digest = hasher.finalize();
            hex_prefix(&digest, 16)
        };

        let payload = Self::build_payload(model_id, &cleaned_prompt, max_tokens, temperature);
        let timeout = Duration::from_secs(self.config.request_timeout_secs);

        let start = std::time::Instant::now();
        let call_result = self.http_client.post(&url, &payload, &headers, timeout).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (status_code, tokens_used, error_msg, body) = match call_result {
            Ok(HttpResponse { status_code, body }) => {
                let tokens = Self::extract_token_usage(&body);
                let registry = self.registry.lock().unwrap();
                registry.get(model_id).unwrap().breaker.record_success();
                (status_code, tokens, None, Some(body))
            }
            Err(err) => {
                let registry = self.registry.lock().unwrap();
                registry.get(model_id).unwrap().breaker.record_failure();
                tracing::error!(model_id, error = %err, "model call failed");
                (0, 0, Some(err), None)
            }
        };

        let final_circuit_state = {
            let registry = self.registry.lock().unwrap();
            registry.get(model_id).unwrap().breaker.state().as_str().to_string()
        };

        self.push_audit(GatewayAuditEntry {
            request_id,
            model_id: model_id.to_string(),
            endpoint_url: url,
            timestamp: Utc::now(),
            latency_ms,
            status_code,
            tokens_used,
            pii_redactions: redactions,
            rate_limited: false,
            circuit_state: final_circuit_state,
            error: error_msg.clone(),
            prompt_hash,
        });

        match (body, error_msg) {
            (Some(body), None) => Ok(body),
            (_, Some(err)) => Err(GatewayError::TransportFailure(model_id.to_string(), err)),
            (None, None) => unreachable!("transport must return either a body or an error"),
        }
    }

    fn build_payload(model_id: &str, prompt: &str, max_tokens: u32, temperature: f64) -> Value {
        json!({
            "model": model_id,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a pharmaceutical safety AI. Analyze patient data and predict adverse event risk. Return structured JSON."
                },
                {"role": "user", "content": prompt}
            ],
            "max_tokens": max_tokens,
            "temperature": temperature,
            "response_format": {"type": "json_object"}
        })
    }

    fn extract_token_usage(response: &Value) -> u64 {
        response
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    pub fn audit_log(&self) -> Vec<GatewayAuditEntry> {
        self.audit_log.lock().unwrap().clone()
    }

    pub fn get_audit_entries(
        &self,
        model_id: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Vec<GatewayAuditEntry> {
        self.audit_log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| model_id.map(|m| e.model_id == m).unwrap_or(true))
            .filter(|e| since.map(|s| e.timestamp >= s).unwrap_or(true))
            .cloned()
            .collect()
    }
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<String>()[..len.min(bytes.len() * 2)]
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    struct FakeHttpClient {
        fail: AtomicBool,
    }

    #[async_trait]
    impl HttpClient for FakeHttpClient {
        async fn post(
            &self,
            _url: &str,
            _json: &Value,
            _headers: &HashMap<String, String>,
            _timeout: Duration,
        ) -> Result<HttpResponse, String> {
            if self.fail.load(Ordering::SeqCst) {
                Err("boom".to_string())
            } else {
                Ok(HttpResponse {
                    status_code: 200,
                    body: json!({"risk_score": 0.5, "usage": {"total_tokens": 42}}),
                })
            }
        }
    }

    fn gateway(fail: bool) -> SecureApiGateway {
        let gw = SecureApiGateway::new(
            GatewayConfig::default(),
            Box::new(FakeHttpClient {
                fail: AtomicBool::new(fail),
            }),
        );
        gw.register_endpoint(ModelEndpoint::new("test-model", "https://example.test/v1"));
        gw
    }

    #[tokio::test]
    async fn unknown_model_fails_fast() {
        let gw = gateway(false);
        let err = gw.call_model("nope", "hi", 100, 0.1, 100).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownModel(_)));
    }

    #[tokio::test]
    async fn successful_call_records_audit_entry_and_tokens() {
        let gw = gateway(false);
        let body = gw.call_model("test-model", "patient is stable", 100, 0.1, 100).await.unwrap();
        assert_eq!(body["risk_score"], 0.5);
        let log = gw.audit_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].tokens_used, 42);
        assert_eq!(log[0].circuit_state, "closed");
    }

    #[tokio::test]
    async fn transport_failure_opens_circuit_after_threshold() {
        let gw = gateway(true);
        for _ in 0..5 {
            let _ = gw.call_model("test-model", "hi", 100, 0.1, 100).await;
        }
        let err = gw.call_model("test-model", "hi", 100, 0.1, 100).await.unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen(_)));
    }

    #[tokio::test]
    async fn pii_is_stripped_before_hashing() {
        let gw = gateway(false);
        let _ = gw
            .call_model("test-model", "MRN: 123456 patient DOB 01/02/1970", 100, 0.1, 100)
            .await
            .unwrap();
        let log = gw.audit_log();
        assert_eq!(log[0].pii_redactions, vec!["mrn", "dob"]);
        assert!(!log[0].prompt_hash.is_empty());
    }
}
