//! Converts heterogeneous model responses into [`Prediction`]s.
//!
//! Three response shapes are handled, tried in order: structured JSON
//! (preferred, parsed directly or unwrapped from an OpenAI/Anthropic-style
//! envelope), JSON embedded in free text (code fence or bare object), and
//! free text with heuristic score/confidence extraction. Normalization
//! never fails: a response that cannot be parsed at all degrades to a
//! zero-risk, zero-confidence prediction rather than propagating an error.

use psp_common::{AdverseEventType, Prediction};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

/// Raw response as handed back by the Gateway, before normalization.
#[derive(Debug, Clone)]
pub enum RawResponse {
    Json(Value),
    Text(String),
}

fn json_block_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap())
}

fn bare_json_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{[^{}]*\}").unwrap())
}

fn score_patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        vec![
            Regex::new(r"(?i)risk[_ ]?score[:\s]*([0-9]*\.?[0-9]+)").unwrap(),
            Regex::new(r"(?i)score[:\s]*([0-9]*\.?[0-9]+)").unwrap(),
            Regex::new(r"(?i)risk[:\s]*([0-9]*\.?[0-9]+)").unwrap(),
            Regex::new(r"(?i)probability[:\s]*([0-9]*\.?[0-9]+)").unwrap(),
        ]
    })
}

fn confidence_patterns() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        vec![
            Regex::new(r"(?i)confidence[:\s]*([0-9]*\.?[0-9]+)").unwrap(),
            Regex::new(r"(?i)certainty[:\s]*([0-9]*\.?[0-9]+)").unwrap(),
        ]
    })
}

/// Normalizes raw model output into the canonical [`Prediction`] format.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseNormalizer;

impl ResponseNormalizer {
    pub fn new() -> Self {
        Self
    }

    #[allow(clippy::too_many_arguments)]
    pub fn normalize(
        &self,
        raw_response: RawResponse,
        model_id: &str,
        patient_id: &str,
        adverse_event: AdverseEventType,
        latency_ms: u64,
        tokens_used: u64,
    ) -> Prediction {
        match raw_response {
            RawResponse::Text(text) => {
                if let Some(parsed) = Self::try_parse_json(&text) {
                    return Self::from_structured(
                        &parsed,
                        Value::String(text),
                        model_id,
                        patient_id,
                        adverse_event,
                        latency_ms,
                        tokens_used,
                    );
                }
                Self::from_free_text(
                    &text,
                    None,
                    model_id,
                    patient_id,
                    adverse_event,
                    latency_ms,
                    tokens_used,
                )
            }
            RawResponse::Json(value) => {
                if let Value::Object(_) = &value {
                    if let Some(text_content) = Self::extract_text_from_api_response(&value) {
                        if let Some(inner) = Self::try_parse_json(&text_content) {
                            return Self::from_structured(
                                &inner,
                                value,
                                model_id,
                                patient_id,
                                adverse_event,
                                latency_ms,
                                tokens_used,
                            );
                        }
                        return Self::from_free_text(
                            &text_content,
                            Some(value),
                            model_id,
                            patient_id,
                            adverse_event,
                            latency_ms,
                            tokens_used,
                        );
                    }
                    return Self::from_structured(
                        &value.clone(),
                        value,
                        model_id,
                        patient_id,
                        adverse_event,
                        latency_ms,
                        tokens_used,
                    );
                }

                tracing::warn!(
                    model_id,
                    "unexpected JSON response shape; returning zero prediction"
                );
                Prediction::new(
                    model_id,
                    patient_id,
                    adverse_event,
                    0.0,
                    0.0,
                    "Failed to parse model response",
                    Vec::new(),
                    serde_json::json!({"error": "unparseable"}),
                    latency_ms,
                    tokens_used,
                )
            }
        }
    }

    fn from_structured(
        data: &Value,
        raw: Value,
        model_id: &str,
        patient_id: &str,
        adverse_event: AdverseEventType,
        latency_ms: u64,
        tokens_used: u64,
    ) -> Prediction {
        let risk_score = Self::extract_float(
            data,
            &["risk_score", "riskScore", "score", "risk", "probability"],
            0.0,
        );
        let confidence = Self::extract_float(data, &["confidence", "certainty", "conf"], 0.5);

        let reasoning = data
            .get("reasoning")
            .or_else(|| data.get("explanation"))
            .or_else(|| data.get("rationale"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let key_drivers = Self::extract_key_drivers(data);

        let resolved_ae = data
            .get("adverse_event")
            .and_then(Value::as_str)
            .and_then(Self::parse_adverse_event)
            .unwrap_or(adverse_event);

        Prediction::new(
            model_id,
            patient_id,
            resolved_ae,
            risk_score,
            confidence,
            reasoning,
            key_drivers,
            raw,
            latency_ms,
            tokens_used,
        )
    }

    fn from_free_text(
        text: &str,
        raw_dict: Option<Value>,
        model_id: &str,
        patient_id: &str,
        adverse_event: AdverseEventType,
        latency_ms: u64,
        tokens_used: u64,
    ) -> Prediction {
        let mut risk_score = Self::extract_score_from_text(text, score_patterns(), 0.0);
        let mut confidence = Self::extract_score_from_text(text, confidence_patterns(), 0.3);

        if risk_score > 1.0 {
            risk_score /= 100.0;
        }
        if confidence > 1.0 {
            confidence /= 100.0;
        }

        let reasoning = if text.chars().count() > 2000 {
            text.chars().take(2000).collect()
        } else {
            text.to_string()
        };

        tracing::info!(model_id, risk_score, confidence, "free-text extraction");

        Prediction::new(
            model_id,
            patient_id,
            adverse_event,
            risk_score,
            confidence,
            reasoning,
            Vec::new(),
            raw_dict.unwrap_or_else(|| serde_json::json!({"text": text})),
            latency_ms,
            tokens_used,
        )
    }

    fn try_parse_json(text: &str) -> Option<Value> {
        let trimmed = text.trim();
        if trimmed.starts_with('{') {
            if let Ok(value) = serde_json::from_str(trimmed) {
                return Some(value);
            }
        }

        if let Some(caps) = json_block_pattern().captures(text) {
            if let Ok(value) = serde_json::from_str(&caps[1]) {
                return Some(value);
            }
        }

        if let Some(m) = bare_json_pattern().find(text) {
            if let Ok(value) = serde_json::from_str(m.as_str()) {
                return Some(value);
            }
        }

        None
    }

    fn extract_text_from_api_response(response: &Value) -> Option<String> {
        if let Some(choices) = response.get("choices").and_then(Value::as_array) {
            if let Some(first) = choices.first() {
                if let Some(content) = first.get("message").and_then(|m| m.get("content")) {
                    if let Some(s) = content.as_str() {
                        return Some(s.to_string());
                    }
                }
            }
        }

        if let Some(content) = response.get("content").and_then(Value::as_array) {
            if let Some(first) = content.first() {
                if let Some(text) = first.get("text").and_then(Value::as_str) {
                    return Some(text.to_string());
                }
            }
        }

        for key in ["text", "output", "response", "result"] {
            if let Some(s) = response.get(key).and_then(Value::as_str) {
                return Some(s.to_string());
            }
        }

        None
    }

    fn extract_float(data: &Value, keys: &[&str], default: f64) -> f64 {
        for key in keys {
            if let Some(value) = data.get(key) {
                if let Some(f) = value.as_f64() {
                    return f;
                }
                if let Some(s) = value.as_str() {
                    if let Ok(f) = s.parse::<f64>() {
                        return f;
                    }
                }
            }
        }
        default
    }

    fn extract_key_drivers(data: &Value) -> Vec<String> {
        let raw = data
            .get("key_drivers")
            .or_else(|| data.get("drivers"))
            .or_else(|| data.get("factors"));

        match raw {
            Some(Value::Array(arr)) => arr
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => s.split(',').map(|d| d.trim().to_string()).collect(),
            _ => Vec::new(),
        }
    }

    fn extract_score_from_text(text: &str, patterns: &[Regex], default: f64) -> f64 {
        for pattern in patterns {
            if let Some(caps) = pattern.captures(text) {
                if let Ok(f) = caps[1].parse::<f64>() {
                    return f;
                }
            }
        }
        default
    }

    fn parse_adverse_event(s: &str) -> Option<AdverseEventType> {
        match s {
            "CRS" => Some(AdverseEventType::Crs),
            "ICANS" => Some(AdverseEventType::Icans),
            "HLH" => Some(AdverseEventType::Hlh),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_json_parses_directly() {
        let normalizer = ResponseNormalizer::new();
        let raw = RawResponse::Text(
            r#"{"risk_score": 0.7, "confidence": 0.9, "reasoning": "elevated IL-6"}"#.to_string(),
        );
        let p = normalizer.normalize(raw, "gpt-4", "PAT-1", AdverseEventType::Crs, 100, 50);
        assert!((p.risk_score - 0.7).abs() < 1e-9);
        assert!((p.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn json_in_code_fence_is_extracted() {
        let normalizer = ResponseNormalizer::new();
        let raw = RawResponse::Text(
            "Here is my analysis:\n```json\n{\"score\": 0.4, \"confidence\": 0.6}\n```".to_string(),
        );
        let p = normalizer.normalize(raw, "claude", "PAT-1", AdverseEventType::Icans, 0, 0);
        assert!((p.risk_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn free_text_falls_back_to_heuristic_extraction() {
        let normalizer = ResponseNormalizer::new();
        let raw = RawResponse::Text(
            "Based on the labs, risk score: 75 with confidence: 85 that this is CRS.".to_string(),
        );
        let p = normalizer.normalize(raw, "local-llm", "PAT-1", AdverseEventType::Crs, 0, 0);
        assert!((p.risk_score - 0.75).abs() < 1e-9);
        assert!((p.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn unparseable_response_degrades_to_zero_prediction() {
        let normalizer = ResponseNormalizer::new();
        let raw = RawResponse::Json(Value::Null);
        let p = normalizer.normalize(raw, "m", "PAT-1", AdverseEventType::Hlh, 0, 0);
        assert_eq!(p.risk_score, 0.0);
        assert_eq!(p.confidence, 0.0);
    }
}
