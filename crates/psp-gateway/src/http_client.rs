//! Injectable HTTP transport so the Gateway's pipeline can be exercised
//! without a live network endpoint.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Response from a model API call.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: Value,
}

/// Minimal async HTTP transport the Gateway depends on.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn post(
        &self,
        url: &str,
        json: &Value,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<HttpResponse, String>;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn post(
        &self,
        url: &str,
        json: &Value,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<HttpResponse, String> {
        let mut request = self.client.post(url).json(json).timeout(timeout);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;
        let status_code = response.status().as_u16();
        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse { status_code, body })
    }
}
