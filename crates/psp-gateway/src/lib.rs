//! Secure API gateway for foundation model communication.
//!
//! Provides PII stripping, per-model rate limiting, circuit breaking, and
//! immutable audit logging around calls to external model APIs. Transport is
//! injected via [`HttpClient`] so the pipeline can be exercised without a
//! live network endpoint.

mod circuit_breaker;
mod gateway;
mod http_client;
mod pii;
mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use gateway::{GatewayAuditEntry, GatewayError, ModelEndpoint, SecureApiGateway};
pub use http_client::{HttpClient, HttpResponse, ReqwestHttpClient};
pub use rate_limiter::RateLimiter;
