//! Component health reporting, shared by every pipeline component's
//! `health_check` seam.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health levels for components.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

/// Component health information, returned by each component's `health_check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthLevel,
    pub message: String,
    pub last_check: DateTime<Utc>,
    pub metrics: HashMap<String, f64>,
}

impl ComponentHealth {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            status: HealthLevel::Healthy,
            message: message.into(),
            last_check: Utc::now(),
            metrics: HashMap::new(),
        }
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self {
            status: HealthLevel::Critical,
            message: message.into(),
            last_check: Utc::now(),
            metrics: HashMap::new(),
        }
    }
}

/// Aggregate health across every component the Engine owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub overall_health: HealthLevel,
    pub components: HashMap<String, ComponentHealth>,
    pub last_check: DateTime<Utc>,
}

impl HealthStatus {
    pub fn from_components(components: HashMap<String, ComponentHealth>) -> Self {
        let overall_health = if components.is_empty() {
            HealthLevel::Unknown
        } else if components
            .values()
            .any(|c| c.status == HealthLevel::Critical)
        {
            HealthLevel::Critical
        } else if components
            .values()
            .any(|c| c.status == HealthLevel::Degraded)
        {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };

        Self {
            overall_health,
            components,
            last_check: Utc::now(),
        }
    }
}
