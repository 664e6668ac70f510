//! Aggregates per-model predictions into a single calibrated risk estimate,
//! detecting inter-model disagreement and widening uncertainty accordingly.

mod ensemble;
mod types;

pub use ensemble::EnsembleAggregator;
pub use types::{
    AggregationMethod, CalibrationMetrics, DisagreementReport, EnsemblePrediction,
};
