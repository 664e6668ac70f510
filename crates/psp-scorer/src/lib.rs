//! Computes patient- and population-level Safety Indices by integrating
//! biomarker trajectories, knowledge-graph pathway activation, foundation
//! model predictions, and clinical context.

mod population;
mod scorer;
mod thresholds;

pub use population::{
    EarlyStoppingSignal, PopulationRiskAnalyzer, PopulationSafetyIndex, SubgroupAnalysis,
};
pub use scorer::{ModelScoreInput, PatientRiskScorer};
pub use thresholds::{peak_window, thresholds_for, BiomarkerThreshold};
