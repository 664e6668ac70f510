//! Normalizes heterogeneous foundation-model responses into the canonical
//! [`psp_common::Prediction`] format consumed by the Ensemble, Scorer, and
//! Audit components.

mod normalizer;

pub use normalizer::{RawResponse, ResponseNormalizer};
