//! Evidence-based biomarker grading thresholds, one table per adverse event.
//!
//! Sourced from Teachey et al. 2016 and Lee et al. 2019 grading criteria, as
//! carried by the reference implementation.

use psp_common::AdverseEventType;

/// Threshold definitions for a single biomarker.
#[derive(Debug, Clone, Copy)]
pub struct BiomarkerThreshold {
    pub biomarker_id: &'static str,
    pub normal_upper: f64,
    pub grade1_threshold: f64,
    pub grade2_threshold: f64,
    pub grade3_threshold: f64,
    pub rate_of_change_critical: f64,
}

const CRS_THRESHOLDS: &[BiomarkerThreshold] = &[
    BiomarkerThreshold {
        biomarker_id: "CYTOKINE:IL6",
        normal_upper: 7.0,
        grade1_threshold: 50.0,
        grade2_threshold: 500.0,
        grade3_threshold: 5000.0,
        rate_of_change_critical: 100.0,
    },
    BiomarkerThreshold {
        biomarker_id: "CYTOKINE:IFN_GAMMA",
        normal_upper: 15.6,
        grade1_threshold: 100.0,
        grade2_threshold: 1000.0,
        grade3_threshold: 10000.0,
        rate_of_change_critical: 200.0,
    },
    BiomarkerThreshold {
        biomarker_id: "CYTOKINE:TNF_ALPHA",
        normal_upper: 8.1,
        grade1_threshold: 25.0,
        grade2_threshold: 100.0,
        grade3_threshold: 1000.0,
        rate_of_change_critical: 50.0,
    },
    BiomarkerThreshold {
        biomarker_id: "BIOMARKER:CRP",
        normal_upper: 10.0,
        grade1_threshold: 50.0,
        grade2_threshold: 150.0,
        grade3_threshold: 300.0,
        rate_of_change_critical: 20.0,
    },
    BiomarkerThreshold {
        biomarker_id: "BIOMARKER:FERRITIN",
        normal_upper: 300.0,
        grade1_threshold: 1000.0,
        grade2_threshold: 5000.0,
        grade3_threshold: 10000.0,
        rate_of_change_critical: 500.0,
    },
];

const ICANS_THRESHOLDS: &[BiomarkerThreshold] = &[
    BiomarkerThreshold {
        biomarker_id: "CYTOKINE:IL6",
        normal_upper: 7.0,
        grade1_threshold: 100.0,
        grade2_threshold: 1000.0,
        grade3_threshold: 10000.0,
        rate_of_change_critical: 200.0,
    },
    BiomarkerThreshold {
        biomarker_id: "PROTEIN:ANG2",
        normal_upper: 2000.0,
        grade1_threshold: 5000.0,
        grade2_threshold: 10000.0,
        grade3_threshold: 20000.0,
        rate_of_change_critical: 1000.0,
    },
    BiomarkerThreshold {
        biomarker_id: "PROTEIN:VWF",
        normal_upper: 150.0,
        grade1_threshold: 250.0,
        grade2_threshold: 400.0,
        grade3_threshold: 600.0,
        rate_of_change_critical: 30.0,
    },
];

const HLH_THRESHOLDS: &[BiomarkerThreshold] = &[
    BiomarkerThreshold {
        biomarker_id: "BIOMARKER:FERRITIN",
        normal_upper: 300.0,
        grade1_threshold: 3000.0,
        grade2_threshold: 10000.0,
        grade3_threshold: 50000.0,
        rate_of_change_critical: 1000.0,
    },
    BiomarkerThreshold {
        biomarker_id: "BIOMARKER:D_DIMER",
        normal_upper: 0.5,
        grade1_threshold: 2.0,
        grade2_threshold: 5.0,
        grade3_threshold: 10.0,
        rate_of_change_critical: 1.0,
    },
    BiomarkerThreshold {
        biomarker_id: "BIOMARKER:FIBRINOGEN",
        normal_upper: 200.0,
        grade1_threshold: 150.0,
        grade2_threshold: 100.0,
        grade3_threshold: 50.0,
        rate_of_change_critical: -20.0,
    },
    BiomarkerThreshold {
        biomarker_id: "CYTOKINE:IL18",
        normal_upper: 500.0,
        grade1_threshold: 2000.0,
        grade2_threshold: 5000.0,
        grade3_threshold: 15000.0,
        rate_of_change_critical: 500.0,
    },
    BiomarkerThreshold {
        biomarker_id: "BIOMARKER:SCD25",
        normal_upper: 1000.0,
        grade1_threshold: 5000.0,
        grade2_threshold: 10000.0,
        grade3_threshold: 20000.0,
        rate_of_change_critical: 2000.0,
    },
];

/// The grading threshold table for an adverse event.
pub fn thresholds_for(ae: AdverseEventType) -> &'static [BiomarkerThreshold] {
    match ae {
        AdverseEventType::Crs => CRS_THRESHOLDS,
        AdverseEventType::Icans => ICANS_THRESHOLDS,
        AdverseEventType::Hlh => HLH_THRESHOLDS,
    }
}

/// Peak-risk window `(start_hours, end_hours)` used by the clinical domain's
/// temporal risk curve.
pub fn peak_window(ae: AdverseEventType) -> (f64, f64) {
    match ae {
        AdverseEventType::Crs => (24.0, 168.0),
        AdverseEventType::Icans => (72.0, 240.0),
        AdverseEventType::Hlh => (72.0, 336.0),
    }
}
