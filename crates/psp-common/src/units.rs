//! Reference-range unit convention shared by the Graph, Validator, and Scorer.

use serde::{Deserialize, Serialize};

/// Units in which a node's `normal_range_<unit>` property may be expressed.
///
/// The Validator and Scorer probe these in [`ReferenceRangeUnit::PROBE_ORDER`]
/// — all six, unlike the narrower probing in the reference implementation,
/// per the property-key convention in the external-interfaces section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferenceRangeUnit {
    PgMl,
    NgMl,
    MgL,
    MgDl,
    UL,
    Percent,
}

impl ReferenceRangeUnit {
    /// Fixed probe order used everywhere a node's reference range is looked up.
    pub const PROBE_ORDER: [ReferenceRangeUnit; 6] = [
        ReferenceRangeUnit::PgMl,
        ReferenceRangeUnit::NgMl,
        ReferenceRangeUnit::MgL,
        ReferenceRangeUnit::MgDl,
        ReferenceRangeUnit::UL,
        ReferenceRangeUnit::Percent,
    ];

    /// The node-property key this unit is stored under, e.g. `normal_range_pg_ml`.
    pub fn property_key(&self) -> &'static str {
        match self {
            ReferenceRangeUnit::PgMl => "normal_range_pg_ml",
            ReferenceRangeUnit::NgMl => "normal_range_ng_ml",
            ReferenceRangeUnit::MgL => "normal_range_mg_l",
            ReferenceRangeUnit::MgDl => "normal_range_mg_dl",
            ReferenceRangeUnit::UL => "normal_range_u_l",
            ReferenceRangeUnit::Percent => "normal_range_percent",
        }
    }
}

/// Look up the first present reference range across all recognized units.
pub fn probe_reference_range(
    properties: &std::collections::HashMap<String, serde_json::Value>,
) -> Option<(f64, f64)> {
    for unit in ReferenceRangeUnit::PROBE_ORDER {
        if let Some(value) = properties.get(unit.property_key()) {
            if let Some(arr) = value.as_array() {
                if arr.len() == 2 {
                    let low = arr[0].as_f64();
                    let high = arr[1].as_f64();
                    if let (Some(low), Some(high)) = (low, high) {
                        return Some((low, high));
                    }
                }
            }
        }
    }
    None
}
