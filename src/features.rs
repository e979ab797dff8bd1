//! Input feature registry for the Li River water-level model.
//!
//! Defines the five per-day features in the exact column order the model was
//! trained on. This is the single source of truth for that order; other
//! modules should look features up here rather than hardcoding indices.

// ---------------------------------------------------------------------------
// Feature metadata
// ---------------------------------------------------------------------------

/// Metadata for one input column.
pub struct FeatureSpec {
    /// Column index within a day's observation vector.
    pub index: usize,
    /// Stable identifier used in logs and error messages.
    pub name: &'static str,
    /// Gauging station the value is read from.
    pub station: &'static str,
    /// Physical unit of the raw value.
    pub unit: &'static str,
    /// What the value represents.
    pub description: &'static str,
}

/// Column index of the water level, which is also the prediction target.
pub const WATER_LEVEL: usize = 0;

/// All model inputs in training order.
///
/// Values are daily: the two Yangshuo instantaneous readings are taken at
/// 11:00, the remaining three are daily means.
pub static FEATURE_LAYOUT: &[FeatureSpec] = &[
    FeatureSpec {
        index: 0,
        name: "water_level",
        station: "Yangshuo",
        unit: "m",
        description: "Stage at the Yangshuo gauge at 11:00. The model predicts \
                      the next value of this series.",
    },
    FeatureSpec {
        index: 1,
        name: "flow_rate",
        station: "Yangshuo",
        unit: "m3/s",
        description: "Discharge at the Yangshuo gauge at 11:00.",
    },
    FeatureSpec {
        index: 2,
        name: "local_daily_avg_flow",
        station: "Yangshuo",
        unit: "m3/s",
        description: "Daily mean discharge at Yangshuo.",
    },
    FeatureSpec {
        index: 3,
        name: "upstream_daily_avg_flow",
        station: "Guilin",
        unit: "m3/s",
        description: "Daily mean discharge at Guilin, the main-stem gauge \
                      upstream of Yangshuo.",
    },
    FeatureSpec {
        index: 4,
        name: "tributary_daily_avg_flow",
        station: "Chaotian",
        unit: "m3/s",
        description: "Daily mean discharge on the Chaotian tributary.",
    },
];

/// Looks up a feature by name. Returns `None` if not found.
pub fn find_feature(name: &str) -> Option<&'static FeatureSpec> {
    FEATURE_LAYOUT.iter().find(|f| f.name == name)
}

/// Name of the feature at `index`, or `"?"` if out of range.
pub fn feature_name(index: usize) -> &'static str {
    FEATURE_LAYOUT.get(index).map(|f| f.name).unwrap_or("?")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FEATURES;

    #[test]
    fn test_layout_width_matches_model_input() {
        assert_eq!(FEATURE_LAYOUT.len(), FEATURES);
    }

    #[test]
    fn test_indices_are_positional() {
        // Reordering entries without renumbering would silently feed the
        // trained weights the wrong columns.
        for (i, f) in FEATURE_LAYOUT.iter().enumerate() {
            assert_eq!(f.index, i, "feature '{}' is out of position", f.name);
        }
    }

    #[test]
    fn test_no_duplicate_names() {
        let mut seen = std::collections::HashSet::new();
        for f in FEATURE_LAYOUT {
            assert!(seen.insert(f.name), "duplicate feature name '{}'", f.name);
        }
    }

    #[test]
    fn test_training_order_is_preserved() {
        let names: Vec<_> = FEATURE_LAYOUT.iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            vec![
                "water_level",
                "flow_rate",
                "local_daily_avg_flow",
                "upstream_daily_avg_flow",
                "tributary_daily_avg_flow",
            ]
        );
    }

    #[test]
    fn test_water_level_constant_points_at_stage() {
        assert_eq!(find_feature("water_level").map(|f| f.index), Some(WATER_LEVEL));
        assert_eq!(FEATURE_LAYOUT[WATER_LEVEL].unit, "m");
    }

    #[test]
    fn test_lookup_helpers() {
        assert_eq!(find_feature("upstream_daily_avg_flow").map(|f| f.station), Some("Guilin"));
        assert!(find_feature("rainfall").is_none());
        assert_eq!(feature_name(4), "tributary_daily_avg_flow");
        assert_eq!(feature_name(9), "?");
    }
}
