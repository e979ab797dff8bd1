//! Affine feature scaling fitted offline at training time.
//!
//! Features are scaled as `(value - center) / scale` and the model output is
//! mapped back with `value * scale + center` using the target scaler. The
//! parameters are exported from scikit-learn scalers (see `ScalerFile`) and
//! are never mutated after load.
//!
//! Raw values are scaled in f64 and only then narrowed to f32, which mirrors
//! the numpy-then-tensor path the model was trained on.

use serde::{Deserialize, Serialize};

use crate::features;
use crate::logging::{self, Component};
use crate::model::{
    ArtifactError, DAYS, FEATURES, FeatureWindow, NormalizedWindow, PipelineStage,
    PredictionError,
};

// ---------------------------------------------------------------------------
// Scaler
// ---------------------------------------------------------------------------

/// Per-column center/scale pair.
#[derive(Debug, Clone, PartialEq)]
pub struct AffineScaler {
    center: Vec<f64>,
    scale: Vec<f64>,
}

impl AffineScaler {
    /// Builds a scaler, rejecting mismatched or non-finite parameters.
    ///
    /// A scale of exactly zero (a constant column at fit time) is replaced by
    /// 1.0, the same convention scikit-learn applies, so the column is only
    /// centered.
    pub fn new(center: Vec<f64>, mut scale: Vec<f64>) -> Result<Self, ArtifactError> {
        if center.is_empty() {
            return Err(ArtifactError::InvalidScaler("no columns".to_string()));
        }
        if center.len() != scale.len() {
            return Err(ArtifactError::InvalidScaler(format!(
                "{} centers but {} scales",
                center.len(),
                scale.len()
            )));
        }
        if let Some(i) = center.iter().position(|c| !c.is_finite()) {
            return Err(ArtifactError::InvalidScaler(format!(
                "center of column {} is not finite",
                i
            )));
        }
        if let Some(i) = scale.iter().position(|s| !s.is_finite()) {
            return Err(ArtifactError::InvalidScaler(format!(
                "scale of column {} is not finite",
                i
            )));
        }

        for (i, s) in scale.iter_mut().enumerate() {
            if *s == 0.0 {
                logging::warn(
                    Component::Scaler,
                    None,
                    &format!("column {} has zero scale; treating it as 1.0", i),
                );
                *s = 1.0;
            }
        }

        Ok(Self { center, scale })
    }

    /// Number of columns this scaler was fitted on.
    pub fn width(&self) -> usize {
        self.center.len()
    }

    pub fn center(&self) -> &[f64] {
        &self.center
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// Forward transform of one value in column `col`.
    pub fn transform(&self, col: usize, value: f64) -> f64 {
        (value - self.center[col]) / self.scale[col]
    }

    /// Inverse transform of one value in column `col`.
    pub fn inverse(&self, col: usize, value: f64) -> f64 {
        value * self.scale[col] + self.center[col]
    }
}

// ---------------------------------------------------------------------------
// On-disk schema
// ---------------------------------------------------------------------------

/// Scaler parameters as exported from the training pipeline.
///
/// `standard` carries `StandardScaler.mean_`/`scale_`; `min_max` carries
/// `MinMaxScaler.min_`/`scale_`, whose transform is `x * scale + min`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalerFile {
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    MinMax { min: Vec<f64>, scale: Vec<f64> },
    Affine { center: Vec<f64>, scale: Vec<f64> },
}

impl ScalerFile {
    pub fn into_scaler(self) -> Result<AffineScaler, ArtifactError> {
        match self {
            ScalerFile::Standard { mean, scale } => AffineScaler::new(mean, scale),
            ScalerFile::Affine { center, scale } => AffineScaler::new(center, scale),
            ScalerFile::MinMax { min, scale } => {
                if min.len() != scale.len() {
                    return Err(ArtifactError::InvalidScaler(format!(
                        "{} minimums but {} scales",
                        min.len(),
                        scale.len()
                    )));
                }
                // x * s + m == (x - (-m / s)) / (1 / s)
                let mut center = Vec::with_capacity(min.len());
                let mut inv_scale = Vec::with_capacity(scale.len());
                for (i, (&m, &s)) in min.iter().zip(scale.iter()).enumerate() {
                    if s == 0.0 {
                        return Err(ArtifactError::InvalidScaler(format!(
                            "min-max scale of column {} is zero",
                            i
                        )));
                    }
                    center.push(-m / s);
                    inv_scale.push(1.0 / s);
                }
                AffineScaler::new(center, inv_scale)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Feature normalizer
// ---------------------------------------------------------------------------

/// Owns the feature and target scalers for the inference pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureNormalizer {
    features: AffineScaler,
    target: AffineScaler,
}

impl FeatureNormalizer {
    pub fn new(features: AffineScaler, target: AffineScaler) -> Result<Self, ArtifactError> {
        if features.width() != FEATURES {
            return Err(ArtifactError::ShapeMismatch {
                tensor: "feature_scaler".to_string(),
                expected: vec![FEATURES],
                found: vec![features.width()],
            });
        }
        if target.width() != 1 {
            return Err(ArtifactError::ShapeMismatch {
                tensor: "target_scaler".to_string(),
                expected: vec![1],
                found: vec![target.width()],
            });
        }
        Ok(Self { features, target })
    }

    pub fn features(&self) -> &AffineScaler {
        &self.features
    }

    pub fn target(&self) -> &AffineScaler {
        &self.target
    }

    /// Scales every observation in the window, column by column.
    ///
    /// Values outside the fitted range are extrapolated, not clamped. Any
    /// value that is non-finite after scaling, or that overflows f32, is
    /// reported as a `NumericFailure`.
    pub fn normalize(&self, window: &FeatureWindow) -> Result<NormalizedWindow, PredictionError> {
        let mut steps = [[0.0f32; FEATURES]; DAYS];

        for (d, day) in window.days().iter().enumerate() {
            for (i, &value) in day.iter().enumerate() {
                if !value.is_finite() {
                    return Err(PredictionError::NumericFailure {
                        stage: PipelineStage::Input,
                        detail: format!("day {} {} is {}", d + 1, features::feature_name(i), value),
                    });
                }
                let scaled = self.features.transform(i, value) as f32;
                if !scaled.is_finite() {
                    return Err(PredictionError::NumericFailure {
                        stage: PipelineStage::Normalize,
                        detail: format!(
                            "day {} {} scaled to {}",
                            d + 1,
                            features::feature_name(i),
                            scaled
                        ),
                    });
                }
                steps[d][i] = scaled;
            }
        }

        Ok(NormalizedWindow::new(steps))
    }

    /// Maps a model output back to physical units.
    pub fn denormalize(&self, raw: f32) -> Result<f64, PredictionError> {
        if !raw.is_finite() {
            return Err(PredictionError::NumericFailure {
                stage: PipelineStage::Model,
                detail: format!("model produced {}", raw),
            });
        }
        let value = self.target.inverse(0, raw as f64);
        if !value.is_finite() {
            return Err(PredictionError::NumericFailure {
                stage: PipelineStage::Denormalize,
                detail: format!("inverse transform produced {}", value),
            });
        }
        Ok(value)
    }

    /// Forward transform of a target value. Only the round trip with
    /// `denormalize` uses this; the prediction path never does.
    pub fn normalize_target(&self, value: f64) -> f64 {
        self.target.transform(0, value)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> FeatureNormalizer {
        let features = AffineScaler::new(
            vec![104.5, 300.0, 280.0, 250.0, 10.0],
            vec![0.5, 150.0, 120.0, 90.0, 3.0],
        )
        .expect("valid feature scaler");
        let target = AffineScaler::new(vec![104.6], vec![0.8]).expect("valid target scaler");
        FeatureNormalizer::new(features, target).expect("valid widths")
    }

    fn window() -> FeatureWindow {
        FeatureWindow::new([
            [104.42, 193.0, 186.0, 238.0, 12.8],
            [105.49, 568.0, 424.0, 343.0, 9.28],
            [104.75, 288.0, 292.0, 171.0, 7.93],
        ])
    }

    #[test]
    fn test_normalize_is_elementwise_per_feature() {
        let n = normalizer().normalize(&window()).expect("finite input");
        let steps = n.steps();
        assert!((steps[0][0] - (-0.16)).abs() < 1e-5);
        assert!((steps[1][1] - (268.0 / 150.0) as f32).abs() < 1e-6);
        assert!((steps[2][4] - ((7.93 - 10.0) / 3.0) as f32).abs() < 1e-6);
    }

    #[test]
    fn test_out_of_range_values_are_not_clamped() {
        let mut days = *window().days();
        days[0][1] = 100_000.0;
        let n = normalizer().normalize(&FeatureWindow::new(days)).expect("finite");
        assert!(n.steps()[0][1] > 600.0, "extrapolated value should pass through");
    }

    #[test]
    fn test_target_round_trip() {
        let n = normalizer();
        for v in [0.0, 98.3, 104.56, 120.0, -5.5] {
            let back = n.denormalize(n.normalize_target(v) as f32).expect("finite");
            assert!((back - v).abs() < 1e-4, "round trip of {} gave {}", v, back);
        }
    }

    #[test]
    fn test_zero_scale_is_treated_as_identity() {
        let features = AffineScaler::new(vec![1.0; 5], vec![2.0, 0.0, 2.0, 2.0, 2.0])
            .expect("zero scale is tolerated");
        assert_eq!(features.scale()[1], 1.0);

        let target = AffineScaler::new(vec![0.0], vec![1.0]).unwrap();
        let n = FeatureNormalizer::new(features, target).unwrap();
        let out = n.normalize(&window()).expect("zero scale must not yield NaN");
        assert_eq!(out.steps()[0][1], 192.0);
        assert!(out.steps().iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn test_tiny_scale_overflow_is_numeric_failure() {
        let features = AffineScaler::new(vec![0.0; 5], vec![1.0, 1e-300, 1.0, 1.0, 1.0]).unwrap();
        let target = AffineScaler::new(vec![0.0], vec![1.0]).unwrap();
        let n = FeatureNormalizer::new(features, target).unwrap();
        match n.normalize(&window()) {
            Err(PredictionError::NumericFailure { stage, .. }) => {
                assert_eq!(stage, PipelineStage::Normalize)
            }
            other => panic!("expected NumericFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_nan_input_is_numeric_failure() {
        let mut days = *window().days();
        days[1][3] = f64::NAN;
        match normalizer().normalize(&FeatureWindow::new(days)) {
            Err(PredictionError::NumericFailure { stage, .. }) => {
                assert_eq!(stage, PipelineStage::Input)
            }
            other => panic!("expected NumericFailure, got {:?}", other),
        }
    }

    #[test]
    fn test_denormalize_rejects_non_finite_model_output() {
        let err = normalizer().denormalize(f32::NAN).unwrap_err();
        assert!(matches!(
            err,
            PredictionError::NumericFailure {
                stage: PipelineStage::Model,
                ..
            }
        ));
    }

    #[test]
    fn test_non_finite_parameters_are_rejected() {
        assert!(AffineScaler::new(vec![f64::NAN], vec![1.0]).is_err());
        assert!(AffineScaler::new(vec![0.0], vec![f64::INFINITY]).is_err());
        assert!(AffineScaler::new(vec![0.0, 1.0], vec![1.0]).is_err());
        assert!(AffineScaler::new(vec![], vec![]).is_err());
    }

    #[test]
    fn test_width_mismatch_is_rejected() {
        let four = AffineScaler::new(vec![0.0; 4], vec![1.0; 4]).unwrap();
        let target = AffineScaler::new(vec![0.0], vec![1.0]).unwrap();
        assert!(matches!(
            FeatureNormalizer::new(four, target),
            Err(ArtifactError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_min_max_export_matches_sklearn_transform() {
        // sklearn: X_scaled = X * scale_ + min_
        let file: ScalerFile =
            serde_json::from_str(r#"{"kind":"min_max","min":[-2.0],"scale":[0.5]}"#)
                .expect("valid scaler json");
        let scaler = file.into_scaler().expect("valid min-max scaler");
        assert!((scaler.transform(0, 10.0) - (10.0 * 0.5 - 2.0)).abs() < 1e-12);
        assert!((scaler.inverse(0, 3.0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_standard_export_uses_mean_and_scale() {
        let file: ScalerFile =
            serde_json::from_str(r#"{"kind":"standard","mean":[104.0],"scale":[2.0]}"#).unwrap();
        let scaler = file.into_scaler().unwrap();
        assert_eq!(scaler.transform(0, 108.0), 2.0);
    }
}
