//! Core data types for the water-level prediction service.
//!
//! This module defines the shared domain model imported by all other modules:
//! the fixed-shape input window, its normalized counterpart, the prediction
//! result, and the error types for per-request and startup failures.
//! Apart from boundary validation it contains no logic and no I/O.

use serde::Serialize;

// ---------------------------------------------------------------------------
// Dimensions
// ---------------------------------------------------------------------------

/// Number of consecutive daily observations in one window, oldest first.
pub const DAYS: usize = 3;

/// Number of features recorded per day. Order is fixed by
/// `features::FEATURE_LAYOUT` and must match the trained weights.
pub const FEATURES: usize = 5;

/// Width of the LSTM hidden and cell state.
pub const HIDDEN_SIZE: usize = 32;

/// Number of stacked LSTM layers.
pub const NUM_LAYERS: usize = 2;

/// Width of the linear head output.
pub const OUTPUT_SIZE: usize = 1;

/// Decimal digits kept in the display value of a prediction.
pub const DISPLAY_PRECISION: u32 = 2;

// ---------------------------------------------------------------------------
// Window types
// ---------------------------------------------------------------------------

/// Three consecutive days of raw hydrological observations.
///
/// Each row is `[water_level, flow_rate, local_daily_avg_flow,
/// upstream_daily_avg_flow, tributary_daily_avg_flow]` in physical units.
/// The shape is fixed by the type; use `from_rows` for externally sourced
/// nested lists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureWindow {
    days: [[f64; FEATURES]; DAYS],
}

impl FeatureWindow {
    pub fn new(days: [[f64; FEATURES]; DAYS]) -> Self {
        Self { days }
    }

    /// Validates a list-of-lists input and builds a window from it.
    ///
    /// The day count is checked before any day's width, so a request with
    /// both problems reports the day count.
    pub fn from_rows<R: AsRef<[f64]>>(rows: &[R]) -> Result<Self, PredictionError> {
        if rows.len() != DAYS {
            return Err(PredictionError::InvalidShape {
                day: None,
                found: rows.len(),
            });
        }

        let mut days = [[0.0; FEATURES]; DAYS];
        for (i, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != FEATURES {
                return Err(PredictionError::InvalidShape {
                    day: Some(i),
                    found: row.len(),
                });
            }
            days[i].copy_from_slice(row);
        }

        Ok(Self { days })
    }

    pub fn days(&self) -> &[[f64; FEATURES]; DAYS] {
        &self.days
    }

    /// Values of one feature across the window, oldest day first.
    pub fn column(&self, feature: usize) -> [f64; DAYS] {
        let mut out = [0.0; DAYS];
        for (slot, day) in out.iter_mut().zip(self.days.iter()) {
            *slot = day[feature];
        }
        out
    }
}

impl From<[[f64; FEATURES]; DAYS]> for FeatureWindow {
    fn from(days: [[f64; FEATURES]; DAYS]) -> Self {
        Self::new(days)
    }
}

/// A feature window after scaling, in the f32 precision the model runs at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedWindow {
    steps: [[f32; FEATURES]; DAYS],
}

impl NormalizedWindow {
    pub fn new(steps: [[f32; FEATURES]; DAYS]) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[[f32; FEATURES]; DAYS] {
        &self.steps
    }
}

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// Output of a single prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionResult {
    /// Predicted water level in physical units (metres).
    pub value: f64,
    /// `value` rounded for display.
    pub display_value: f64,
    /// Model output before the inverse target transform.
    pub raw: f32,
}

impl PredictionResult {
    pub fn new(value: f64, raw: f32, precision: u32) -> Self {
        Self {
            value,
            display_value: round_to(value, precision),
            raw,
        }
    }
}

/// Rounds half away from zero to `digits` decimal places.
pub fn round_to(value: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Pipeline stage at which a non-finite value was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Input,
    Normalize,
    Model,
    Denormalize,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Input => write!(f, "input"),
            PipelineStage::Normalize => write!(f, "normalization"),
            PipelineStage::Model => write!(f, "model"),
            PipelineStage::Denormalize => write!(f, "denormalization"),
        }
    }
}

/// Per-request failures. These never affect subsequent calls.
#[derive(Debug, Clone, PartialEq)]
pub enum PredictionError {
    /// The input is not 3 days × 5 features. `day` is `None` when the day
    /// count is wrong, otherwise the zero-based index of the first bad day.
    InvalidShape { day: Option<usize>, found: usize },
    /// NaN or Infinity appeared in the pipeline.
    NumericFailure { stage: PipelineStage, detail: String },
}

impl std::fmt::Display for PredictionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PredictionError::InvalidShape { day: None, found } => write!(
                f,
                "Invalid shape: expected {} days of features, got {}",
                DAYS, found
            ),
            PredictionError::InvalidShape {
                day: Some(day),
                found,
            } => write!(
                f,
                "Invalid shape: day {} must contain {} features, got {}",
                day + 1,
                FEATURES,
                found
            ),
            PredictionError::NumericFailure { stage, detail } => {
                write!(f, "Numeric failure during {}: {}", stage, detail)
            }
        }
    }
}

impl std::error::Error for PredictionError {}

/// Failures while loading model weights or scaler parameters.
///
/// Every variant is fatal at startup; the service has no partial mode.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactError {
    /// The artifact could not be read from disk.
    Io { path: String, message: String },
    /// The artifact was read but its contents could not be decoded.
    Parse { path: String, message: String },
    /// Binary input without the native weight magic.
    NotAnArtifact,
    /// Native weight file written by a newer format version.
    UnsupportedVersion { major: u8, minor: u8 },
    /// Native payload does not match its stored CRC32.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Fewer bytes than the header or payload length requires.
    Truncated { expected: usize, actual: usize },
    /// A required tensor is absent from the weight artifact.
    MissingTensor(String),
    /// A tensor or header dimension disagrees with the configured architecture.
    ShapeMismatch {
        tensor: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    /// A weight tensor holds NaN or Infinity.
    NonFiniteWeight { tensor: String, index: usize },
    /// Scaler parameters are inconsistent or non-finite.
    InvalidScaler(String),
}

impl std::fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactError::Io { path, message } => {
                write!(f, "Artifact unreadable at {}: {}", path, message)
            }
            ArtifactError::Parse { path, message } => {
                write!(f, "Artifact corrupt at {}: {}", path, message)
            }
            ArtifactError::NotAnArtifact => write!(f, "Not a native weight artifact"),
            ArtifactError::UnsupportedVersion { major, minor } => {
                write!(f, "Unsupported weight format version {}.{}", major, minor)
            }
            ArtifactError::ChecksumMismatch { expected, actual } => write!(
                f,
                "Weight payload checksum mismatch: expected {:08x}, got {:08x}",
                expected, actual
            ),
            ArtifactError::Truncated { expected, actual } => write!(
                f,
                "Weight artifact truncated: expected {} bytes, got {}",
                expected, actual
            ),
            ArtifactError::MissingTensor(name) => write!(f, "Missing tensor: {}", name),
            ArtifactError::ShapeMismatch {
                tensor,
                expected,
                found,
            } => write!(
                f,
                "Shape mismatch for {}: expected {:?}, found {:?}",
                tensor, expected, found
            ),
            ArtifactError::NonFiniteWeight { tensor, index } => write!(
                f,
                "Non-finite value in {} at flat index {}",
                tensor, index
            ),
            ArtifactError::InvalidScaler(msg) => write!(f, "Invalid scaler: {}", msg),
        }
    }
}

impl std::error::Error for ArtifactError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
