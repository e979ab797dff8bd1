//! Next-day water-level prediction for the Li River at Yangshuo.
//!
//! A two-layer LSTM reads three days of five hydrological features and
//! predicts the following day's stage. `engine::InferenceEngine` ties the
//! pieces together; the rest of the crate is what it is built from.

pub mod api;
pub mod artifact;
pub mod config;
pub mod engine;
pub mod features;
pub mod logging;
pub mod lstm;
pub mod model;
pub mod normalize;
pub mod verify;

pub use engine::{EngineHandle, InferenceEngine};
pub use model::{ArtifactError, FeatureWindow, PredictionError, PredictionResult};
