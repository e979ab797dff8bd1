//! Inference orchestration.
//!
//! `InferenceEngine` is the only entry point callers need: it owns the
//! normalizer and the sequence model and runs
//! validate → normalize → forward → denormalize for each request.
//!
//! There is no uninitialized engine. `InferenceEngine::load` either returns
//! a ready engine or an `ArtifactError`, so a process that fails to load its
//! artifacts cannot serve predictions.

use std::sync::{Arc, RwLock};

use crate::artifact;
use crate::config::ServiceConfig;
use crate::logging::{self, Component};
use crate::lstm::SequenceModel;
use crate::model::{
    ArtifactError, FEATURES, FeatureWindow, PipelineStage, PredictionError, PredictionResult,
};
use crate::normalize::FeatureNormalizer;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Immutable, shareable prediction pipeline.
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    normalizer: FeatureNormalizer,
    model: SequenceModel,
    display_precision: u32,
}

impl InferenceEngine {
    pub fn new(
        normalizer: FeatureNormalizer,
        model: SequenceModel,
        display_precision: u32,
    ) -> Result<Self, ArtifactError> {
        let arch = model.architecture();
        if arch.input_size != FEATURES {
            return Err(ArtifactError::ShapeMismatch {
                tensor: "lstm.weight_ih_l0".to_string(),
                expected: vec![FEATURES],
                found: vec![arch.input_size],
            });
        }
        Ok(Self {
            normalizer,
            model,
            display_precision,
        })
    }

    /// Loads weights and both scalers from the configured paths.
    pub fn load(config: &ServiceConfig) -> Result<Self, ArtifactError> {
        let paths = &config.artifacts;
        let arch = config.architecture();
        let result = Self::load_artifacts(config);

        match &result {
            Ok(_) => logging::info(
                Component::Engine,
                None,
                &format!(
                    "ready: {} parameters from {}",
                    arch.parameter_count(),
                    paths.weights.display()
                ),
            ),
            Err(e) => logging::error(Component::Engine, None, &format!("startup failed: {}", e)),
        }

        result
    }

    fn load_artifacts(config: &ServiceConfig) -> Result<Self, ArtifactError> {
        let paths = &config.artifacts;
        let model = artifact::load_weights(&paths.weights, &config.architecture())?;
        let features = artifact::load_scaler(&paths.feature_scaler)?;
        let target = artifact::load_scaler(&paths.target_scaler)?;
        let normalizer = FeatureNormalizer::new(features, target)?;
        Self::new(normalizer, model, config.output.display_precision)
    }

    pub fn normalizer(&self) -> &FeatureNormalizer {
        &self.normalizer
    }

    pub fn model(&self) -> &SequenceModel {
        &self.model
    }

    pub fn display_precision(&self) -> u32 {
        self.display_precision
    }

    /// Predicts the next water level for one window.
    pub fn predict(&self, window: &FeatureWindow) -> Result<PredictionResult, PredictionError> {
        let normalized = self.normalizer.normalize(window)?;
        let raw = self.model.forward(&normalized);
        let value = self.normalizer.denormalize(raw)?;
        let result = PredictionResult::new(value, raw, self.display_precision);
        ensure_finite(&result)?;
        Ok(result)
    }

    /// Validates a list-of-lists input and predicts from it. The model is
    /// not run when the shape is wrong.
    pub fn predict_rows<R: AsRef<[f64]>>(
        &self,
        rows: &[R],
    ) -> Result<PredictionResult, PredictionError> {
        let window = FeatureWindow::from_rows(rows)?;
        self.predict(&window)
    }

    /// Predicts every window independently. One bad window does not affect
    /// the others.
    pub fn predict_batch(
        &self,
        windows: &[FeatureWindow],
    ) -> Vec<Result<PredictionResult, PredictionError>> {
        let results: Vec<_> = windows
            .iter()
            .enumerate()
            .map(|(i, window)| {
                let result = self.predict(window);
                if let Err(e) = &result {
                    logging::log_prediction_failure(Some(&format!("window {}", i)), e);
                }
                result
            })
            .collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        logging::log_batch_summary(Component::Engine, results.len(), results.len() - failed, failed);
        results
    }
}

// ---------------------------------------------------------------------------
// Hot reload
// ---------------------------------------------------------------------------

/// Shares an engine across threads and allows replacing it atomically.
///
/// Each call clones the current `Arc` and finishes on that snapshot, so a
/// concurrent `replace` never mixes old and new weights within one request.
#[derive(Debug)]
pub struct EngineHandle {
    current: RwLock<Arc<InferenceEngine>>,
}

impl EngineHandle {
    pub fn new(engine: InferenceEngine) -> Self {
        Self {
            current: RwLock::new(Arc::new(engine)),
        }
    }

    /// The engine new requests will use.
    pub fn snapshot(&self) -> Arc<InferenceEngine> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Installs `engine` and returns the one it replaced.
    pub fn replace(&self, engine: InferenceEngine) -> Arc<InferenceEngine> {
        let next = Arc::new(engine);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }

    /// Loads fresh artifacts and swaps them in. On failure the current
    /// engine stays in place.
    pub fn reload(&self, config: &ServiceConfig) -> Result<(), ArtifactError> {
        let engine = InferenceEngine::load(config)?;
        self.replace(engine);
        logging::info(Component::Engine, None, "artifacts reloaded");
        Ok(())
    }

    pub fn predict(&self, window: &FeatureWindow) -> Result<PredictionResult, PredictionError> {
        self.snapshot().predict(window)
    }
}

/// Rejects results whose value or rounded display value is not finite.
/// Rounding scales by `10^precision`, so a finite value near the f64 limit
/// can still overflow here.
pub fn ensure_finite(result: &PredictionResult) -> Result<(), PredictionError> {
    if result.value.is_finite() && result.display_value.is_finite() {
        Ok(())
    } else {
        Err(PredictionError::NumericFailure {
            stage: PipelineStage::Denormalize,
            detail: format!(
                "prediction is {} (display {})",
                result.value, result.display_value
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
