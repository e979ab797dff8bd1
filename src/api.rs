//! JSON request/response surface for the engine.
//!
//! A request carries the raw list-of-lists so shape errors can be reported
//! instead of failing deserialization. Every failure maps to an
//! `invalid_input` response; the caller never sees a panic or a bare error.

use serde::{Deserialize, Serialize};

use crate::engine::InferenceEngine;
use crate::logging::{self, Component};
use crate::model::PredictionError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// Three days, oldest first, five features per day.
    pub features: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidShape,
    NumericFailure,
    MalformedRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PredictionResponse {
    Ok { predicted_value: f64 },
    InvalidInput { error: String, kind: ErrorKind },
}

impl PredictionResponse {
    pub fn is_ok(&self) -> bool {
        matches!(self, PredictionResponse::Ok { .. })
    }
}

impl From<&PredictionError> for PredictionResponse {
    fn from(err: &PredictionError) -> Self {
        let kind = match err {
            PredictionError::InvalidShape { .. } => ErrorKind::InvalidShape,
            PredictionError::NumericFailure { .. } => ErrorKind::NumericFailure,
        };
        PredictionResponse::InvalidInput {
            error: err.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub windows: Vec<Vec<Vec<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<PredictionResponse>,
}

impl BatchResponse {
    /// `(successful, failed)` over every window in the batch.
    pub fn counts(&self) -> (usize, usize) {
        let successful = self.results.iter().filter(|r| r.is_ok()).count();
        (successful, self.results.len() - successful)
    }
}

/// Runs one request through the engine.
pub fn handle(engine: &InferenceEngine, request: &PredictionRequest) -> PredictionResponse {
    match engine.predict_rows(&request.features) {
        Ok(result) => PredictionResponse::Ok {
            predicted_value: result.display_value,
        },
        Err(e) => {
            logging::log_prediction_failure(None, &e);
            PredictionResponse::from(&e)
        }
    }
}

/// Runs a batch. Every window is answered on its own, and the summary
/// counts shape rejections alongside prediction failures.
pub fn handle_batch(engine: &InferenceEngine, request: &BatchRequest) -> BatchResponse {
    let results: Vec<PredictionResponse> = request
        .windows
        .iter()
        .enumerate()
        .map(|(i, rows)| match engine.predict_rows(rows) {
            Ok(result) => PredictionResponse::Ok {
                predicted_value: result.display_value,
            },
            Err(e) => {
                logging::log_prediction_failure(Some(&format!("window {}", i)), &e);
                PredictionResponse::from(&e)
            }
        })
        .collect();

    let response = BatchResponse { results };
    let (successful, failed) = response.counts();
    logging::log_batch_summary(Component::Engine, response.results.len(), successful, failed);
    response
}

/// Parses a JSON body, predicts, and serializes the response. A body that
/// is not a valid request becomes a `malformed_request` response.
pub fn respond_json(engine: &InferenceEngine, body: &str) -> Result<String, serde_json::Error> {
    let response = match serde_json::from_str::<PredictionRequest>(body) {
        Ok(request) => handle(engine, &request),
        Err(e) => PredictionResponse::InvalidInput {
            error: format!("Malformed request: {}", e),
            kind: ErrorKind::MalformedRequest,
        },
    };
    serde_json::to_string(&response)
}

/// Batch counterpart of `respond_json`. A malformed body yields a batch with
/// a single `malformed_request` entry.
pub fn respond_batch_json(engine: &InferenceEngine, body: &str) -> Result<String, serde_json::Error> {
    let response = match serde_json::from_str::<BatchRequest>(body) {
        Ok(request) => handle_batch(engine, &request),
        Err(e) => BatchResponse {
            results: vec![PredictionResponse::InvalidInput {
                error: format!("Malformed request: {}", e),
                kind: ErrorKind::MalformedRequest,
            }],
        },
    };
    serde_json::to_string(&response)
}
