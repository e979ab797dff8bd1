//! Integration tests for the full prediction pipeline
//!
//! Tests verify:
//! 1. Engine startup from artifact files on disk
//! 2. Startup failure on missing or corrupt artifacts
//! 3. Deterministic predictions, including across threads
//! 4. Shape rejection and sensitivity to the input
//! 5. Hot reload through `EngineHandle`
//!
//! Synthetic artifacts are written to a temp directory. The regression
//! against the trained weights is ignored by default; it reads artifact
//! paths from `.env` (LEVELCAST_WEIGHTS, LEVELCAST_FEATURE_SCALER,
//! LEVELCAST_TARGET_SCALER).
//!
//! Run the regression with: cargo test --test engine_pipeline -- --ignored

use levelcast_service::artifact::tensor_layout;
use levelcast_service::config::ServiceConfig;
use levelcast_service::lstm::Architecture;
use levelcast_service::verify::{self, VerificationStatus};
use levelcast_service::{ArtifactError, EngineHandle, FeatureWindow, InferenceEngine, PredictionError};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

/// Small deterministic weights, varied enough that every input column matters.
fn synthetic_value(tensor: usize, i: usize, seed: u32) -> f32 {
    let h = (tensor as u32 * 131 + i as u32 * 7919 + seed * 104_729) % 1000;
    (h as f32 / 1000.0 - 0.5) * 0.4
}

fn write_state_dict(path: &Path, seed: u32) {
    let mut map = serde_json::Map::new();
    for (t, spec) in tensor_layout(&Architecture::REFERENCE).iter().enumerate() {
        let value = match spec.shape.as_slice() {
            [rows, cols] => json!((0..*rows)
                .map(|r| (0..*cols).map(|c| synthetic_value(t, r * cols + c, seed)).collect::<Vec<_>>())
                .collect::<Vec<_>>()),
            [len] => json!((0..*len).map(|i| synthetic_value(t, i, seed)).collect::<Vec<_>>()),
            other => panic!("unexpected tensor rank {:?}", other),
        };
        map.insert(spec.name.clone(), value);
    }
    std::fs::write(path, serde_json::Value::Object(map).to_string()).unwrap();
}

fn write_scalers(dir: &Path) {
    std::fs::write(
        dir.join("scaler_features.json"),
        json!({
            "kind": "standard",
            "mean": [104.6, 420.0, 400.0, 300.0, 12.0],
            "scale": [0.9, 380.0, 360.0, 250.0, 8.0]
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        dir.join("scaler_target.json"),
        json!({ "kind": "standard", "mean": [104.6], "scale": [0.9] }).to_string(),
    )
    .unwrap();
}

fn config_for(dir: &Path, weights: &str) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.artifacts.weights = dir.join(weights);
    config.artifacts.feature_scaler = dir.join("scaler_features.json");
    config.artifacts.target_scaler = dir.join("scaler_target.json");
    config
}

fn synthetic_config(dir: &Path, seed: u32) -> ServiceConfig {
    write_state_dict(&dir.join("weights.json"), seed);
    write_scalers(dir);
    config_for(dir, "weights.json")
}

fn sample_rows() -> Vec<Vec<f64>> {
    vec![
        vec![104.42, 193.0, 186.0, 238.0, 12.8],
        vec![105.49, 568.0, 424.0, 343.0, 9.28],
        vec![104.75, 288.0, 292.0, 171.0, 7.93],
    ]
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

#[test]
fn test_engine_loads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let engine = InferenceEngine::load(&synthetic_config(dir.path(), 1)).expect("artifacts load");

    let result = engine.predict_rows(&sample_rows()).expect("valid input");
    assert!(result.value.is_finite());
    assert_eq!(engine.model().architecture(), Architecture::REFERENCE);
}

#[test]
fn test_missing_weights_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_scalers(dir.path());
    let err = InferenceEngine::load(&config_for(dir.path(), "absent.lcw")).unwrap_err();
    assert!(matches!(err, ArtifactError::Io { .. }), "got {:?}", err);
}

#[test]
fn test_corrupt_weights_are_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_scalers(dir.path());
    std::fs::write(dir.path().join("weights.json"), "{\"lstm.weight_ih_l0\": [[1.0]").unwrap();
    let err = InferenceEngine::load(&config_for(dir.path(), "weights.json")).unwrap_err();
    assert!(matches!(err, ArtifactError::Parse { .. }), "got {:?}", err);
}

#[test]
fn test_missing_scaler_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = synthetic_config(dir.path(), 1);
    std::fs::remove_file(&config.artifacts.target_scaler).unwrap();
    assert!(matches!(
        InferenceEngine::load(&config),
        Err(ArtifactError::Io { .. })
    ));
}

#[test]
fn test_scaler_width_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let config = synthetic_config(dir.path(), 1);
    std::fs::write(
        &config.artifacts.feature_scaler,
        json!({ "kind": "standard", "mean": [0.0, 0.0, 0.0], "scale": [1.0, 1.0, 1.0] }).to_string(),
    )
    .unwrap();
    assert!(InferenceEngine::load(&config).is_err());
}

// ---------------------------------------------------------------------------
// Prediction behaviour
// ---------------------------------------------------------------------------

#[test]
fn test_predictions_are_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let engine = InferenceEngine::load(&synthetic_config(dir.path(), 1)).unwrap();

    let first = engine.predict_rows(&sample_rows()).unwrap();
    for _ in 0..10 {
        assert_eq!(engine.predict_rows(&sample_rows()).unwrap(), first);
    }
}

#[test]
fn test_concurrent_callers_see_identical_results() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(InferenceEngine::load(&synthetic_config(dir.path(), 1)).unwrap());
    let expected = engine.predict_rows(&sample_rows()).unwrap();

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.predict_rows(&sample_rows()).unwrap())
        })
        .collect();

    for w in workers {
        assert_eq!(w.join().unwrap(), expected);
    }
}

#[test]
fn test_bad_shapes_are_rejected_before_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let engine = InferenceEngine::load(&synthetic_config(dir.path(), 1)).unwrap();

    let err = engine.predict_rows(&sample_rows()[..2]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid shape: expected 3 days of features, got 2"
    );

    let mut rows = sample_rows();
    rows[2].pop();
    let err = engine.predict_rows(&rows).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid shape: day 3 must contain 5 features, got 4"
    );
}

#[test]
fn test_non_finite_input_is_numeric_failure() {
    let dir = tempfile::tempdir().unwrap();
    let engine = InferenceEngine::load(&synthetic_config(dir.path(), 1)).unwrap();

    let mut rows = sample_rows();
    rows[0][2] = f64::NAN;
    assert!(matches!(
        engine.predict_rows(&rows),
        Err(PredictionError::NumericFailure { .. })
    ));
    assert!(engine.predict_rows(&sample_rows()).is_ok(), "engine still serves after a failure");
}

#[test]
fn test_every_day_influences_the_prediction() {
    let dir = tempfile::tempdir().unwrap();
    let engine = InferenceEngine::load(&synthetic_config(dir.path(), 1)).unwrap();
    let base = engine.predict_rows(&sample_rows()).unwrap();

    for day in 0..3 {
        let mut rows = sample_rows();
        rows[day][0] += 3.0;
        let moved = engine.predict_rows(&rows).unwrap();
        assert_ne!(moved.raw, base.raw, "changing day {} had no effect", day + 1);
    }
}

#[test]
fn test_batch_matches_single_predictions() {
    let dir = tempfile::tempdir().unwrap();
    let engine = InferenceEngine::load(&synthetic_config(dir.path(), 1)).unwrap();
    let windows: Vec<FeatureWindow> = verify::REFERENCE_CASES.iter().map(|c| c.window()).collect();

    let batch = engine.predict_batch(&windows);
    for (window, result) in windows.iter().zip(batch) {
        assert_eq!(result.unwrap(), engine.predict(window).unwrap());
    }
}

// ---------------------------------------------------------------------------
// Hot reload
// ---------------------------------------------------------------------------

#[test]
fn test_reload_swaps_weights() {
    let dir = tempfile::tempdir().unwrap();
    let config = synthetic_config(dir.path(), 1);
    let handle = EngineHandle::new(InferenceEngine::load(&config).unwrap());
    let window = FeatureWindow::from_rows(&sample_rows()).unwrap();
    let before = handle.predict(&window).unwrap();

    write_state_dict(&config.artifacts.weights, 2);
    handle.reload(&config).expect("new weights load");

    assert_ne!(handle.predict(&window).unwrap(), before);
}

#[test]
fn test_failed_reload_keeps_serving_old_engine() {
    let dir = tempfile::tempdir().unwrap();
    let config = synthetic_config(dir.path(), 1);
    let handle = EngineHandle::new(InferenceEngine::load(&config).unwrap());
    let window = FeatureWindow::from_rows(&sample_rows()).unwrap();
    let before = handle.predict(&window).unwrap();

    std::fs::write(&config.artifacts.weights, b"not weights").unwrap();
    assert!(handle.reload(&config).is_err());
    assert_eq!(handle.predict(&window).unwrap(), before);
}

// ---------------------------------------------------------------------------
// Trained-weight regression
// ---------------------------------------------------------------------------

#[test]
#[ignore] // Requires the trained artifacts; paths come from .env
fn test_reference_weights_reproduce_known_levels() {
    let config = ServiceConfig::load_with_env(Path::new("./levelcast.toml"))
        .expect("config should load");
    let engine = InferenceEngine::load(&config).expect("trained artifacts should load");

    let first = engine.predict_rows(&sample_rows()).unwrap();
    println!("first reference window: {:.4}", first.value);
    assert!(
        (first.value - 104.56).abs() <= verify::DEFAULT_TOLERANCE,
        "expected ≈104.56, got {}",
        first.value
    );

    let report = verify::run_reference_check(&engine, verify::DEFAULT_TOLERANCE);
    verify::print_summary(&report);
    for result in &report.results {
        assert_eq!(
            result.status,
            VerificationStatus::Success,
            "{}: {:?}",
            result.label,
            result.error_message
        );
    }
}
