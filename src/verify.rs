//! Reference Case Verification
//!
//! Runs the engine against labelled windows from the training evaluation and
//! reports how far each prediction lands from its expected level.
//!
//! Use this after swapping in new weights or scalers to confirm the loaded
//! artifacts still reproduce known outputs.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::engine::InferenceEngine;
use crate::model::{DAYS, FEATURES, FeatureWindow};

/// Default allowed absolute error, in metres.
pub const DEFAULT_TOLERANCE: f64 = 1.0;

// ============================================================================
// Reference Cases
// ============================================================================

pub struct ReferenceCase {
    pub label: &'static str,
    pub days: [[f64; FEATURES]; DAYS],
    pub expected: f64,
}

impl ReferenceCase {
    pub fn window(&self) -> FeatureWindow {
        FeatureWindow::new(self.days)
    }
}

pub static REFERENCE_CASES: &[ReferenceCase] = &[
    ReferenceCase {
        label: "moderate_rise",
        days: [
            [104.42, 193.0, 186.0, 238.0, 12.8],
            [105.49, 568.0, 424.0, 343.0, 9.28],
            [104.75, 288.0, 292.0, 171.0, 7.93],
        ],
        expected: 104.56,
    },
    ReferenceCase {
        label: "flood_recession",
        days: [
            [107.42, 1660.0, 1620.0, 1180.0, 39.6],
            [106.79, 1250.0, 1240.0, 784.0, 31.6],
            [105.78, 700.0, 767.0, 484.0, 26.9],
        ],
        expected: 105.84,
    },
    ReferenceCase {
        label: "low_flow",
        days: [
            [103.93, 84.9, 85.7, 33.6, 5.34],
            [103.91, 81.1, 80.3, 33.9, 5.39],
            [103.9, 79.2, 79.3, 38.7, 5.98],
        ],
        expected: 104.0,
    },
];

// ============================================================================
// Verification Results
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub timestamp: String,
    pub tolerance: f64,
    pub results: Vec<CaseVerification>,
    pub summary: VerificationSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub max_abs_error: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseVerification {
    pub label: String,
    pub status: VerificationStatus,
    pub expected: f64,
    pub predicted: Option<f64>,
    pub abs_error: Option<f64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum VerificationStatus {
    Success,
    Failed,
}

impl VerificationReport {
    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0
    }
}

// ============================================================================
// Case Verification
// ============================================================================

pub fn verify_case(
    engine: &InferenceEngine,
    label: &str,
    window: &FeatureWindow,
    expected: f64,
    tolerance: f64,
) -> CaseVerification {
    let mut result = CaseVerification {
        label: label.to_string(),
        status: VerificationStatus::Failed,
        expected,
        predicted: None,
        abs_error: None,
        error_message: None,
    };

    match engine.predict(window) {
        Ok(prediction) => {
            let abs_error = (prediction.value - expected).abs();
            result.predicted = Some(prediction.display_value);
            result.abs_error = Some(abs_error);
            if abs_error <= tolerance {
                result.status = VerificationStatus::Success;
            } else {
                result.error_message = Some(format!(
                    "off by {:.3} m (tolerance {:.3} m)",
                    abs_error, tolerance
                ));
            }
        }
        Err(e) => {
            result.error_message = Some(format!("Prediction failed: {}", e));
        }
    }

    result
}

// ============================================================================
// Full Verification Runner
// ============================================================================

pub fn run_reference_check(engine: &InferenceEngine, tolerance: f64) -> VerificationReport {
    run_cases(engine, REFERENCE_CASES, tolerance)
}

pub fn run_cases(
    engine: &InferenceEngine,
    cases: &[ReferenceCase],
    tolerance: f64,
) -> VerificationReport {
    let mut report = VerificationReport {
        timestamp: Utc::now().to_rfc3339(),
        tolerance,
        results: Vec::new(),
        summary: VerificationSummary {
            total: cases.len(),
            passed: 0,
            failed: 0,
            max_abs_error: None,
        },
    };

    for case in cases {
        let result = verify_case(engine, case.label, &case.window(), case.expected, tolerance);

        match result.status {
            VerificationStatus::Success => report.summary.passed += 1,
            VerificationStatus::Failed => report.summary.failed += 1,
        }
        if let Some(err) = result.abs_error {
            let worst = report.summary.max_abs_error.unwrap_or(0.0);
            report.summary.max_abs_error = Some(worst.max(err));
        }

        report.results.push(result);
    }

    crate::logging::log_batch_summary(
        crate::logging::Component::Model,
        report.summary.total,
        report.summary.passed,
        report.summary.failed,
    );

    report
}

pub fn print_summary(report: &VerificationReport) {
    println!("\nReference check ({})", report.timestamp);
    println!("═══════════════════════════════════════════════════════════");

    for result in &report.results {
        let predicted = result
            .predicted
            .map(|p| format!("{:.2}", p))
            .unwrap_or_else(|| "-".to_string());
        let mark = match result.status {
            VerificationStatus::Success => "✓",
            VerificationStatus::Failed => "✗",
        };
        println!(
            "  {} {:<16} expected {:>7.2}  predicted {:>7}",
            mark, result.label, result.expected, predicted
        );
        if let Some(msg) = &result.error_message {
            println!("      {}", msg);
        }
    }

    println!("\n  Passed: {}/{}", report.summary.passed, report.summary.total);
    if let Some(worst) = report.summary.max_abs_error {
        println!("  Max abs error: {:.3} m (tolerance {:.3} m)", worst, report.tolerance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lstm::{Architecture, GATES, Linear, LstmLayer, SequenceModel};
    use crate::normalize::{AffineScaler, FeatureNormalizer};
    use ndarray::{Array1, Array2};

    /// All-zero weights make the model emit 0, so every prediction is the
    /// target scaler's center.
    fn constant_engine(level: f64) -> InferenceEngine {
        let arch = Architecture::REFERENCE;
        let g = GATES * arch.hidden_size;
        let layers = (0..arch.num_layers)
            .map(|k| {
                LstmLayer::new(
                    Array2::zeros((g, arch.layer_input_size(k))),
                    Array2::zeros((g, arch.hidden_size)),
                    Array1::zeros(g),
                    Array1::zeros(g),
                )
                .unwrap()
            })
            .collect();
        let head = Linear::new(Array2::zeros((1, arch.hidden_size)), Array1::zeros(1)).unwrap();
        let model = SequenceModel::new(layers, head, &arch).unwrap();
        let normalizer = FeatureNormalizer::new(
            AffineScaler::new(vec![100.0, 500.0, 500.0, 400.0, 15.0], vec![2.0, 400.0, 400.0, 300.0, 10.0])
                .unwrap(),
            AffineScaler::new(vec![level], vec![1.0]).unwrap(),
        )
        .unwrap();
        InferenceEngine::new(normalizer, model, 2).unwrap()
    }

    #[test]
    fn test_reference_cases_are_well_formed() {
        assert_eq!(REFERENCE_CASES.len(), 3);
        for case in REFERENCE_CASES {
            for day in &case.days {
                assert!(day.iter().all(|v| v.is_finite()), "{} has a non-finite value", case.label);
            }
        }
    }

    #[test]
    fn test_case_within_tolerance_passes() {
        let engine = constant_engine(104.5);
        let case = &REFERENCE_CASES[0];
        let result = verify_case(&engine, case.label, &case.window(), case.expected, 0.1);

        assert_eq!(result.status, VerificationStatus::Success);
        assert_eq!(result.predicted, Some(104.5));
        assert!((result.abs_error.unwrap() - 0.06).abs() < 1e-9);
        assert!(result.error_message.is_none());
    }

    #[test]
    fn test_case_outside_tolerance_fails_with_message() {
        let engine = constant_engine(110.0);
        let case = &REFERENCE_CASES[2];
        let result = verify_case(&engine, case.label, &case.window(), case.expected, 1.0);

        assert_eq!(result.status, VerificationStatus::Failed);
        assert!(result.error_message.unwrap().contains("off by 6.000 m"));
    }

    #[test]
    fn test_report_counts_and_worst_error() {
        // 0.34, 0.94 and 0.90 away from the three expected levels.
        let engine = constant_engine(104.9);
        let report = run_reference_check(&engine, DEFAULT_TOLERANCE);

        assert_eq!(report.summary.total, 3);
        assert_eq!(report.summary.passed, 3);
        assert!(report.all_passed());
        let worst = report.summary.max_abs_error.unwrap();
        assert!((worst - 0.94).abs() < 1e-9, "worst was {}", worst);
        assert!(chrono::DateTime::parse_from_rfc3339(&report.timestamp).is_ok());
    }

    #[test]
    fn test_prediction_error_marks_case_failed() {
        let engine = constant_engine(104.0);
        let mut days = REFERENCE_CASES[0].days;
        days[1][3] = f64::NAN;
        let result = verify_case(&engine, "nan", &FeatureWindow::new(days), 104.0, 1.0);

        assert_eq!(result.status, VerificationStatus::Failed);
        assert!(result.predicted.is_none());
        assert!(result.error_message.unwrap().starts_with("Prediction failed"));
    }
}
