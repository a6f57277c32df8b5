//! Drift Monitor
//!
//! Evaluates the classifier's recent confidence signal against a robust
//! reference band and reports the fraction of the window that falls
//! outside it. Every evaluation, drift-triggering or not, is recorded as
//! one metrics row and mirrored into the drift-state file.

use std::path::Path;

use chrono::Utc;

use crate::constants::{DRIFT_MIN_SAMPLES, DRIFT_THRESHOLD, DRIFT_WINDOW};

use super::model::{write_drift_state, DriftState};
use super::store::{MetricRecord, Store, StoreError};

/// Smallest band half-width. Keeps a near-constant window (MAD ~ 0) from
/// flagging harmless jitter as outliers.
const BAND_FLOOR: f64 = 0.05;

/// Outcome of one drift evaluation.
#[derive(Debug, Clone, Copy)]
pub struct DriftEvaluation {
    /// Fraction of the window outside the reference band, in [0, 1].
    pub drift_score: f64,
    pub drift_detected: bool,
    pub sample_count: usize,
}

pub struct DriftMonitor {
    window: usize,
    min_samples: usize,
    threshold: f64,
}

impl Default for DriftMonitor {
    fn default() -> Self {
        Self {
            window: DRIFT_WINDOW,
            min_samples: DRIFT_MIN_SAMPLES,
            threshold: DRIFT_THRESHOLD,
        }
    }
}

impl DriftMonitor {
    #[cfg(test)]
    fn with_thresholds(min_samples: usize, threshold: f64) -> Self {
        Self {
            window: DRIFT_WINDOW,
            min_samples,
            threshold,
        }
    }

    /// Pure evaluation over an ordered score sequence (newest first or
    /// oldest first; the band is order-independent).
    ///
    /// Below `min_samples` the result is the explicit insufficient-data
    /// no-op: `(0.0, false)`, not an error.
    pub fn evaluate(&self, recent: &[f64]) -> DriftEvaluation {
        if recent.len() < self.min_samples {
            return DriftEvaluation {
                drift_score: 0.0,
                drift_detected: false,
                sample_count: recent.len(),
            };
        }

        let med = median(recent);
        let deviations: Vec<f64> = recent.iter().map(|v| (v - med).abs()).collect();
        let mad = median(&deviations);
        let band = (3.0 * mad).max(BAND_FLOOR);

        let outliers = deviations.iter().filter(|&&d| d > band).count();
        let drift_score = (outliers as f64 / recent.len() as f64).clamp(0.0, 1.0);

        DriftEvaluation {
            drift_score,
            drift_detected: drift_score > self.threshold,
            sample_count: recent.len(),
        }
    }

    /// Evaluate the store's recent window and persist the audit trail.
    pub fn run(
        &self,
        store: &Store,
        data_dir: &Path,
        active_version: Option<&str>,
    ) -> Result<DriftEvaluation, StoreError> {
        let recent = store.recent_useful_scores(self.window)?;
        let eval = self.evaluate(&recent);
        let version = active_version.unwrap_or("none").to_string();

        if eval.drift_detected {
            log::warn!(
                "Drift detected: {:.1}% of last {} scores outside band (model {})",
                eval.drift_score * 100.0,
                eval.sample_count,
                version
            );
        } else {
            log::debug!(
                "Drift check: score {:.3} over {} samples (model {})",
                eval.drift_score,
                eval.sample_count,
                version
            );
        }

        let now = Utc::now();
        store.insert_metric(&MetricRecord {
            timestamp: now,
            model_version: version.clone(),
            accuracy: None,
            drift_score: eval.drift_score,
            drift_detected: eval.drift_detected,
        })?;

        if let Err(e) = write_drift_state(
            data_dir,
            &DriftState {
                model_version: version,
                accuracy: None,
                drift_score: eval.drift_score,
                drift_detected: eval.drift_detected,
                timestamp: now,
            },
        ) {
            log::warn!("Failed to write drift state: {}", e);
        }

        Ok(eval)
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_insufficient_samples_is_noop() {
        let monitor = DriftMonitor::default();
        let eval = monitor.evaluate(&[0.9; 10]);
        assert_eq!(eval.drift_score, 0.0);
        assert!(!eval.drift_detected);
        assert_eq!(eval.sample_count, 10);
    }

    #[test]
    fn test_injected_outliers_trigger_drift() {
        // 120 scores in a tight cluster, 80 far away: 40% outliers.
        let mut scores = vec![0.9; 120];
        scores.extend(vec![0.1; 80]);

        let monitor = DriftMonitor::default();
        let eval = monitor.evaluate(&scores);
        assert!((eval.drift_score - 0.4).abs() < 1e-9);
        assert!(eval.drift_detected);
    }

    #[test]
    fn test_tight_cluster_is_stable() {
        let scores: Vec<f64> = (0..200).map(|i| 0.8 + 0.01 * ((i % 3) as f64)).collect();
        let monitor = DriftMonitor::default();
        let eval = monitor.evaluate(&scores);
        assert_eq!(eval.drift_score, 0.0);
        assert!(!eval.drift_detected);
    }

    #[test]
    fn test_fraction_below_threshold_not_detected() {
        // 20% outliers stays under the 0.35 threshold.
        let mut scores = vec![0.9; 160];
        scores.extend(vec![0.1; 40]);
        let monitor = DriftMonitor::default();
        let eval = monitor.evaluate(&scores);
        assert!((eval.drift_score - 0.2).abs() < 1e-9);
        assert!(!eval.drift_detected);
    }

    #[test]
    fn test_run_records_metric_and_state() {
        let store = Store::open_in_memory().unwrap();
        let dir = TempDir::new().unwrap();

        let monitor = DriftMonitor::with_thresholds(1, 0.35);
        // Empty window: the no-op guard still records the audit trail.
        let eval = monitor.run(&store, dir.path(), Some("v1")).unwrap();
        assert_eq!(eval.sample_count, 0);

        let metric = store.latest_metric().unwrap().unwrap();
        assert_eq!(metric.model_version, "v1");
        assert!(!metric.drift_detected);

        let state = crate::logic::model::read_drift_state(dir.path()).unwrap();
        assert_eq!(state.model_version, "v1");
    }
}
