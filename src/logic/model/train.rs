//! Training Job
//!
//! A synchronous, isolated unit of work: takes the labeled incident corpus,
//! fits the feature transform, the priority classifier and the outlier
//! model, and reports training accuracy plus a train-time drift reading
//! over the most recent texts. Never touches the store or the active model.

use chrono::Utc;

use crate::constants::MIN_TRAINING_ROWS;
use crate::logic::store::Priority;

use super::bayes::MultinomialNb;
use super::features::{HashedTfIdf, FEATURE_DIM};
use super::outlier::CentroidOutlier;
use super::snapshot::ModelSnapshot;

/// Train-time drift threshold over the recent-text window.
pub const TRAIN_DRIFT_THRESHOLD: f64 = 0.45;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone)]
pub struct TrainInput {
    /// Labeled (text, priority) pairs.
    pub corpus: Vec<(String, Priority)>,
    /// Most recent incident texts, for the train-time drift reading.
    pub recent_texts: Vec<String>,
    /// Version assigned to the resulting snapshot.
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct TrainReport {
    pub snapshot: ModelSnapshot,
    /// Train-set accuracy of the fitted classifier.
    pub accuracy: f64,
    pub drift_score: f64,
    pub drift_detected: bool,
}

#[derive(Debug, Clone)]
pub enum TrainOutcome {
    Trained(Box<TrainReport>),
    /// Corpus below the minimum size: an explicit no-op, not a failure.
    Skipped { labeled_rows: usize },
}

#[derive(Debug)]
pub enum TrainError {
    /// The fit itself failed.
    Internal(String),
    /// The worker thread died.
    Panicked(String),
}

impl std::fmt::Display for TrainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainError::Internal(msg) => write!(f, "Training failed: {}", msg),
            TrainError::Panicked(msg) => write!(f, "Training worker panicked: {}", msg),
        }
    }
}

impl std::error::Error for TrainError {}

// ============================================================================
// TRAINING
// ============================================================================

pub fn train(input: TrainInput) -> Result<TrainOutcome, TrainError> {
    if input.corpus.len() < MIN_TRAINING_ROWS {
        return Ok(TrainOutcome::Skipped {
            labeled_rows: input.corpus.len(),
        });
    }

    let texts: Vec<&str> = input.corpus.iter().map(|(t, _)| t.as_str()).collect();
    let features = HashedTfIdf::fit(&texts, FEATURE_DIM);
    let x: Vec<_> = texts.iter().map(|t| features.transform(t)).collect();

    // Stable label ordering: most severe first, only tiers present in data.
    let present: Vec<Priority> = Priority::descending()
        .into_iter()
        .filter(|p| input.corpus.iter().any(|(_, l)| l == p))
        .collect();
    let labels: Vec<String> = present.iter().map(|p| p.as_str().to_string()).collect();
    let y: Vec<usize> = input
        .corpus
        .iter()
        .map(|(_, l)| {
            present
                .iter()
                .position(|p| p == l)
                .ok_or_else(|| TrainError::Internal(format!("label {:?} missing", l)))
        })
        .collect::<Result<_, _>>()?;

    let classifier = MultinomialNb::fit(&labels, &x, &y);
    if classifier.labels().is_empty() {
        return Err(TrainError::Internal("classifier fitted no classes".to_string()));
    }

    let correct = x
        .iter()
        .zip(&y)
        .filter(|(xi, &yi)| {
            classifier
                .predict(xi.view())
                .map(|(label, _)| label == labels[yi])
                .unwrap_or(false)
        })
        .count();
    let accuracy = correct as f64 / x.len() as f64;

    let outlier = CentroidOutlier::fit(&x);

    let (drift_score, drift_detected) = train_drift(&features, &outlier, &input.recent_texts);

    let snapshot = ModelSnapshot {
        version: input.version,
        trained_at: Utc::now(),
        features,
        classifier,
        outlier,
    };

    Ok(TrainOutcome::Trained(Box::new(TrainReport {
        snapshot,
        accuracy,
        drift_score,
        drift_detected,
    })))
}

/// Mean outlier score of the recent window against the freshly fitted model.
fn train_drift(
    features: &HashedTfIdf,
    outlier: &CentroidOutlier,
    recent_texts: &[String],
) -> (f64, bool) {
    if recent_texts.is_empty() {
        return (0.0, false);
    }
    let sum: f64 = recent_texts
        .iter()
        .map(|t| outlier.score(features.transform(t).view()))
        .sum();
    let score = (sum / recent_texts.len() as f64).clamp(0.0, 1.0);
    (score, score >= TRAIN_DRIFT_THRESHOLD)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<(String, Priority)> {
        vec![
            ("ransomware encrypts hospital files".to_string(), Priority::Critical),
            ("new exploit actively used in the wild".to_string(), Priority::Critical),
            ("phishing campaign targets banks".to_string(), Priority::High),
            ("data breach exposes customer records".to_string(), Priority::High),
            ("routine patch notes published".to_string(), Priority::Low),
            ("minor update for desktop client".to_string(), Priority::Low),
        ]
    }

    #[test]
    fn test_small_corpus_is_skipped() {
        let input = TrainInput {
            corpus: corpus().into_iter().take(3).collect(),
            recent_texts: vec![],
            version: "v1".to_string(),
        };
        match train(input).unwrap() {
            TrainOutcome::Skipped { labeled_rows } => assert_eq!(labeled_rows, 3),
            TrainOutcome::Trained(_) => panic!("expected skip"),
        }
    }

    #[test]
    fn test_training_produces_usable_snapshot() {
        let input = TrainInput {
            corpus: corpus(),
            recent_texts: vec!["routine patch advisory".to_string()],
            version: "20240101-000000".to_string(),
        };
        let report = match train(input).unwrap() {
            TrainOutcome::Trained(report) => report,
            TrainOutcome::Skipped { .. } => panic!("expected training"),
        };

        assert_eq!(report.snapshot.version, "20240101-000000");
        assert!((0.0..=1.0).contains(&report.accuracy));
        assert!((0.0..=1.0).contains(&report.drift_score));

        let result = report.snapshot.score("ransomware hits hospital network").unwrap();
        assert_eq!(result.label, "CRITICAL");
    }

    #[test]
    fn test_train_drift_empty_window_is_zero() {
        let input = TrainInput {
            corpus: corpus(),
            recent_texts: vec![],
            version: "v1".to_string(),
        };
        match train(input).unwrap() {
            TrainOutcome::Trained(report) => {
                assert_eq!(report.drift_score, 0.0);
                assert!(!report.drift_detected);
            }
            TrainOutcome::Skipped { .. } => panic!("expected training"),
        }
    }
}
