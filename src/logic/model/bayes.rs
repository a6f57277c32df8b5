//! Multinomial Naive Bayes Classifier
//!
//! Multi-class predictor over TF-IDF vectors with Laplace smoothing.
//! Trained in-process; small enough to refit every retraining cycle.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

const ALPHA: f64 = 1.0; // Laplace smoothing

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultinomialNb {
    labels: Vec<String>,
    log_prior: Vec<f64>,
    /// Per-class feature log-likelihoods, indexed [class][feature].
    feature_log_prob: Vec<Vec<f64>>,
}

impl MultinomialNb {
    /// Fit from feature vectors and their label indices into `labels`.
    ///
    /// Labels with no samples are dropped from the fitted label set.
    pub fn fit(labels: &[String], x: &[Array1<f64>], y: &[usize]) -> Self {
        let dim = x.first().map(|v| v.len()).unwrap_or(0);
        let n = x.len() as f64;

        let mut kept_labels = Vec::new();
        let mut log_prior = Vec::new();
        let mut feature_log_prob = Vec::new();

        for (class_idx, label) in labels.iter().enumerate() {
            let members: Vec<&Array1<f64>> = x
                .iter()
                .zip(y)
                .filter(|(_, &yi)| yi == class_idx)
                .map(|(xi, _)| xi)
                .collect();
            if members.is_empty() {
                continue;
            }

            let mut counts = Array1::<f64>::zeros(dim);
            for v in &members {
                counts += *v;
            }
            let total: f64 = counts.sum();
            let denom = (total + ALPHA * dim as f64).ln();
            let log_prob = counts.iter().map(|&c| (c + ALPHA).ln() - denom).collect();

            kept_labels.push(label.clone());
            log_prior.push((members.len() as f64 / n).ln());
            feature_log_prob.push(log_prob);
        }

        Self {
            labels: kept_labels,
            log_prior,
            feature_log_prob,
        }
    }

    /// Posterior distribution over the label set for one vector.
    pub fn predict_proba(&self, x: ArrayView1<f64>) -> Vec<(String, f64)> {
        if self.labels.is_empty() {
            return Vec::new();
        }

        let mut scores: Vec<f64> = self
            .feature_log_prob
            .iter()
            .zip(&self.log_prior)
            .map(|(log_prob, prior)| {
                let ll: f64 = x.iter().zip(log_prob).map(|(&xi, &lp)| xi * lp).sum();
                prior + ll
            })
            .collect();

        // Softmax in log space
        let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for s in scores.iter_mut() {
            *s = (*s - max).exp();
            sum += *s;
        }

        self.labels
            .iter()
            .zip(&scores)
            .map(|(label, &s)| (label.clone(), s / sum))
            .collect()
    }

    /// Most likely label and its probability.
    pub fn predict(&self, x: ArrayView1<f64>) -> Option<(String, f64)> {
        self.predict_proba(x)
            .into_iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}
