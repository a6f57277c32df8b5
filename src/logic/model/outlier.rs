//! Centroid-Distance Outlier Model
//!
//! Unsupervised novelty scorer: distance from the training centroid,
//! normalized against the training distance distribution. Scores land in
//! [0, 1], higher = more abnormal.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

const MIN_STD: f64 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidOutlier {
    centroid: Vec<f64>,
    mean_dist: f64,
    std_dist: f64,
}

impl CentroidOutlier {
    pub fn fit(x: &[Array1<f64>]) -> Self {
        let dim = x.first().map(|v| v.len()).unwrap_or(0);
        let n = x.len().max(1) as f64;

        let mut centroid = Array1::<f64>::zeros(dim);
        for v in x {
            centroid += v;
        }
        centroid.mapv_inplace(|v| v / n);

        let dists: Vec<f64> = x.iter().map(|v| euclidean(v.view(), centroid.view())).collect();
        let mean_dist = dists.iter().sum::<f64>() / n;
        let var = dists.iter().map(|d| (d - mean_dist).powi(2)).sum::<f64>() / n;

        Self {
            centroid: centroid.to_vec(),
            mean_dist,
            std_dist: var.sqrt(),
        }
    }

    /// Anomaly score in [0, 1]: z-score of the centroid distance, scaled so
    /// three standard deviations saturate the scale.
    pub fn score(&self, x: ArrayView1<f64>) -> f64 {
        let centroid = ArrayView1::from(&self.centroid);
        let dist = euclidean(x, centroid);
        let z = (dist - self.mean_dist) / self.std_dist.max(MIN_STD);
        (z / 3.0).clamp(0.0, 1.0)
    }
}

fn euclidean(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}
