//! Hashed TF-IDF Feature Transform
//!
//! Maps advisory text into a fixed-dimension vector: tokens are bucketed by
//! FNV-1a (stable across processes, so artifacts stay loadable), weighted by
//! an IDF vector fitted at training time, and L2-normalized.

use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Default feature dimension.
pub const FEATURE_DIM: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashedTfIdf {
    dim: usize,
    idf: Vec<f64>,
}

impl HashedTfIdf {
    /// Fit IDF weights over a corpus.
    pub fn fit<S: AsRef<str>>(texts: &[S], dim: usize) -> Self {
        let mut doc_freq = vec![0u32; dim];
        for text in texts {
            let mut seen = vec![false; dim];
            for token in tokenize(text.as_ref()) {
                let bucket = (fnv1a(&token) % dim as u64) as usize;
                if !seen[bucket] {
                    seen[bucket] = true;
                    doc_freq[bucket] += 1;
                }
            }
        }

        let n = texts.len() as f64;
        let idf = doc_freq
            .iter()
            .map(|&df| ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0)
            .collect();

        Self { dim, idf }
    }

    /// Transform one text into a dense TF-IDF vector.
    pub fn transform(&self, text: &str) -> Array1<f64> {
        let mut vec = Array1::<f64>::zeros(self.dim);
        for token in tokenize(text) {
            let bucket = (fnv1a(&token) % self.dim as u64) as usize;
            vec[bucket] += 1.0;
        }

        for (i, v) in vec.iter_mut().enumerate() {
            *v *= self.idf[i];
        }

        let norm = vec.dot(&vec).sqrt();
        if norm > 0.0 {
            vec.mapv_inplace(|v| v / norm);
        }
        vec
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

/// Lowercase alphanumeric runs, single characters dropped.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_string())
        .collect()
}

/// FNV-1a: deterministic token hashing, unlike `DefaultHasher`.
fn fnv1a(token: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}
