//! Model Snapshot & Artifact Persistence
//!
//! A snapshot binds the feature transform, classifier and outlier model
//! into one immutable, versioned unit. Artifacts are published to disk as a
//! checksummed triple under `models/<version>/`; the directory rename is the
//! atomic publish point, and the SHA-256 manifest rejects torn or tampered
//! artifact sets at load time.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::bayes::MultinomialNb;
use super::features::HashedTfIdf;
use super::outlier::CentroidOutlier;

const FEATURES_FILE: &str = "features.json";
const CLASSIFIER_FILE: &str = "classifier.json";
const OUTLIER_FILE: &str = "outlier.json";
const MANIFEST_FILE: &str = "manifest.json";
const DRIFT_STATE_FILE: &str = "drift_state.json";

// ============================================================================
// SNAPSHOT
// ============================================================================

/// One immutable trained-model generation. Never mutated after creation;
/// the scoring service swaps whole snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub features: HashedTfIdf,
    pub classifier: MultinomialNb,
    pub outlier: CentroidOutlier,
}

/// Output of scoring one text against a snapshot.
#[derive(Debug, Clone)]
pub struct ScoreResult {
    /// Most likely label from the model's label set.
    pub label: String,
    /// Full posterior distribution.
    pub proba: Vec<(String, f64)>,
    /// Probability of the winning label.
    pub confidence: f64,
    /// Novelty score in [0, 1].
    pub anomaly_score: f64,
}

impl ModelSnapshot {
    /// Pure scoring: no shared state is touched, so concurrent calls against
    /// the same snapshot are always safe.
    pub fn score(&self, text: &str) -> Option<ScoreResult> {
        let vec = self.features.transform(text);
        let proba = self.classifier.predict_proba(vec.view());
        let (label, confidence) = proba
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(l, p)| (l.clone(), *p))?;
        let anomaly_score = self.outlier.score(vec.view());

        Some(ScoreResult {
            label,
            proba,
            confidence,
            anomaly_score,
        })
    }
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug)]
pub enum ArtifactError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    ChecksumMismatch { file: String },
    MissingFile { file: String },
}

impl std::fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactError::Io(e) => write!(f, "IO error: {}", e),
            ArtifactError::Serialization(e) => write!(f, "Serialization error: {}", e),
            ArtifactError::ChecksumMismatch { file } => {
                write!(f, "Checksum mismatch for artifact '{}'", file)
            }
            ArtifactError::MissingFile { file } => {
                write!(f, "Artifact set is missing '{}'", file)
            }
        }
    }
}

impl std::error::Error for ArtifactError {}

impl From<std::io::Error> for ArtifactError {
    fn from(err: std::io::Error) -> Self {
        ArtifactError::Io(err)
    }
}

impl From<serde_json::Error> for ArtifactError {
    fn from(err: serde_json::Error) -> Self {
        ArtifactError::Serialization(err)
    }
}

// ============================================================================
// MANIFEST
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Manifest {
    version: String,
    trained_at: DateTime<Utc>,
    files: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    name: String,
    sha256: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ============================================================================
// SAVE / LOAD
// ============================================================================

/// Persist a snapshot's artifact triple. Files are written into a temp
/// directory first and published with a single rename, so a crash mid-write
/// never leaves a loadable-but-partial version behind.
pub fn save_artifacts(snapshot: &ModelSnapshot, models_dir: &Path) -> Result<PathBuf, ArtifactError> {
    fs::create_dir_all(models_dir)?;
    let tmp_dir = models_dir.join(format!(".tmp-{}", snapshot.version));
    if tmp_dir.exists() {
        fs::remove_dir_all(&tmp_dir)?;
    }
    fs::create_dir_all(&tmp_dir)?;

    let parts: [(&str, Vec<u8>); 3] = [
        (FEATURES_FILE, serde_json::to_vec(&snapshot.features)?),
        (CLASSIFIER_FILE, serde_json::to_vec(&snapshot.classifier)?),
        (OUTLIER_FILE, serde_json::to_vec(&snapshot.outlier)?),
    ];

    let mut entries = Vec::new();
    for (name, bytes) in &parts {
        fs::write(tmp_dir.join(name), bytes)?;
        entries.push(ManifestEntry {
            name: name.to_string(),
            sha256: sha256_hex(bytes),
        });
    }

    let manifest = Manifest {
        version: snapshot.version.clone(),
        trained_at: snapshot.trained_at,
        files: entries,
    };
    fs::write(tmp_dir.join(MANIFEST_FILE), serde_json::to_vec_pretty(&manifest)?)?;

    let final_dir = models_dir.join(&snapshot.version);
    if final_dir.exists() {
        fs::remove_dir_all(&final_dir)?;
    }
    fs::rename(&tmp_dir, &final_dir)?;
    Ok(final_dir)
}

/// Load a consistent artifact triple for one version, verifying every file
/// against the manifest checksums.
pub fn load_artifacts(models_dir: &Path, version: &str) -> Result<ModelSnapshot, ArtifactError> {
    let dir = models_dir.join(version);
    let manifest_bytes =
        fs::read(dir.join(MANIFEST_FILE)).map_err(|_| ArtifactError::MissingFile {
            file: MANIFEST_FILE.to_string(),
        })?;
    let manifest: Manifest = serde_json::from_slice(&manifest_bytes)?;

    let mut features = None;
    let mut classifier = None;
    let mut outlier = None;

    for entry in &manifest.files {
        let bytes = fs::read(dir.join(&entry.name)).map_err(|_| ArtifactError::MissingFile {
            file: entry.name.clone(),
        })?;
        if sha256_hex(&bytes) != entry.sha256 {
            return Err(ArtifactError::ChecksumMismatch {
                file: entry.name.clone(),
            });
        }
        match entry.name.as_str() {
            FEATURES_FILE => features = Some(serde_json::from_slice(&bytes)?),
            CLASSIFIER_FILE => classifier = Some(serde_json::from_slice(&bytes)?),
            OUTLIER_FILE => outlier = Some(serde_json::from_slice(&bytes)?),
            other => log::debug!("Ignoring unknown artifact entry '{}'", other),
        }
    }

    let require = |name: &str| ArtifactError::MissingFile {
        file: name.to_string(),
    };

    Ok(ModelSnapshot {
        version: manifest.version,
        trained_at: manifest.trained_at,
        features: features.ok_or_else(|| require(FEATURES_FILE))?,
        classifier: classifier.ok_or_else(|| require(CLASSIFIER_FILE))?,
        outlier: outlier.ok_or_else(|| require(OUTLIER_FILE))?,
    })
}

// ============================================================================
// DRIFT STATE RECORD
// ============================================================================

/// Small persisted status structure readable by external reporting layers.
/// Rewritten once per training run and once per drift evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftState {
    pub model_version: String,
    pub accuracy: Option<f64>,
    pub drift_score: f64,
    pub drift_detected: bool,
    pub timestamp: DateTime<Utc>,
}

pub fn write_drift_state(data_dir: &Path, state: &DriftState) -> Result<(), ArtifactError> {
    fs::create_dir_all(data_dir)?;
    let bytes = serde_json::to_vec_pretty(state)?;
    fs::write(data_dir.join(DRIFT_STATE_FILE), bytes)?;
    Ok(())
}

pub fn read_drift_state(data_dir: &Path) -> Option<DriftState> {
    let bytes = fs::read(data_dir.join(DRIFT_STATE_FILE)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

// ============================================================================
// TESTS
// ============================================================================
