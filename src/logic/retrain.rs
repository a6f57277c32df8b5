//! Retrain Orchestrator
//!
//! Decides once per cycle whether retraining is warranted (cold start,
//! staleness, or detected drift), runs the training job on a worker thread
//! with a typed completion signal, and atomically publishes the resulting
//! snapshot: artifacts first, audit row second, active-handle swap last.
//! A failed run leaves the previous snapshot active.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::constants::DRIFT_WINDOW;

use super::model::{
    save_artifacts, train, write_drift_state, DriftState, TrainError, TrainInput, TrainOutcome,
    TrainReport,
};
use super::scoring::ClassifierService;
use super::store::{MetricRecord, SnapshotRecord, Store, StoreError};

// ============================================================================
// STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainState {
    Idle,
    Training,
    Published,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrainReason {
    /// No snapshot exists yet.
    ColdStart,
    /// Latest snapshot is older than the staleness window.
    Stale,
    /// Latest persisted metric reported drift.
    Drift,
}

/// What one orchestrator cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    NotNeeded,
    /// A training run is already in flight; the trigger is a no-op.
    AlreadyTraining,
    /// Corpus below the minimum size: explicit no-op, not a failure.
    SkippedInsufficientData { labeled_rows: usize },
    Published { version: String },
    Failed,
}

// ============================================================================
// TRAINING JOB
// ============================================================================

/// Seam for the training implementation, so orchestration is testable
/// without fitting a real model.
pub trait TrainRunner: Send + Sync {
    fn run(&self, input: TrainInput) -> Result<TrainOutcome, TrainError>;
}

pub struct DefaultTrainer;

impl TrainRunner for DefaultTrainer {
    fn run(&self, input: TrainInput) -> Result<TrainOutcome, TrainError> {
        train(input)
    }
}

/// A submitted training job: worker thread plus a typed await.
pub struct JobHandle {
    pub id: Uuid,
    handle: JoinHandle<Result<TrainOutcome, TrainError>>,
}

impl JobHandle {
    pub fn submit(runner: Arc<dyn TrainRunner>, input: TrainInput) -> Self {
        let id = Uuid::new_v4();
        let handle = std::thread::spawn(move || runner.run(input));
        Self { id, handle }
    }

    /// Block until the job finishes. A worker panic surfaces as a typed
    /// error instead of taking the pipeline down.
    pub fn wait(self) -> Result<TrainOutcome, TrainError> {
        match self.handle.join() {
            Ok(result) => result,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(TrainError::Panicked(msg))
            }
        }
    }
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct RetrainOrchestrator {
    state: Mutex<RetrainState>,
    runner: Arc<dyn TrainRunner>,
    models_dir: PathBuf,
    data_dir: PathBuf,
    staleness: Duration,
}

impl RetrainOrchestrator {
    pub fn new(data_dir: &Path, staleness_days: i64) -> Self {
        Self::with_runner(data_dir, staleness_days, Arc::new(DefaultTrainer))
    }

    pub fn with_runner(data_dir: &Path, staleness_days: i64, runner: Arc<dyn TrainRunner>) -> Self {
        Self {
            state: Mutex::new(RetrainState::Idle),
            runner,
            models_dir: data_dir.join("models"),
            data_dir: data_dir.to_path_buf(),
            staleness: Duration::days(staleness_days),
        }
    }

    pub fn state(&self) -> RetrainState {
        *self.state.lock()
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Decision policy, evaluated once per cycle. Any condition triggers.
    pub fn decide(
        &self,
        store: &Store,
        now: DateTime<Utc>,
    ) -> Result<Option<RetrainReason>, StoreError> {
        let latest = store.latest_snapshot()?;
        let latest = match latest {
            None => return Ok(Some(RetrainReason::ColdStart)),
            Some(snapshot) => snapshot,
        };

        if now - latest.trained_at > self.staleness {
            return Ok(Some(RetrainReason::Stale));
        }

        if let Some(metric) = store.latest_metric()? {
            if metric.drift_detected {
                return Ok(Some(RetrainReason::Drift));
            }
        }

        Ok(None)
    }

    /// One orchestration pass: decide, train, publish.
    pub fn run_cycle(
        &self,
        store: &Store,
        service: &ClassifierService,
    ) -> Result<CycleOutcome, StoreError> {
        let now = Utc::now();
        let reason = match self.decide(store, now)? {
            None => return Ok(CycleOutcome::NotNeeded),
            Some(reason) => reason,
        };

        {
            let mut state = self.state.lock();
            if *state == RetrainState::Training {
                return Ok(CycleOutcome::AlreadyTraining);
            }
            *state = RetrainState::Training;
        }

        let latest_version = store.latest_snapshot()?.map(|s| s.version);
        let input = TrainInput {
            corpus: store.labeled_corpus()?,
            recent_texts: store.recent_texts(DRIFT_WINDOW)?,
            version: next_version(latest_version.as_deref(), now),
        };

        let job = JobHandle::submit(self.runner.clone(), input);
        log::info!("Training job {} started (reason: {:?})", job.id, reason);

        match job.wait() {
            Ok(TrainOutcome::Trained(report)) => match self.publish(store, service, &report) {
                Ok(version) => {
                    *self.state.lock() = RetrainState::Published;
                    log::info!(
                        "Published model {} | accuracy={:.3}, drift_score={:.3}, drift_detected={}",
                        version,
                        report.accuracy,
                        report.drift_score,
                        report.drift_detected
                    );
                    Ok(CycleOutcome::Published { version })
                }
                Err(e) => {
                    *self.state.lock() = RetrainState::Failed;
                    log::error!("Model publish failed, previous snapshot stays active: {}", e);
                    Ok(CycleOutcome::Failed)
                }
            },
            Ok(TrainOutcome::Skipped { labeled_rows }) => {
                *self.state.lock() = RetrainState::Idle;
                log::info!(
                    "Training skipped: {} labeled rows is below the minimum",
                    labeled_rows
                );
                Ok(CycleOutcome::SkippedInsufficientData { labeled_rows })
            }
            Err(e) => {
                *self.state.lock() = RetrainState::Failed;
                log::error!("Training failed, previous snapshot stays active: {}", e);
                Ok(CycleOutcome::Failed)
            }
        }
    }

    /// Artifacts to disk first, audit row second, handle swap last. Nothing
    /// partially-written can ever become the active model.
    fn publish(
        &self,
        store: &Store,
        service: &ClassifierService,
        report: &TrainReport,
    ) -> Result<String, PublishError> {
        let snapshot = &report.snapshot;
        save_artifacts(snapshot, &self.models_dir).map_err(PublishError::Artifact)?;

        store
            .insert_snapshot(&SnapshotRecord {
                version: snapshot.version.clone(),
                accuracy: report.accuracy,
                drift_score: report.drift_score,
                drift_detected: report.drift_detected,
                trained_at: snapshot.trained_at,
            })
            .map_err(PublishError::Store)?;

        store
            .insert_metric(&MetricRecord {
                timestamp: snapshot.trained_at,
                model_version: snapshot.version.clone(),
                accuracy: Some(report.accuracy),
                drift_score: report.drift_score,
                drift_detected: report.drift_detected,
            })
            .map_err(PublishError::Store)?;

        if let Err(e) = write_drift_state(
            &self.data_dir,
            &DriftState {
                model_version: snapshot.version.clone(),
                accuracy: Some(report.accuracy),
                drift_score: report.drift_score,
                drift_detected: report.drift_detected,
                timestamp: snapshot.trained_at,
            },
        ) {
            log::warn!("Failed to write drift state: {}", e);
        }

        service.swap(Arc::new(snapshot.clone()));
        Ok(snapshot.version.clone())
    }
}

#[derive(Debug)]
enum PublishError {
    Artifact(super::model::ArtifactError),
    Store(StoreError),
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::Artifact(e) => write!(f, "artifact write: {}", e),
            PublishError::Store(e) => write!(f, "audit row: {}", e),
        }
    }
}

/// Timestamp-derived version with a strict-monotonicity guard: a retrain in
/// the same second (or after clock skew) extends the previous version so
/// lexicographic order stays strict.
fn next_version(latest: Option<&str>, now: DateTime<Utc>) -> String {
    let base = now.format("%Y%m%d-%H%M%S").to_string();
    match latest {
        Some(prev) if base.as_str() <= prev => format!("{}x", prev),
        _ => base,
    }
}

// ============================================================================
// TESTS
// ============================================================================
