//! Pipeline Cycle Driver
//!
//! One recurring cycle drives the components in a fixed order:
//! ingest → score → drift check → retrain decision → retention purge.
//! Purge always runs after scoring so it can never race the batch that is
//! about to label a row. No step failure terminates the loop; the loop's
//! job is to keep running and retry on the next interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;

use super::config::PipelineConfig;
use super::drift::{DriftEvaluation, DriftMonitor};
use super::ingest::{FeedFetch, HttpFetcher, IngestReport, Ingestor};
use super::model::load_artifacts;
use super::retrain::{CycleOutcome, RetrainOrchestrator};
use super::scoring::{ClassifierService, ScoreSummary};
use super::sources::{self, FeedSource};
use super::store::{Store, StoreError};

/// Shutdown flag, set from the signal handler. Checked between cycles and
/// between sleep slices, never mid-operation.
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

const SLEEP_SLICE: Duration = Duration::from_millis(500);

pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::SeqCst);
    log::info!("Shutdown requested; finishing current cycle");
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

// ============================================================================
// PIPELINE
// ============================================================================

/// What one full cycle did, for logging and tests.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub ingest: Option<IngestReport>,
    pub scoring: Option<ScoreSummary>,
    pub drift: Option<DriftEvaluation>,
    pub retrain: Option<CycleOutcome>,
    pub purged: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    sources: Vec<FeedSource>,
    store: Store,
    service: ClassifierService,
    monitor: DriftMonitor,
    orchestrator: RetrainOrchestrator,
    ingestor: Ingestor,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, StoreError> {
        let fetcher = Box::new(HttpFetcher::new(config.feed_timeout_secs));
        Self::with_parts(config, fetcher, sources::load_sources())
    }

    /// Construction seam: tests inject a stub fetcher and a small catalog.
    pub fn with_parts(
        config: PipelineConfig,
        fetcher: Box<dyn FeedFetch>,
        sources: Vec<FeedSource>,
    ) -> Result<Self, StoreError> {
        let store = Store::open(&config.db_path)?;
        let service = ClassifierService::new();
        let orchestrator = RetrainOrchestrator::new(&config.data_dir, config.staleness_days);
        let ingestor = Ingestor::new(fetcher, config.max_items_per_feed, config.throttle_ms);

        let pipeline = Self {
            sources,
            monitor: DriftMonitor::default(),
            config,
            store,
            service,
            orchestrator,
            ingestor,
        };
        pipeline.warm_start();
        Ok(pipeline)
    }

    /// Reload the latest published snapshot, if any. A corrupt artifact set
    /// is refused and scoring stays deferred until the next training run.
    fn warm_start(&self) {
        let latest = match self.store.latest_snapshot() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                log::info!("No model snapshot yet; scoring waits for keyword labels or training");
                return;
            }
            Err(e) => {
                log::warn!("Could not read latest snapshot: {}", e);
                return;
            }
        };

        match load_artifacts(self.orchestrator.models_dir(), &latest.version) {
            Ok(snapshot) => self.service.swap(std::sync::Arc::new(snapshot)),
            Err(e) => {
                log::error!(
                    "Refusing artifacts for model {}: {} (will retrain)",
                    latest.version,
                    e
                );
            }
        }
    }

    /// One full cycle. Every step is isolated: a failing step is logged and
    /// the remaining steps still run.
    pub fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        log::info!("Pipeline cycle starting");

        report.ingest = Some(self.ingestor.run(&self.sources, &self.store));

        match self.service.score_pending(&self.store) {
            Ok(summary) => {
                if summary.scored > 0 || summary.deferred > 0 {
                    log::info!(
                        "Scored {} incidents ({} deferred)",
                        summary.scored,
                        summary.deferred
                    );
                }
                report.scoring = Some(summary);
            }
            Err(e) => log::warn!("Scoring pass failed: {}", e),
        }

        match self.monitor.run(
            &self.store,
            &self.config.data_dir,
            self.service.active_version().as_deref(),
        ) {
            Ok(eval) => report.drift = Some(eval),
            Err(e) => log::warn!("Drift evaluation failed: {}", e),
        }

        match self.orchestrator.run_cycle(&self.store, &self.service) {
            Ok(outcome) => report.retrain = Some(outcome),
            Err(e) => log::warn!("Retrain orchestration failed: {}", e),
        }

        match self.store.purge(
            Utc::now(),
            self.config.short_retention_days,
            self.config.long_retention_days,
        ) {
            Ok(stats) => {
                if stats.total() > 0 {
                    log::info!("Retention purge removed {} incidents", stats.total());
                }
                report.purged = stats.total();
            }
            Err(e) => log::warn!("Retention purge failed: {}", e),
        }

        log::info!("Pipeline cycle complete");
        report
    }

    /// Run cycles until shutdown. Sleeps in short slices so Ctrl-C is
    /// honored promptly, but only ever between cycles.
    pub fn run_loop(&self) {
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        log::info!(
            "Pipeline loop started ({} feeds, every {}s)",
            self.sources.len(),
            interval.as_secs()
        );

        while !shutdown_requested() {
            self.run_cycle();

            let mut slept = Duration::ZERO;
            while slept < interval && !shutdown_requested() {
                std::thread::sleep(SLEEP_SLICE);
                slept += SLEEP_SLICE;
            }
        }
        log::info!("Pipeline loop stopped");
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn service(&self) -> &ClassifierService {
        &self.service
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::ingest::FeedError;
    use crate::logic::store::{Priority, ScoringStatus};
    use tempfile::TempDir;

    struct OneFeedStub {
        body: String,
    }

    impl FeedFetch for OneFeedStub {
        fn fetch(&self, _url: &str) -> Result<String, FeedError> {
            Ok(self.body.clone())
        }
    }

    fn test_config(dir: &TempDir) -> PipelineConfig {
        PipelineConfig {
            poll_interval_secs: 1,
            db_path: dir.path().join("test.db"),
            data_dir: dir.path().to_path_buf(),
            feed_timeout_secs: 1,
            max_items_per_feed: 25,
            throttle_ms: 0,
            short_retention_days: 60,
            long_retention_days: 120,
            staleness_days: 7,
        }
    }

    fn ransomware_feed() -> String {
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title>
        <item>
          <title>Ransomware hits hospital network</title>
          <guid>abc123</guid>
          <link>https://example.org/abc123</link>
          <description>Ransomware operators encrypted hospital systems.</description>
          <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
        </item>
        </channel></rss>"#
            .to_string()
    }

    fn build(dir: &TempDir, body: String) -> Pipeline {
        let sources = vec![FeedSource {
            name: "stub-feed".to_string(),
            url: "https://stub".to_string(),
            category: "Test".to_string(),
        }];
        Pipeline::with_parts(test_config(dir), Box::new(OneFeedStub { body }), sources).unwrap()
    }

    #[test]
    fn test_end_to_end_single_cycle() {
        let dir = TempDir::new().unwrap();
        let pipeline = build(&dir, ransomware_feed());

        let report = pipeline.run_cycle();
        assert_eq!(report.ingest.unwrap().inserted, 1);
        assert_eq!(report.scoring.unwrap().scored, 1);

        // The keyword override labels the row even with no trained model.
        let row = pipeline.store().get(1).unwrap().unwrap();
        assert_eq!(row.priority, Some(Priority::Critical));
        assert_eq!(row.scoring_status, ScoringStatus::Override);
        assert_eq!(row.category.as_deref(), Some("Ransomware"));
        assert_eq!(row.sector.as_deref(), Some("General"));
        assert!(!row.is_mitigated);
        let threat = row.threat_score.unwrap();
        assert!((0.0..=1.0).contains(&threat));

        // One labeled row is not enough corpus: retraining reports a no-op.
        assert_eq!(
            report.retrain,
            Some(CycleOutcome::SkippedInsufficientData { labeled_rows: 1 })
        );
    }

    #[test]
    fn test_second_cycle_adds_no_duplicates() {
        let dir = TempDir::new().unwrap();
        let pipeline = build(&dir, ransomware_feed());

        pipeline.run_cycle();
        let report = pipeline.run_cycle();

        let ingest = report.ingest.unwrap();
        assert_eq!(ingest.inserted, 0);
        assert_eq!(ingest.duplicates, 1);
        assert_eq!(pipeline.store().incident_count().unwrap(), 1);
    }

    #[test]
    fn test_drift_runs_every_cycle() {
        let dir = TempDir::new().unwrap();
        let pipeline = build(&dir, ransomware_feed());

        pipeline.run_cycle();
        let metric = pipeline.store().latest_metric().unwrap();
        assert!(metric.is_some());
    }
}
