//! Feed Ingestor
//!
//! Walks the source catalog, fetches and parses each feed, and hands
//! normalized candidates to the store. A failing feed is skipped and
//! logged; it never aborts ingestion of the remaining feeds.

pub mod fetch;
pub mod parse;

use std::time::Duration;

use chrono::Utc;

use super::sources::FeedSource;
use super::store::{Candidate, Store, UpsertOutcome};

pub use fetch::{FeedFetch, HttpFetcher};

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Transient per-source failure: skip this cycle, keep the rest running.
#[derive(Debug)]
pub enum FeedError {
    Http(String),
    Parse(String),
}

impl std::fmt::Display for FeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeedError::Http(msg) => write!(f, "HTTP error: {}", msg),
            FeedError::Parse(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for FeedError {}

// ============================================================================
// INGESTOR
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct IngestReport {
    pub feeds_ok: usize,
    pub feeds_failed: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped_no_id: usize,
}

pub struct Ingestor {
    fetcher: Box<dyn FeedFetch>,
    max_items_per_feed: usize,
    throttle: Duration,
}

impl Ingestor {
    pub fn new(fetcher: Box<dyn FeedFetch>, max_items_per_feed: usize, throttle_ms: u64) -> Self {
        Self {
            fetcher,
            max_items_per_feed,
            throttle: Duration::from_millis(throttle_ms),
        }
    }

    /// Ingest every source once. Running this twice over identical feed
    /// content inserts nothing the second time.
    pub fn run(&self, sources: &[FeedSource], store: &Store) -> IngestReport {
        let mut report = IngestReport::default();

        for source in sources {
            match self.ingest_feed(source, store, &mut report) {
                Ok(count) => {
                    report.feeds_ok += 1;
                    log::debug!("{}: {} new items", source.name, count);
                }
                Err(e) => {
                    report.feeds_failed += 1;
                    log::warn!("Skipping feed {} this cycle: {}", source.name, e);
                }
            }
        }

        log::info!(
            "Ingest: {} new, {} duplicates, {}/{} feeds ok",
            report.inserted,
            report.duplicates,
            report.feeds_ok,
            sources.len()
        );
        report
    }

    fn ingest_feed(
        &self,
        source: &FeedSource,
        store: &Store,
        report: &mut IngestReport,
    ) -> Result<usize, FeedError> {
        let body = self.fetcher.fetch(&source.url)?;
        let items = parse::parse_feed(&body)?;
        let mut inserted = 0;

        for item in items.into_iter().take(self.max_items_per_feed) {
            let external_id = match item.external_id() {
                Some(id) => id,
                None => {
                    report.skipped_no_id += 1;
                    continue;
                }
            };

            let candidate = Candidate {
                source: source.name.clone(),
                external_id,
                title: item.title,
                summary: item.summary,
                url: item.link,
                // Fetch-time fallback when the feed gave no parseable date.
                timestamp: item.published.unwrap_or_else(Utc::now),
            };

            match store.upsert(&candidate) {
                Ok(UpsertOutcome::Inserted) => {
                    inserted += 1;
                    report.inserted += 1;
                }
                Ok(UpsertOutcome::SkippedDuplicate) => report.duplicates += 1,
                Err(e) => {
                    log::warn!("Insert failed for {}/{}: {}", source.name, candidate.external_id, e);
                }
            }

            // Resource fairness toward the store and downstream consumers.
            if !self.throttle.is_zero() {
                std::thread::sleep(self.throttle);
            }
        }

        Ok(inserted)
    }
}

// ============================================================================
// TESTS
// ============================================================================
