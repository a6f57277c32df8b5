//! Pipeline Configuration
//!
//! Built once at startup from environment variables with compiled-in
//! fallbacks (see `constants`).

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

use crate::constants;

/// Runtime configuration for the ingestion/scoring/retraining pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Seconds between pipeline cycles
    pub poll_interval_secs: u64,
    /// SQLite database path
    pub db_path: PathBuf,
    /// Directory holding model artifacts and drift state
    pub data_dir: PathBuf,
    /// Per-feed HTTP timeout in seconds
    pub feed_timeout_secs: u64,
    /// Maximum items consumed per feed per cycle
    pub max_items_per_feed: usize,
    /// Delay between per-item store writes (milliseconds)
    pub throttle_ms: u64,
    /// Retention window for non-HIGH/CRITICAL rows (days)
    pub short_retention_days: i64,
    /// Retention window for HIGH/CRITICAL rows (days)
    pub long_retention_days: i64,
    /// Maximum model age before retraining is forced (days)
    pub staleness_days: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: constants::get_poll_interval(),
            db_path: constants::get_db_path(),
            data_dir: constants::get_data_dir(),
            feed_timeout_secs: std::env::var("THREATWATCH_FEED_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(constants::DEFAULT_FEED_TIMEOUT),
            max_items_per_feed: std::env::var("THREATWATCH_MAX_ITEMS_PER_FEED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(constants::DEFAULT_MAX_ITEMS_PER_FEED),
            throttle_ms: std::env::var("THREATWATCH_THROTTLE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(constants::DEFAULT_THROTTLE_MS),
            short_retention_days: std::env::var("THREATWATCH_SHORT_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(constants::DEFAULT_SHORT_RETENTION_DAYS),
            long_retention_days: std::env::var("THREATWATCH_LONG_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(constants::DEFAULT_LONG_RETENTION_DAYS),
            staleness_days: std::env::var("THREATWATCH_STALENESS_DAYS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(constants::DEFAULT_STALENESS_DAYS),
        }
    }
}
