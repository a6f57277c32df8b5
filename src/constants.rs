//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! To change a default interval or path, only edit this file.

use std::path::PathBuf;

/// Default pipeline cycle interval (seconds)
pub const DEFAULT_POLL_INTERVAL: u64 = 150;

/// Default per-feed HTTP timeout (seconds)
pub const DEFAULT_FEED_TIMEOUT: u64 = 10;

/// Default maximum items consumed per feed per cycle
pub const DEFAULT_MAX_ITEMS_PER_FEED: usize = 25;

/// Default throttle between per-item store writes (milliseconds)
pub const DEFAULT_THROTTLE_MS: u64 = 50;

/// Retention window for LOW/MEDIUM (and unscored) incidents (days)
pub const DEFAULT_SHORT_RETENTION_DAYS: i64 = 60;

/// Retention window for HIGH/CRITICAL incidents (days)
pub const DEFAULT_LONG_RETENTION_DAYS: i64 = 120;

/// Maximum age of the active model before retraining is forced (days)
pub const DEFAULT_STALENESS_DAYS: i64 = 7;

/// Minimum labeled rows required before a training run is attempted
pub const MIN_TRAINING_ROWS: usize = 5;

/// Recent-score window size for drift evaluation
pub const DRIFT_WINDOW: usize = 200;

/// Minimum samples before a drift evaluation is meaningful
pub const DRIFT_MIN_SAMPLES: usize = 20;

/// Outlier fraction above which drift is declared
pub const DRIFT_THRESHOLD: f64 = 0.35;

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name
pub const APP_NAME: &str = "ThreatWatch";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get pipeline cycle interval from environment or use default
pub fn get_poll_interval() -> u64 {
    std::env::var("THREATWATCH_POLL_INTERVAL")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_POLL_INTERVAL)
}

/// Get database path from environment or use the platform data dir
pub fn get_db_path() -> PathBuf {
    std::env::var("THREATWATCH_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|_| get_data_dir().join("threatwatch.db"))
}

/// Get data directory (model artifacts, drift state) from environment
pub fn get_data_dir() -> PathBuf {
    std::env::var("THREATWATCH_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("threatwatch")
        })
}

/// Get optional JSON feed-source override file
pub fn get_sources_path() -> Option<PathBuf> {
    std::env::var("THREATWATCH_SOURCES").ok().map(PathBuf::from)
}
