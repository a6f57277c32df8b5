//! Store Types
//!
//! Row-level types for the incident store and the model audit tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// PRIORITY
// ============================================================================

/// Severity tier assigned to an incident. Stored as its uppercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Some(Priority::Low),
            "MEDIUM" | "MED" => Some(Priority::Medium),
            "HIGH" => Some(Priority::High),
            "CRITICAL" => Some(Priority::Critical),
            _ => None,
        }
    }

    /// Contribution of the tier to the combined threat score, in [0, 1].
    pub fn weight(&self) -> f64 {
        match self {
            Priority::Critical => 1.0,
            Priority::High => 0.8,
            Priority::Medium => 0.5,
            Priority::Low => 0.1,
        }
    }

    /// All tiers, most severe first. Matches the override tie-break order.
    pub fn descending() -> [Priority; 4] {
        [Priority::Critical, Priority::High, Priority::Medium, Priority::Low]
    }
}

// ============================================================================
// SCORING STATUS
// ============================================================================

/// Explicit scoring lifecycle state. An unscored row has never been touched
/// by the classifier; `Override` means a keyword rule supplied the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoringStatus {
    Unscored,
    Scored,
    Override,
}

impl ScoringStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringStatus::Unscored => "unscored",
            ScoringStatus::Scored => "scored",
            ScoringStatus::Override => "override",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unscored" => Some(ScoringStatus::Unscored),
            "scored" => Some(ScoringStatus::Scored),
            "override" => Some(ScoringStatus::Override),
            _ => None,
        }
    }
}

// ============================================================================
// CANDIDATE / INCIDENT
// ============================================================================

/// A normalized feed item, ready for dedup + insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub summary: String,
    pub url: Option<String>,
    /// Feed-provided publish time, or fetch time when the feed gave none.
    pub timestamp: DateTime<Utc>,
}

/// One stored advisory incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: i64,
    pub source: String,
    pub external_id: String,
    pub title: String,
    pub summary: String,
    pub description: String,
    pub url: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub scoring_status: ScoringStatus,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub sector: Option<String>,
    pub anomaly_score: Option<f64>,
    pub useful_score: Option<f64>,
    pub threat_score: Option<f64>,
    pub is_mitigated: bool,
    pub model_version: Option<String>,
}

impl Incident {
    /// Text the classifier operates on: summary, falling back to title.
    pub fn score_text(&self) -> &str {
        if self.summary.is_empty() {
            &self.title
        } else {
            &self.summary
        }
    }
}

/// Outcome of a dedup-checked insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    SkippedDuplicate,
}

/// Write-back payload for one scored row.
#[derive(Debug, Clone)]
pub struct ScoredUpdate {
    pub id: i64,
    pub status: ScoringStatus,
    pub priority: Priority,
    pub category: String,
    pub sector: String,
    pub anomaly_score: f64,
    pub useful_score: f64,
    pub threat_score: f64,
    pub is_mitigated: bool,
    pub model_version: Option<String>,
}

/// Rows removed by one retention pass, per tier.
#[derive(Debug, Clone, Copy, Default)]
pub struct PurgeStats {
    pub short_tier_removed: usize,
    pub long_tier_removed: usize,
}

impl PurgeStats {
    pub fn total(&self) -> usize {
        self.short_tier_removed + self.long_tier_removed
    }
}

// ============================================================================
// MODEL AUDIT ROWS
// ============================================================================

/// One immutable trained-model generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub version: String,
    pub accuracy: f64,
    pub drift_score: f64,
    pub drift_detected: bool,
    pub trained_at: DateTime<Utc>,
}

/// One append-only drift/training metrics entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub timestamp: DateTime<Utc>,
    pub model_version: String,
    pub accuracy: Option<f64>,
    pub drift_score: f64,
    pub drift_detected: bool,
}
