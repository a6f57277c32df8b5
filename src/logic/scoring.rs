//! Classifier Service
//!
//! Holds the active model snapshot behind an atomically swappable handle and
//! labels unscored incidents in batches. Scoring resolution order:
//!
//! 1. model prediction (when a snapshot is active),
//! 2. severity keyword override, applied after the model and taking
//!    precedence (ordered rule table, most severe tier first, first match
//!    wins),
//! 3. neither available: the row stays unscored rather than receiving a
//!    fabricated score. Keyword labels double as the training bootstrap on a
//!    cold start.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use super::model::ModelSnapshot;
use super::store::{Priority, ScoredUpdate, ScoringStatus, Store, StoreError};

/// Maximum rows labeled per scoring pass.
const SCORE_BATCH_LIMIT: usize = 500;

// Threat-score combination weights (sum to 1, result stays in [0, 1]).
const W_PRIORITY: f64 = 0.5;
const W_ANOMALY: f64 = 0.3;
const W_USEFUL: f64 = 0.2;

// ============================================================================
// SEVERITY OVERRIDE TABLE
// ============================================================================

struct OverrideRule {
    priority: Priority,
    category: &'static str,
    pattern: Regex,
}

/// Ordered most-severe-first; the first matching rule wins. Keeping the
/// order explicit makes the tie-break a testable contract.
static OVERRIDE_RULES: Lazy<Vec<OverrideRule>> = Lazy::new(|| {
    let rule = |priority, category, pattern: &str| OverrideRule {
        priority,
        category,
        pattern: Regex::new(pattern).expect("invalid override pattern"),
    };
    vec![
        rule(
            Priority::Critical,
            "Ransomware",
            r"(?i)\b(ransomware|ransom demand)\b",
        ),
        rule(
            Priority::Critical,
            "Exploit",
            r"(?i)\b(zero[- ]day|actively exploited|remote code execution|wormable)\b",
        ),
        rule(
            Priority::High,
            "Data Breach",
            r"(?i)\b(data breach|data leak|records exposed)\b",
        ),
        rule(
            Priority::High,
            "Phishing",
            r"(?i)\b(phishing|credential harvesting)\b",
        ),
        rule(
            Priority::High,
            "Malware",
            r"(?i)\b(malware|botnet|trojan|spyware)\b",
        ),
        rule(
            Priority::High,
            "Exploit",
            r"(?i)\b(exploit|proof of concept|cve-\d{4}-\d+)\b",
        ),
        rule(
            Priority::Medium,
            "Vulnerability",
            r"(?i)\b(vulnerability|security flaw)\b",
        ),
        rule(
            Priority::Medium,
            "Advisory",
            r"(?i)\b(advisory|security update|mitigation|patch)\b",
        ),
    ]
});

fn match_override(text: &str) -> Option<&'static OverrideRule> {
    OVERRIDE_RULES.iter().find(|r| r.pattern.is_match(text))
}

// ============================================================================
// SECTOR MAPPING
// ============================================================================

const DEFAULT_SECTOR: &str = "General";

const SECTOR_MAP: &[(&str, &str)] = &[
    ("Exploit", "Technology"),
    ("Vulnerability", "Technology"),
    ("Malware", "Technology"),
    ("Phishing", "Financial Services"),
    ("Data Breach", "Financial Services"),
    ("Advisory", "Government"),
];

fn sector_for(category: &str) -> String {
    SECTOR_MAP
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, s)| (*s).to_string())
        .unwrap_or_else(|| DEFAULT_SECTOR.to_string())
}

// ============================================================================
// THREAT SCORE
// ============================================================================

/// Fixed weighted combination, kept in [0, 1] system-wide.
pub fn threat_score(priority: Priority, anomaly_score: f64, useful_score: f64) -> f64 {
    let anomaly = anomaly_score.clamp(0.0, 1.0);
    let useful = useful_score.clamp(0.0, 1.0);
    (W_PRIORITY * priority.weight() + W_ANOMALY * anomaly + W_USEFUL * useful).clamp(0.0, 1.0)
}

// ============================================================================
// CLASSIFIER SERVICE
// ============================================================================

/// Result of one batch scoring pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreSummary {
    /// Rows labeled and written back.
    pub scored: usize,
    /// Rows left unscored (no model and no keyword match).
    pub deferred: usize,
}

pub struct ClassifierService {
    /// The one mutual-exclusion point of the pipeline: swapped wholesale,
    /// never mutated in place. Readers clone the Arc and finish their batch
    /// against the snapshot they started with.
    active: RwLock<Option<Arc<ModelSnapshot>>>,
}

impl ClassifierService {
    pub fn new() -> Self {
        Self {
            active: RwLock::new(None),
        }
    }

    /// Atomically publish a new snapshot; subsequent calls see it at once.
    pub fn swap(&self, snapshot: Arc<ModelSnapshot>) {
        let version = snapshot.version.clone();
        *self.active.write() = Some(snapshot);
        log::info!("Active model snapshot is now {}", version);
    }

    pub fn active(&self) -> Option<Arc<ModelSnapshot>> {
        self.active.read().clone()
    }

    pub fn active_version(&self) -> Option<String> {
        self.active.read().as_ref().map(|s| s.version.clone())
    }

    /// Label all unscored rows and commit the batch in one transaction.
    /// Re-running over already-scored rows is a no-op by construction: only
    /// `unscored` rows are selected.
    pub fn score_pending(&self, store: &Store) -> Result<ScoreSummary, StoreError> {
        // One snapshot for the whole batch, unaffected by concurrent swaps.
        let snapshot = self.active();
        let pending = store.unscored(SCORE_BATCH_LIMIT)?;
        if pending.is_empty() {
            return Ok(ScoreSummary::default());
        }

        let mut updates = Vec::new();
        let mut deferred = 0usize;

        for item in &pending {
            match resolve(item.score_text(), snapshot.as_deref()) {
                Some(r) => {
                    let model_version = if r.used_model {
                        snapshot.as_ref().map(|s| s.version.clone())
                    } else {
                        None
                    };
                    updates.push(ScoredUpdate {
                        id: item.id,
                        status: r.status,
                        sector: sector_for(&r.category),
                        threat_score: threat_score(r.priority, r.anomaly_score, r.useful_score),
                        is_mitigated: r.priority == Priority::Low,
                        priority: r.priority,
                        category: r.category,
                        anomaly_score: r.anomaly_score.clamp(0.0, 1.0),
                        useful_score: r.useful_score.clamp(0.0, 1.0),
                        model_version,
                    });
                }
                None => deferred += 1,
            }
        }

        store.apply_scores(&updates)?;
        if deferred > 0 {
            log::debug!("{} rows deferred: no usable model and no keyword match", deferred);
        }
        Ok(ScoreSummary {
            scored: updates.len(),
            deferred,
        })
    }
}

impl Default for ClassifierService {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

struct Resolved {
    status: ScoringStatus,
    priority: Priority,
    category: String,
    anomaly_score: f64,
    useful_score: f64,
    used_model: bool,
}

fn resolve(text: &str, snapshot: Option<&ModelSnapshot>) -> Option<Resolved> {
    let model = snapshot.and_then(|s| s.score(text));
    let rule = match_override(text);

    match (rule, model) {
        // Keyword override takes precedence over whatever the model said.
        (Some(rule), model) => Some(Resolved {
            status: ScoringStatus::Override,
            priority: rule.priority,
            category: rule.category.to_string(),
            anomaly_score: model.as_ref().map(|m| m.anomaly_score).unwrap_or(0.0),
            // A literal keyword match is certain about its tier.
            useful_score: model.as_ref().map(|m| m.confidence).unwrap_or(1.0),
            used_model: model.is_some(),
        }),
        (None, Some(m)) => {
            let priority = Priority::from_str(&m.label)?;
            Some(Resolved {
                status: ScoringStatus::Scored,
                priority,
                category: m.label,
                anomaly_score: m.anomaly_score,
                useful_score: m.confidence,
                used_model: true,
            })
        }
        (None, None) => None,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::model::{train, TrainInput, TrainOutcome};
    use crate::logic::store::Candidate;
    use chrono::Utc;

    fn trained_snapshot() -> Arc<ModelSnapshot> {
        let corpus = vec![
            ("server compromise reported overnight".to_string(), Priority::Critical),
            ("emergency fix for authentication bypass".to_string(), Priority::Critical),
            ("suspicious login activity observed".to_string(), Priority::High),
            ("unusual outbound traffic detected".to_string(), Priority::High),
            ("routine maintenance window announced".to_string(), Priority::Low),
            ("minor cosmetic fix shipped".to_string(), Priority::Low),
        ];
        let outcome = train(TrainInput {
            corpus,
            recent_texts: vec![],
            version: "test-model".to_string(),
        })
        .unwrap();
        match outcome {
            TrainOutcome::Trained(report) => Arc::new(report.snapshot),
            TrainOutcome::Skipped { .. } => panic!("corpus large enough"),
        }
    }

    fn candidate(id: &str, summary: &str) -> Candidate {
        Candidate {
            source: "test-feed".to_string(),
            external_id: id.to_string(),
            title: summary.to_string(),
            summary: summary.to_string(),
            url: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_override_beats_model_prediction() {
        let snapshot = trained_snapshot();
        // The model knows nothing about ransomware; the keyword rule decides.
        let r = resolve("ransomware hits hospital network", Some(&snapshot)).unwrap();
        assert_eq!(r.priority, Priority::Critical);
        assert_eq!(r.category, "Ransomware");
        assert_eq!(r.status, ScoringStatus::Override);
        assert!(r.used_model);
    }

    #[test]
    fn test_override_tie_break_is_rule_order() {
        // Both a HIGH (phishing) and a CRITICAL (ransomware) keyword match;
        // the most severe rule is listed first and wins.
        let r = resolve("phishing emails deliver ransomware payload", None).unwrap();
        assert_eq!(r.priority, Priority::Critical);
        assert_eq!(r.category, "Ransomware");
    }

    #[test]
    fn test_keyword_only_without_model() {
        let r = resolve("phishing campaign targets staff", None).unwrap();
        assert_eq!(r.priority, Priority::High);
        assert_eq!(r.status, ScoringStatus::Override);
        assert!(!r.used_model);
        assert_eq!(r.useful_score, 1.0);
        assert_eq!(r.anomaly_score, 0.0);
    }

    #[test]
    fn test_no_model_no_keyword_defers() {
        assert!(resolve("quarterly newsletter roundup", None).is_none());
    }

    #[test]
    fn test_model_prediction_when_no_keyword() {
        let snapshot = trained_snapshot();
        let r = resolve("routine maintenance window announced", Some(&snapshot)).unwrap();
        assert_eq!(r.status, ScoringStatus::Scored);
        assert_eq!(r.priority, Priority::Low);
        assert!(r.used_model);
    }

    #[test]
    fn test_threat_score_range_and_order() {
        let low = threat_score(Priority::Low, 0.0, 0.0);
        let crit = threat_score(Priority::Critical, 1.0, 1.0);
        assert!((0.0..=1.0).contains(&low));
        assert!((crit - 1.0).abs() < 1e-9);
        assert!(crit > low);
        // Out-of-range inputs are clamped, never propagated.
        let s = threat_score(Priority::Medium, 7.0, -3.0);
        assert!((0.0..=1.0).contains(&s));
    }

    #[test]
    fn test_score_pending_writes_batch() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&candidate("a", "ransomware spreading through network")).unwrap();
        store.upsert(&candidate("b", "routine newsletter with no signal words")).unwrap();

        let service = ClassifierService::new();
        let summary = service.score_pending(&store).unwrap();
        assert_eq!(summary.scored, 1);
        assert_eq!(summary.deferred, 1);

        // The keyword-labeled row is final; the deferred one stays pending.
        let remaining = store.unscored(100).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].external_id, "b");
    }

    #[test]
    fn test_scored_rows_are_not_rescored() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&candidate("a", "ransomware incident")).unwrap();

        let service = ClassifierService::new();
        service.score_pending(&store).unwrap();
        let second = service.score_pending(&store).unwrap();
        assert_eq!(second.scored, 0);
    }

    #[test]
    fn test_low_priority_is_mitigated_policy() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&candidate("a", "routine maintenance window announced")).unwrap();
        store.upsert(&candidate("b", "ransomware hits hospital network")).unwrap();

        let service = ClassifierService::new();
        service.swap(trained_snapshot());
        service.score_pending(&store).unwrap();

        let rows: Vec<_> = (1..=2).filter_map(|id| store.get(id).unwrap()).collect();
        for row in rows {
            match row.priority.unwrap() {
                Priority::Low => assert!(row.is_mitigated),
                _ => assert!(!row.is_mitigated),
            }
        }
    }

    #[test]
    fn test_sector_mapping_defaults_to_general() {
        assert_eq!(sector_for("Phishing"), "Financial Services");
        assert_eq!(sector_for("Ransomware"), "General");
        assert_eq!(sector_for("LOW"), "General");
    }

    #[test]
    fn test_swap_changes_active_version() {
        let service = ClassifierService::new();
        assert!(service.active_version().is_none());
        service.swap(trained_snapshot());
        assert_eq!(service.active_version().as_deref(), Some("test-model"));
    }
}
