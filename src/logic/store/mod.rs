//! Deduplicating Incident Store
//!
//! SQLite-backed persistence for advisory incidents and model audit rows.
//! Enforces the (source, external_id) uniqueness key at insert time and
//! owns the two-tier retention purge.

pub mod types;

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

pub use types::{
    Candidate, Incident, MetricRecord, Priority, PurgeStats, ScoredUpdate, ScoringStatus,
    SnapshotRecord, UpsertOutcome,
};

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Corrupt(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "SQLite error: {}", e),
            StoreError::Corrupt(msg) => write!(f, "Corrupt row: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Sqlite(err)
    }
}

// ============================================================================
// STORE
// ============================================================================

pub struct Store {
    conn: Mutex<Connection>,
    /// Monotonic guard for `ingested_at` across inserts.
    last_ingested_at: Mutex<Option<DateTime<Utc>>>,
}

impl Store {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Corrupt(format!("create db dir: {}", e)))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            last_ingested_at: Mutex::new(None),
        })
    }

    /// In-memory store, for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            last_ingested_at: Mutex::new(None),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                external_id TEXT NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                summary TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                url TEXT,
                timestamp TEXT NOT NULL,
                ingested_at TEXT NOT NULL,
                scoring_status TEXT NOT NULL DEFAULT 'unscored',
                priority TEXT,
                category TEXT,
                sector TEXT,
                anomaly_score REAL,
                useful_score REAL,
                threat_score REAL,
                is_mitigated INTEGER NOT NULL DEFAULT 0,
                model_version TEXT,
                UNIQUE(source, external_id)
            );

            CREATE TABLE IF NOT EXISTS model_snapshots (
                version TEXT PRIMARY KEY,
                accuracy REAL NOT NULL,
                drift_score REAL NOT NULL,
                drift_detected INTEGER NOT NULL,
                trained_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS model_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                model_version TEXT NOT NULL,
                accuracy REAL,
                drift_score REAL NOT NULL,
                drift_detected INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_incidents_timestamp ON incidents(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents(scoring_status);
            CREATE INDEX IF NOT EXISTS idx_metrics_timestamp ON model_metrics(timestamp DESC);
            "#,
        )?;
        Ok(())
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Dedup-checked insert. A second insert of the same (source, external_id)
    /// is a no-op, including the near-simultaneous race on the unique index.
    pub fn upsert(&self, candidate: &Candidate) -> Result<UpsertOutcome, StoreError> {
        let ingested_at = self.next_ingested_at();
        let conn = self.conn.lock();
        let result = conn.execute(
            r#"INSERT INTO incidents
               (source, external_id, title, summary, description, url, timestamp, ingested_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
               ON CONFLICT(source, external_id) DO NOTHING"#,
            params![
                candidate.source,
                candidate.external_id,
                candidate.title,
                candidate.summary,
                candidate.summary,
                candidate.url,
                candidate.timestamp.to_rfc3339(),
                ingested_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(0) => Ok(UpsertOutcome::SkippedDuplicate),
            Ok(_) => Ok(UpsertOutcome::Inserted),
            // Lost the race on the unique index: treat as the duplicate it is.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Ok(UpsertOutcome::SkippedDuplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Store-assigned ingestion time, never going backwards.
    fn next_ingested_at(&self) -> DateTime<Utc> {
        let mut last = self.last_ingested_at.lock();
        let now = Utc::now();
        let assigned = match *last {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        *last = Some(assigned);
        assigned
    }

    // ========================================================================
    // SCORING
    // ========================================================================

    /// Rows the classifier has never touched, oldest first.
    pub fn unscored(&self, limit: usize) -> Result<Vec<Incident>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT id, source, external_id, title, summary, description, url,
                      timestamp, ingested_at, scoring_status, priority, category, sector,
                      anomaly_score, useful_score, threat_score, is_mitigated, model_version
               FROM incidents WHERE scoring_status = 'unscored'
               ORDER BY id ASC LIMIT ?1"#,
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_incident)?;
        collect_rows(rows)
    }

    /// Write back one scoring batch in a single transaction.
    pub fn apply_scores(&self, updates: &[ScoredUpdate]) -> Result<(), StoreError> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"UPDATE incidents SET
                       scoring_status = ?2, priority = ?3, category = ?4, sector = ?5,
                       anomaly_score = ?6, useful_score = ?7, threat_score = ?8,
                       is_mitigated = ?9, model_version = ?10
                   WHERE id = ?1"#,
            )?;
            for u in updates {
                stmt.execute(params![
                    u.id,
                    u.status.as_str(),
                    u.priority.as_str(),
                    u.category,
                    u.sector,
                    u.anomaly_score,
                    u.useful_score,
                    u.threat_score,
                    u.is_mitigated,
                    u.model_version,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Explicit re-score request: push every scored row back to `unscored`
    /// so the next batch pass relabels it. Never happens implicitly.
    pub fn request_rescore_all(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE incidents SET scoring_status = 'unscored' WHERE scoring_status != 'unscored'",
            [],
        )?;
        Ok(changed)
    }

    // ========================================================================
    // TRAINING / DRIFT QUERIES
    // ========================================================================

    /// Labeled (text, priority) pairs forming the training corpus.
    pub fn labeled_corpus(&self) -> Result<Vec<(String, Priority)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT title, summary, priority FROM incidents
               WHERE priority IS NOT NULL
               ORDER BY id ASC"#,
        )?;
        let rows = stmt.query_map([], |row| {
            let title: String = row.get(0)?;
            let summary: String = row.get(1)?;
            let priority: String = row.get(2)?;
            Ok((title, summary, priority))
        })?;

        let mut corpus = Vec::new();
        for row in rows {
            let (title, summary, priority) = row?;
            let text = if summary.is_empty() { title } else { summary };
            if text.is_empty() {
                continue;
            }
            let priority = Priority::from_str(&priority)
                .ok_or_else(|| StoreError::Corrupt(format!("priority '{}'", priority)))?;
            corpus.push((text, priority));
        }
        Ok(corpus)
    }

    /// Confidence signal of the most recently scored rows, newest first.
    pub fn recent_useful_scores(&self, limit: usize) -> Result<Vec<f64>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT useful_score FROM incidents
               WHERE useful_score IS NOT NULL
               ORDER BY timestamp DESC, id DESC LIMIT ?1"#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, f64>(0))?;
        collect_rows(rows)
    }

    /// Texts of the most recent incidents, newest first (train-time drift input).
    pub fn recent_texts(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"SELECT title, summary FROM incidents
               ORDER BY timestamp DESC, id DESC LIMIT ?1"#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let title: String = row.get(0)?;
            let summary: String = row.get(1)?;
            Ok(if summary.is_empty() { title } else { summary })
        })?;
        let texts = collect_rows(rows)?;
        Ok(texts.into_iter().filter(|t: &String| !t.is_empty()).collect())
    }

    // ========================================================================
    // RETENTION
    // ========================================================================

    /// Two-tier age purge. Rows outside HIGH/CRITICAL (unscored included) go
    /// after the short window; HIGH/CRITICAL rows after the long window.
    pub fn purge(
        &self,
        now: DateTime<Utc>,
        short_retention_days: i64,
        long_retention_days: i64,
    ) -> Result<PurgeStats, StoreError> {
        let short_cutoff = (now - Duration::days(short_retention_days)).to_rfc3339();
        let long_cutoff = (now - Duration::days(long_retention_days)).to_rfc3339();

        let conn = self.conn.lock();
        let short_removed = conn.execute(
            r#"DELETE FROM incidents
               WHERE (priority IS NULL OR priority NOT IN ('HIGH', 'CRITICAL'))
                 AND timestamp < ?1"#,
            params![short_cutoff],
        )?;
        let long_removed = conn.execute(
            r#"DELETE FROM incidents
               WHERE priority IN ('HIGH', 'CRITICAL') AND timestamp < ?1"#,
            params![long_cutoff],
        )?;

        Ok(PurgeStats {
            short_tier_removed: short_removed,
            long_tier_removed: long_removed,
        })
    }

    // ========================================================================
    // MODEL AUDIT
    // ========================================================================

    pub fn insert_snapshot(&self, record: &SnapshotRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO model_snapshots (version, accuracy, drift_score, drift_detected, trained_at)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                record.version,
                record.accuracy,
                record.drift_score,
                record.drift_detected,
                record.trained_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn latest_snapshot(&self) -> Result<Option<SnapshotRecord>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                r#"SELECT version, accuracy, drift_score, drift_detected, trained_at
                   FROM model_snapshots ORDER BY version DESC LIMIT 1"#,
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, bool>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((version, accuracy, drift_score, drift_detected, trained_at)) => {
                Ok(Some(SnapshotRecord {
                    version,
                    accuracy,
                    drift_score,
                    drift_detected,
                    trained_at: parse_ts(&trained_at)?,
                }))
            }
        }
    }

    pub fn insert_metric(&self, record: &MetricRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO model_metrics (timestamp, model_version, accuracy, drift_score, drift_detected)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![
                record.timestamp.to_rfc3339(),
                record.model_version,
                record.accuracy,
                record.drift_score,
                record.drift_detected,
            ],
        )?;
        Ok(())
    }

    /// Newest metrics entry, for "latest status" projections and the
    /// orchestrator's drift trigger.
    pub fn latest_metric(&self) -> Result<Option<MetricRecord>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                r#"SELECT timestamp, model_version, accuracy, drift_score, drift_detected
                   FROM model_metrics ORDER BY timestamp DESC, id DESC LIMIT 1"#,
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<f64>>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, bool>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((timestamp, model_version, accuracy, drift_score, drift_detected)) => {
                Ok(Some(MetricRecord {
                    timestamp: parse_ts(&timestamp)?,
                    model_version,
                    accuracy,
                    drift_score,
                    drift_detected,
                }))
            }
        }
    }

    // ========================================================================
    // STATS
    // ========================================================================

    pub fn incident_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM incidents", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    /// Fetch one incident by id (test/inspection helper).
    pub fn get(&self, id: i64) -> Result<Option<Incident>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                r#"SELECT id, source, external_id, title, summary, description, url,
                          timestamp, ingested_at, scoring_status, priority, category, sector,
                          anomaly_score, useful_score, threat_score, is_mitigated, model_version
                   FROM incidents WHERE id = ?1"#,
                params![id],
                row_to_incident,
            )
            .optional()?;
        Ok(row)
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn row_to_incident(row: &rusqlite::Row<'_>) -> rusqlite::Result<Incident> {
    let timestamp: String = row.get(7)?;
    let ingested_at: String = row.get(8)?;
    let status: String = row.get(9)?;
    let priority: Option<String> = row.get(10)?;

    Ok(Incident {
        id: row.get(0)?,
        source: row.get(1)?,
        external_id: row.get(2)?,
        title: row.get(3)?,
        summary: row.get(4)?,
        description: row.get(5)?,
        url: row.get(6)?,
        timestamp: parse_ts_lossy(&timestamp),
        ingested_at: parse_ts_lossy(&ingested_at),
        scoring_status: ScoringStatus::from_str(&status).unwrap_or(ScoringStatus::Unscored),
        priority: priority.as_deref().and_then(Priority::from_str),
        category: row.get(11)?,
        sector: row.get(12)?,
        anomaly_score: row.get(13)?,
        useful_score: row.get(14)?,
        threat_score: row.get(15)?,
        is_mitigated: row.get(16)?,
        model_version: row.get(17)?,
    })
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{}': {}", s, e)))
}

fn parse_ts_lossy(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(source: &str, external_id: &str, age_days: i64) -> Candidate {
        Candidate {
            source: source.to_string(),
            external_id: external_id.to_string(),
            title: format!("Advisory {}", external_id),
            summary: "A vulnerability was reported".to_string(),
            url: Some(format!("https://example.org/{}", external_id)),
            timestamp: Utc::now() - Duration::days(age_days),
        }
    }

    fn scored(id: i64, priority: Priority) -> ScoredUpdate {
        ScoredUpdate {
            id,
            status: ScoringStatus::Scored,
            priority,
            category: priority.as_str().to_string(),
            sector: "General".to_string(),
            anomaly_score: 0.2,
            useful_score: 0.9,
            threat_score: 0.5,
            is_mitigated: priority == Priority::Low,
            model_version: Some("test-1".to_string()),
        }
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let c = candidate("feed-a", "abc123", 0);

        assert_eq!(store.upsert(&c).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert(&c).unwrap(), UpsertOutcome::SkippedDuplicate);
        assert_eq!(store.incident_count().unwrap(), 1);
    }

    #[test]
    fn test_same_external_id_different_source_is_distinct() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&candidate("feed-a", "abc123", 0)).unwrap();
        store.upsert(&candidate("feed-b", "abc123", 0)).unwrap();
        assert_eq!(store.incident_count().unwrap(), 2);
    }

    #[test]
    fn test_unscored_then_apply_scores() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&candidate("feed-a", "one", 0)).unwrap();
        store.upsert(&candidate("feed-a", "two", 0)).unwrap();

        let pending = store.unscored(100).unwrap();
        assert_eq!(pending.len(), 2);

        let updates: Vec<ScoredUpdate> =
            pending.iter().map(|i| scored(i.id, Priority::High)).collect();
        store.apply_scores(&updates).unwrap();

        assert!(store.unscored(100).unwrap().is_empty());
        let row = store.get(updates[0].id).unwrap().unwrap();
        assert_eq!(row.priority, Some(Priority::High));
        assert_eq!(row.scoring_status, ScoringStatus::Scored);
        assert_eq!(row.model_version.as_deref(), Some("test-1"));
    }

    #[test]
    fn test_purge_two_tiers() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&candidate("feed-a", "old-low", 61)).unwrap();
        store.upsert(&candidate("feed-a", "old-crit", 61)).unwrap();
        store.upsert(&candidate("feed-a", "ancient-crit", 121)).unwrap();
        store.upsert(&candidate("feed-a", "fresh", 1)).unwrap();

        let pending = store.unscored(100).unwrap();
        let mut updates = Vec::new();
        for inc in &pending {
            let priority = if inc.external_id.contains("crit") {
                Priority::Critical
            } else {
                Priority::Low
            };
            updates.push(scored(inc.id, priority));
        }
        store.apply_scores(&updates).unwrap();

        let stats = store.purge(Utc::now(), 60, 120).unwrap();
        assert_eq!(stats.short_tier_removed, 1); // old-low
        assert_eq!(stats.long_tier_removed, 1); // ancient-crit
        assert_eq!(store.incident_count().unwrap(), 2); // old-crit + fresh survive
    }

    #[test]
    fn test_purge_removes_stale_unscored_rows() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&candidate("feed-a", "stale-unscored", 61)).unwrap();
        let stats = store.purge(Utc::now(), 60, 120).unwrap();
        assert_eq!(stats.short_tier_removed, 1);
    }

    #[test]
    fn test_labeled_corpus_skips_unscored() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&candidate("feed-a", "one", 0)).unwrap();
        store.upsert(&candidate("feed-a", "two", 0)).unwrap();

        let pending = store.unscored(100).unwrap();
        store.apply_scores(&[scored(pending[0].id, Priority::Medium)]).unwrap();

        let corpus = store.labeled_corpus().unwrap();
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus[0].1, Priority::Medium);
    }

    #[test]
    fn test_request_rescore_all() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&candidate("feed-a", "one", 0)).unwrap();
        let pending = store.unscored(10).unwrap();
        store.apply_scores(&[scored(pending[0].id, Priority::High)]).unwrap();
        assert!(store.unscored(10).unwrap().is_empty());

        assert_eq!(store.request_rescore_all().unwrap(), 1);
        assert_eq!(store.unscored(10).unwrap().len(), 1);
        // The previous label is kept until the next scoring pass rewrites it.
        let row = store.get(pending[0].id).unwrap().unwrap();
        assert_eq!(row.priority, Some(Priority::High));
    }

    #[test]
    fn test_metrics_latest_ordering() {
        let store = Store::open_in_memory().unwrap();
        let base = Utc::now();
        for (i, detected) in [(0, false), (1, true)] {
            store
                .insert_metric(&MetricRecord {
                    timestamp: base + Duration::seconds(i),
                    model_version: format!("v{}", i),
                    accuracy: None,
                    drift_score: 0.1 * (i as f64 + 1.0),
                    drift_detected: detected,
                })
                .unwrap();
        }
        let latest = store.latest_metric().unwrap().unwrap();
        assert!(latest.drift_detected);
        assert_eq!(latest.model_version, "v1");
    }

    #[test]
    fn test_snapshot_roundtrip_and_latest() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.latest_snapshot().unwrap().is_none());

        for version in ["20240101-000000", "20240102-000000"] {
            store
                .insert_snapshot(&SnapshotRecord {
                    version: version.to_string(),
                    accuracy: 0.9,
                    drift_score: 0.05,
                    drift_detected: false,
                    trained_at: Utc::now(),
                })
                .unwrap();
        }
        let latest = store.latest_snapshot().unwrap().unwrap();
        assert_eq!(latest.version, "20240102-000000");
    }

    #[test]
    fn test_ingested_at_monotonic() {
        let store = Store::open_in_memory().unwrap();
        store.upsert(&candidate("feed-a", "one", 0)).unwrap();
        store.upsert(&candidate("feed-a", "two", 0)).unwrap();
        let rows = store.unscored(10).unwrap();
        assert!(rows[1].ingested_at >= rows[0].ingested_at);
    }
}
