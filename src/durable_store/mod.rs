//! Transactional row store for signals, rollups, snapshots, thresholds,
//! insights, and identity rows (§2 Durable Store, §6 Persistent state).
//!
//! Grounded on `src/signals/db_storage.rs`'s `SCHEMA_SQL` constant and WAL
//! pragma tuning, and `src/auth/user_store.rs`'s `Result<Self>`-returning
//! `new(db_path)` + `init_db()` constructor shape.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::models::{Priority, Signal, SignalStatus, ThresholdRecord, ThresholdSource};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    service_name TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    status TEXT NOT NULL,
    latency_ms REAL NOT NULL,
    priority TEXT NOT NULL,
    customer_identifier TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_signals_lookup
    ON signals(tenant_id, service_name, endpoint, created_at DESC);

CREATE TABLE IF NOT EXISTS hourly_rollups (
    tenant_id TEXT NOT NULL,
    service_name TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    bucket_start TEXT NOT NULL,
    total_requests INTEGER NOT NULL,
    error_count INTEGER NOT NULL,
    avg_latency_ms REAL NOT NULL,
    min_latency_ms REAL NOT NULL,
    max_latency_ms REAL NOT NULL,
    p50_latency_ms REAL NOT NULL,
    p95_latency_ms REAL NOT NULL,
    p99_latency_ms REAL NOT NULL,
    PRIMARY KEY (tenant_id, service_name, endpoint, bucket_start)
);

CREATE TABLE IF NOT EXISTS daily_rollups (
    tenant_id TEXT NOT NULL,
    service_name TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    bucket_start TEXT NOT NULL,
    total_requests INTEGER NOT NULL,
    error_count INTEGER NOT NULL,
    avg_latency_ms REAL NOT NULL,
    min_latency_ms REAL NOT NULL,
    max_latency_ms REAL NOT NULL,
    p50_latency_ms REAL NOT NULL,
    p95_latency_ms REAL NOT NULL,
    p99_latency_ms REAL NOT NULL,
    PRIMARY KEY (tenant_id, service_name, endpoint, bucket_start)
);

CREATE TABLE IF NOT EXISTS aggregate_snapshots (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    service_name TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    window TEXT NOT NULL,
    count INTEGER NOT NULL,
    sum_latency_ms REAL NOT NULL,
    error_count INTEGER NOT NULL,
    p50_latency_ms REAL NOT NULL,
    p95_latency_ms REAL NOT NULL,
    p99_latency_ms REAL NOT NULL,
    snapshot_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snapshots_lookup
    ON aggregate_snapshots(tenant_id, service_name, endpoint, window, snapshot_at DESC);

CREATE TABLE IF NOT EXISTS ai_thresholds (
    tenant_id TEXT NOT NULL,
    service_name TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    cache_latency_ms REAL NOT NULL,
    breaker_error_rate REAL NOT NULL,
    queue_rpm REAL NOT NULL,
    shed_rpm REAL NOT NULL,
    per_client_rpm REAL NOT NULL,
    confidence REAL NOT NULL,
    reasoning TEXT NOT NULL,
    source TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    PRIMARY KEY (tenant_id, service_name, endpoint)
);

CREATE TABLE IF NOT EXISTS ai_insights (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    service_name TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    summary TEXT NOT NULL,
    patterns_json TEXT NOT NULL,
    anomalies_json TEXT NOT NULL,
    threshold_confidence REAL NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS api_keys (
    id TEXT PRIMARY KEY,
    key TEXT UNIQUE NOT NULL,
    tenant_id TEXT NOT NULL,
    revoked INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    last_used_at TEXT
);

CREATE TABLE IF NOT EXISTS rate_limit_configs (
    tenant_id TEXT PRIMARY KEY,
    requests_per_minute INTEGER NOT NULL,
    burst INTEGER NOT NULL
);
"#;

pub struct DurableStore {
    conn: Mutex<Connection>,
}

impl DurableStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("opening durable store")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", -64000)?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("initializing durable store schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory durable store")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a Signal row. Called by the Consumer when the sampling rule
    /// selects this signal for durable persistence (§4.1 step 2).
    pub fn insert_signal(&self, signal: &Signal) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO signals (tenant_id, service_name, endpoint, status, latency_ms, priority, customer_identifier, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                signal.tenant_id,
                signal.service_name,
                signal.endpoint,
                signal.status.as_str(),
                signal.latency_ms,
                signal.priority.as_str(),
                signal.customer_identifier,
                signal.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Last `limit` raw signals for (tenant, service, endpoint), newest
    /// first. Used by the Decision Engine's tier-3 raw-row fallback (§4.6).
    pub fn recent_signals(
        &self,
        tenant_id: &str,
        service_name: &str,
        endpoint: &str,
        limit: usize,
    ) -> Result<Vec<Signal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT tenant_id, service_name, endpoint, status, latency_ms, priority, customer_identifier, created_at
             FROM signals
             WHERE tenant_id = ?1 AND service_name = ?2 AND endpoint = ?3
             ORDER BY created_at DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![tenant_id, service_name, endpoint, limit as i64],
            |row| {
                let status_str: String = row.get(3)?;
                let priority_str: String = row.get(5)?;
                let created_at: String = row.get(7)?;
                Ok(Signal {
                    id: None,
                    tenant_id: row.get(0)?,
                    service_name: row.get(1)?,
                    endpoint: row.get(2)?,
                    status: SignalStatus::parse(&status_str).unwrap_or(SignalStatus::Success),
                    latency_ms: row.get(4)?,
                    priority: Priority::parse(&priority_str).unwrap_or_default(),
                    customer_identifier: row.get(6)?,
                    timestamp: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            },
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("reading recent signals")
    }

    /// Delete raw Signals older than `days` (§4.4 Cleanup).
    pub fn delete_signals_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let affected = conn.execute(
            "DELETE FROM signals WHERE created_at < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(affected)
    }

    /// Distinct (tenant, service, endpoint) combinations with at least one
    /// signal in [start, end). Used by the hourly rollup worker.
    pub fn distinct_endpoints_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<(String, String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT tenant_id, service_name, endpoint FROM signals
             WHERE created_at >= ?1 AND created_at < ?2",
        )?;
        let rows = stmt.query_map(params![start.to_rfc3339(), end.to_rfc3339()], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("reading distinct endpoints")
    }

    pub fn signals_in_range(
        &self,
        tenant_id: &str,
        service_name: &str,
        endpoint: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Signal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT tenant_id, service_name, endpoint, status, latency_ms, priority, customer_identifier, created_at
             FROM signals
             WHERE tenant_id = ?1 AND service_name = ?2 AND endpoint = ?3
               AND created_at >= ?4 AND created_at < ?5",
        )?;
        let rows = stmt.query_map(
            params![
                tenant_id,
                service_name,
                endpoint,
                start.to_rfc3339(),
                end.to_rfc3339()
            ],
            |row| {
                let status_str: String = row.get(3)?;
                let priority_str: String = row.get(5)?;
                let created_at: String = row.get(7)?;
                Ok(Signal {
                    id: None,
                    tenant_id: row.get(0)?,
                    service_name: row.get(1)?,
                    endpoint: row.get(2)?,
                    status: SignalStatus::parse(&status_str).unwrap_or(SignalStatus::Success),
                    latency_ms: row.get(4)?,
                    priority: Priority::parse(&priority_str).unwrap_or_default(),
                    customer_identifier: row.get(6)?,
                    timestamp: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            },
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("reading signals in range")
    }

    pub fn upsert_hourly_rollup(&self, row: &RollupRow) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO hourly_rollups
                (tenant_id, service_name, endpoint, bucket_start, total_requests, error_count,
                 avg_latency_ms, min_latency_ms, max_latency_ms, p50_latency_ms, p95_latency_ms, p99_latency_ms)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT(tenant_id, service_name, endpoint, bucket_start) DO UPDATE SET
                total_requests=excluded.total_requests,
                error_count=excluded.error_count,
                avg_latency_ms=excluded.avg_latency_ms,
                min_latency_ms=excluded.min_latency_ms,
                max_latency_ms=excluded.max_latency_ms,
                p50_latency_ms=excluded.p50_latency_ms,
                p95_latency_ms=excluded.p95_latency_ms,
                p99_latency_ms=excluded.p99_latency_ms",
            params![
                row.tenant_id,
                row.service_name,
                row.endpoint,
                row.bucket_start.to_rfc3339(),
                row.total_requests as i64,
                row.error_count as i64,
                row.avg_latency_ms,
                row.min_latency_ms,
                row.max_latency_ms,
                row.p50_latency_ms,
                row.p95_latency_ms,
                row.p99_latency_ms,
            ],
        )?;
        Ok(())
    }

    pub fn hourly_rollups_for_day(
        &self,
        tenant_id: &str,
        service_name: &str,
        endpoint: &str,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> Result<Vec<RollupRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT tenant_id, service_name, endpoint, bucket_start, total_requests, error_count,
                    avg_latency_ms, min_latency_ms, max_latency_ms, p50_latency_ms, p95_latency_ms, p99_latency_ms
             FROM hourly_rollups
             WHERE tenant_id = ?1 AND service_name = ?2 AND endpoint = ?3
               AND bucket_start >= ?4 AND bucket_start < ?5
             ORDER BY bucket_start ASC",
        )?;
        let rows = stmt.query_map(
            params![
                tenant_id,
                service_name,
                endpoint,
                day_start.to_rfc3339(),
                day_end.to_rfc3339()
            ],
            RollupRow::from_row,
        )?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("reading hourly rollups")
    }

    pub fn distinct_endpoints_with_hourly_rollups(
        &self,
        day_start: DateTime<Utc>,
        day_end: DateTime<Utc>,
    ) -> Result<Vec<(String, String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT tenant_id, service_name, endpoint FROM hourly_rollups
             WHERE bucket_start >= ?1 AND bucket_start < ?2",
        )?;
        let rows = stmt.query_map(params![day_start.to_rfc3339(), day_end.to_rfc3339()], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .context("reading endpoints with hourly rollups")
    }

    pub fn upsert_daily_rollup(&self, row: &RollupRow) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO daily_rollups
                (tenant_id, service_name, endpoint, bucket_start, total_requests, error_count,
                 avg_latency_ms, min_latency_ms, max_latency_ms, p50_latency_ms, p95_latency_ms, p99_latency_ms)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT(tenant_id, service_name, endpoint, bucket_start) DO UPDATE SET
                total_requests=excluded.total_requests,
                error_count=excluded.error_count,
                avg_latency_ms=excluded.avg_latency_ms,
                min_latency_ms=excluded.min_latency_ms,
                max_latency_ms=excluded.max_latency_ms,
                p50_latency_ms=excluded.p50_latency_ms,
                p95_latency_ms=excluded.p95_latency_ms,
                p99_latency_ms=excluded.p99_latency_ms",
            params![
                row.tenant_id,
                row.service_name,
                row.endpoint,
                row.bucket_start.to_rfc3339(),
                row.total_requests as i64,
                row.error_count as i64,
                row.avg_latency_ms,
                row.min_latency_ms,
                row.max_latency_ms,
                row.p50_latency_ms,
                row.p95_latency_ms,
                row.p99_latency_ms,
            ],
        )?;
        Ok(())
    }

    pub fn delete_hourly_rollups_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM hourly_rollups WHERE bucket_start < ?1",
            params![cutoff.to_rfc3339()],
        )?)
    }

    pub fn insert_snapshot(&self, snap: &SnapshotRow) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO aggregate_snapshots
                (tenant_id, service_name, endpoint, window, count, sum_latency_ms, error_count,
                 p50_latency_ms, p95_latency_ms, p99_latency_ms, snapshot_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                snap.tenant_id,
                snap.service_name,
                snap.endpoint,
                snap.window,
                snap.count as i64,
                snap.sum_latency_ms,
                snap.error_count as i64,
                snap.p50_latency_ms,
                snap.p95_latency_ms,
                snap.p99_latency_ms,
                snap.snapshot_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn latest_snapshot(
        &self,
        tenant_id: &str,
        service_name: &str,
        endpoint: &str,
        window: &str,
    ) -> Result<Option<SnapshotRow>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT tenant_id, service_name, endpoint, window, count, sum_latency_ms, error_count,
                    p50_latency_ms, p95_latency_ms, p99_latency_ms, snapshot_at
             FROM aggregate_snapshots
             WHERE tenant_id = ?1 AND service_name = ?2 AND endpoint = ?3 AND window = ?4
             ORDER BY snapshot_at DESC LIMIT 1",
            params![tenant_id, service_name, endpoint, window],
            SnapshotRow::from_row,
        )
        .optional()
        .context("reading latest snapshot")
    }

    pub fn delete_snapshots_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM aggregate_snapshots WHERE snapshot_at < ?1",
            params![cutoff.to_rfc3339()],
        )?)
    }

    /// Upsert a Threshold Record (§4.3). Caller has already validated ranges
    /// and the shed>queue invariant.
    pub fn upsert_threshold(
        &self,
        tenant_id: &str,
        service_name: &str,
        endpoint: &str,
        record: &ThresholdRecord,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ai_thresholds
                (tenant_id, service_name, endpoint, cache_latency_ms, breaker_error_rate, queue_rpm,
                 shed_rpm, per_client_rpm, confidence, reasoning, source, last_updated)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT(tenant_id, service_name, endpoint) DO UPDATE SET
                cache_latency_ms=excluded.cache_latency_ms,
                breaker_error_rate=excluded.breaker_error_rate,
                queue_rpm=excluded.queue_rpm,
                shed_rpm=excluded.shed_rpm,
                per_client_rpm=excluded.per_client_rpm,
                confidence=excluded.confidence,
                reasoning=excluded.reasoning,
                source=excluded.source,
                last_updated=excluded.last_updated",
            params![
                tenant_id,
                service_name,
                endpoint,
                record.cache_latency_ms,
                record.breaker_error_rate,
                record.queue_rpm,
                record.shed_rpm,
                record.per_client_rpm,
                record.confidence,
                record.reasoning,
                record.source.as_str(),
                record.last_updated.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn read_threshold(
        &self,
        tenant_id: &str,
        service_name: &str,
        endpoint: &str,
    ) -> Result<Option<ThresholdRecord>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT cache_latency_ms, breaker_error_rate, queue_rpm, shed_rpm, per_client_rpm,
                    confidence, reasoning, source, last_updated
             FROM ai_thresholds WHERE tenant_id = ?1 AND service_name = ?2 AND endpoint = ?3",
            params![tenant_id, service_name, endpoint],
            |row| {
                let source_str: String = row.get(7)?;
                let last_updated: String = row.get(8)?;
                Ok(ThresholdRecord {
                    cache_latency_ms: row.get(0)?,
                    breaker_error_rate: row.get(1)?,
                    queue_rpm: row.get(2)?,
                    shed_rpm: row.get(3)?,
                    per_client_rpm: row.get(4)?,
                    confidence: row.get(5)?,
                    reasoning: row.get(6)?,
                    source: if source_str == "tuned" {
                        ThresholdSource::Tuned
                    } else {
                        ThresholdSource::Default
                    },
                    last_updated: DateTime::parse_from_rfc3339(&last_updated)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            },
        )
        .optional()
        .context("reading threshold record")
    }

    pub fn insert_insight(&self, insight: &InsightRow) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ai_insights
                (tenant_id, service_name, endpoint, summary, patterns_json, anomalies_json,
                 threshold_confidence, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                insight.tenant_id,
                insight.service_name,
                insight.endpoint,
                insight.summary,
                insight.patterns_json,
                insight.anomalies_json,
                insight.threshold_confidence,
                insight.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Lookup an API key's bound tenant, updating `last_used_at` only on a
    /// successful, non-revoked match (§7 Authentication/authorisation).
    pub fn lookup_api_key(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let tenant: Option<(String, bool)> = conn
            .query_row(
                "SELECT tenant_id, revoked FROM api_keys WHERE key = ?1",
                params![key],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? != 0)),
            )
            .optional()?;
        match tenant {
            Some((tenant_id, revoked)) if !revoked => {
                conn.execute(
                    "UPDATE api_keys SET last_used_at = ?1 WHERE key = ?2",
                    params![Utc::now().to_rfc3339(), key],
                )?;
                Ok(Some(tenant_id))
            }
            _ => Ok(None),
        }
    }

    /// Seed one API key bound to a tenant. Identity issuance itself is an
    /// out-of-scope collaborator (§1); this exists so the service is usable
    /// standalone without a separate issuance system.
    pub fn seed_api_key(&self, key: &str, tenant_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO api_keys (id, key, tenant_id, revoked, created_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![
                uuid::Uuid::new_v4().to_string(),
                key,
                tenant_id,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RollupRow {
    pub tenant_id: String,
    pub service_name: String,
    pub endpoint: String,
    pub bucket_start: DateTime<Utc>,
    pub total_requests: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: f64,
    pub max_latency_ms: f64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
}

impl RollupRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let bucket_start: String = row.get(3)?;
        Ok(Self {
            tenant_id: row.get(0)?,
            service_name: row.get(1)?,
            endpoint: row.get(2)?,
            bucket_start: DateTime::parse_from_rfc3339(&bucket_start)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            total_requests: row.get::<_, i64>(4)? as u64,
            error_count: row.get::<_, i64>(5)? as u64,
            avg_latency_ms: row.get(6)?,
            min_latency_ms: row.get(7)?,
            max_latency_ms: row.get(8)?,
            p50_latency_ms: row.get(9)?,
            p95_latency_ms: row.get(10)?,
            p99_latency_ms: row.get(11)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub tenant_id: String,
    pub service_name: String,
    pub endpoint: String,
    pub window: String,
    pub count: u64,
    pub sum_latency_ms: f64,
    pub error_count: u64,
    pub p50_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub p99_latency_ms: f64,
    pub snapshot_at: DateTime<Utc>,
}

impl SnapshotRow {
    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let snapshot_at: String = row.get(10)?;
        Ok(Self {
            tenant_id: row.get(0)?,
            service_name: row.get(1)?,
            endpoint: row.get(2)?,
            window: row.get(3)?,
            count: row.get::<_, i64>(4)? as u64,
            sum_latency_ms: row.get(5)?,
            error_count: row.get::<_, i64>(6)? as u64,
            p50_latency_ms: row.get(7)?,
            p95_latency_ms: row.get(8)?,
            p99_latency_ms: row.get(9)?,
            snapshot_at: DateTime::parse_from_rfc3339(&snapshot_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }

    pub fn avg_latency_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_latency_ms / self.count as f64
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Clone)]
pub struct InsightRow {
    pub tenant_id: String,
    pub service_name: String,
    pub endpoint: String,
    pub summary: String,
    pub patterns_json: String,
    pub anomalies_json: String,
    pub threshold_confidence: f64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalStatus;

    #[test]
    fn insert_and_read_back_signal() {
        let store = DurableStore::in_memory().unwrap();
        let signal = Signal::new("tenant-a", "svc", "/ep", SignalStatus::Success, 42.0);
        store.insert_signal(&signal).unwrap();
        let recent = store.recent_signals("tenant-a", "svc", "/ep", 10).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].latency_ms, 42.0);
    }

    #[test]
    fn threshold_upsert_round_trip() {
        let store = DurableStore::in_memory().unwrap();
        let record = ThresholdRecord::defaults();
        store
            .upsert_threshold("tenant-a", "svc", "/ep", &record)
            .unwrap();
        let read = store
            .read_threshold("tenant-a", "svc", "/ep")
            .unwrap()
            .unwrap();
        assert_eq!(read.shed_rpm, 150.0);
        assert_eq!(read.source, ThresholdSource::Default);
    }

    #[test]
    fn api_key_lookup_updates_last_used_only_on_success() {
        let store = DurableStore::in_memory().unwrap();
        store.seed_api_key("key-1", "tenant-a").unwrap();
        assert_eq!(
            store.lookup_api_key("key-1").unwrap(),
            Some("tenant-a".to_string())
        );
        assert_eq!(store.lookup_api_key("nope").unwrap(), None);
    }
}
