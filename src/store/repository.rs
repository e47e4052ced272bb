//! Dedup Store Repository
//!
//! Durable deduplication store over an embedded SQLite file. Holds the
//! processed-marker table, the stored-event payload table and the
//! counter table. The atomic check-and-mark on the marker table is what
//! turns the transport's at-least-once delivery into exactly-once
//! processing, so that operation must never degrade into a
//! read-then-write.

use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use super::StoreError;

/// Durable counter keys
pub const RECEIVED: &str = "received";
pub const UNIQUE_PROCESSED: &str = "unique_processed";
pub const DUPLICATE_DROPPED: &str = "duplicate_dropped";

/// Database file name inside the data directory
const DB_FILE: &str = "events.db";

/// Checkpoint mode: number of mutations between WAL checkpoints
const CHECKPOINT_EVERY: u64 = 100;

/// Query limits are clamped to this range
const QUERY_LIMIT_MIN: i64 = 1;
const QUERY_LIMIT_MAX: i64 = 1000;

/// Durability mode, selected at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Every successful mutation is durable before the call returns
    Strict,
    /// Mutations are journaled with ordered writes; the journal is
    /// fsynced every [`CHECKPOINT_EVERY`] mutations and on close. A
    /// worst-case OS crash loses the tail since the last checkpoint.
    #[default]
    Checkpoint,
}

impl FromStr for DurabilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(DurabilityMode::Strict),
            "checkpoint" => Ok(DurabilityMode::Checkpoint),
            other => Err(format!("Unknown durability mode: '{other}'")),
        }
    }
}

/// Outcome of an atomic check-and-mark
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seen {
    /// The key had never been marked before this call
    New,
    /// The key was already marked
    Duplicate,
}

/// An event as persisted on first sight.
///
/// Immutable once written; duplicates never overwrite. `timestamp` is
/// the publisher's submitted string, `processed_at` is the aggregator's
/// clock at storage time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub topic: String,
    pub event_id: String,
    pub timestamp: String,
    pub source: String,
    pub payload: serde_json::Value,
    pub processed_at: DateTime<Utc>,
}

/// Handle to the dedup store.
///
/// Cheap to clone; all clones share one pool. Concurrent use is
/// serialized by SQLite itself, so callers need no locks of their own.
#[derive(Debug, Clone)]
pub struct DedupStore {
    pool: SqlitePool,
    mode: DurabilityMode,
    mutations: Arc<AtomicU64>,
}

impl DedupStore {
    // =========================================================================
    // open / close
    // =========================================================================

    /// Open the store in `data_dir`, creating directory and schema as
    /// needed and reconciling any state a prior crash left behind.
    pub async fn open(data_dir: &Path, mode: DurabilityMode) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir)?;

        let synchronous = match mode {
            DurabilityMode::Strict => SqliteSynchronous::Full,
            DurabilityMode::Checkpoint => SqliteSynchronous::Normal,
        };

        let options = SqliteConnectOptions::new()
            .filename(data_dir.join(DB_FILE))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(synchronous)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            mode,
            mutations: Arc::new(AtomicU64::new(0)),
        };

        store.create_schema().await?;
        store.recover().await?;

        Ok(store)
    }

    /// Flush and release the store. All mutations that returned before
    /// this call are durable once it completes.
    pub async fn close(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        self.pool.close().await;
        Ok(())
    }

    /// Create the schema if absent. Safe to run on every open.
    async fn create_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_events (
                topic         TEXT NOT NULL,
                event_id      TEXT NOT NULL,
                first_seen_at TEXT NOT NULL,
                PRIMARY KEY (topic, event_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_payloads (
                topic        TEXT NOT NULL,
                event_id     TEXT NOT NULL,
                timestamp    TEXT NOT NULL,
                source       TEXT NOT NULL,
                payload      TEXT NOT NULL,
                processed_at TEXT NOT NULL,
                PRIMARY KEY (topic, event_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_event_payloads_timestamp
            ON event_payloads (timestamp DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS system_stats (
                key   TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reconcile after a prior crash. A marker written without its
    /// payload row is removed, and `unique_processed` is re-seated to
    /// the stored-event count, so markers, payloads and counters agree
    /// again before anything else touches the store.
    async fn recover(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let orphans = sqlx::query(
            r#"
            DELETE FROM processed_events
            WHERE NOT EXISTS (
                SELECT 1 FROM event_payloads
                WHERE event_payloads.topic = processed_events.topic
                  AND event_payloads.event_id = processed_events.event_id
            )
            "#,
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            INSERT INTO system_stats (key, value)
            VALUES ($1, (SELECT COUNT(*) FROM event_payloads))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(UNIQUE_PROCESSED)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if orphans > 0 {
            tracing::warn!(orphans, "Removed markers left behind by an interrupted run");
        }

        Ok(())
    }

    // =========================================================================
    // check_and_mark
    // =========================================================================

    /// Atomically record `(topic, event_id)` as processed.
    ///
    /// Returns [`Seen::New`] iff no marker existed before this call.
    /// Concurrent callers for the same key see exactly one `New`; the
    /// unique constraint on the marker table is the arbiter, not any
    /// application-level check.
    pub async fn check_and_mark(&self, topic: &str, event_id: &str) -> Result<Seen, StoreError> {
        let rows = sqlx::query(
            r#"
            INSERT OR IGNORE INTO processed_events (topic, event_id, first_seen_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(topic)
        .bind(event_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?
        .rows_affected();

        self.note_mutation().await;

        Ok(if rows == 1 { Seen::New } else { Seen::Duplicate })
    }

    /// Remove a marker whose payload write failed, so a publisher retry
    /// of that event is seen as new again. Single-consumer discipline:
    /// only the worker that observed `New` may call this.
    pub async fn unmark(&self, topic: &str, event_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM processed_events WHERE topic = $1 AND event_id = $2")
            .bind(topic)
            .bind(event_id)
            .execute(&self.pool)
            .await?;

        self.note_mutation().await;

        Ok(())
    }

    // =========================================================================
    // store_event
    // =========================================================================

    /// Persist a stored event under its composite key.
    ///
    /// Storing under an existing key is a silent no-op; an already
    /// stored event is never overwritten.
    pub async fn store_event(&self, event: &StoredEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO event_payloads
                (topic, event_id, timestamp, source, payload, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&event.topic)
        .bind(&event.event_id)
        .bind(&event.timestamp)
        .bind(&event.source)
        .bind(&event.payload)
        .bind(event.processed_at)
        .execute(&self.pool)
        .await?;

        self.note_mutation().await;

        Ok(())
    }

    // =========================================================================
    // counters
    // =========================================================================

    /// Add `delta` to a named counter, creating it at zero first.
    pub async fn increment_counter(&self, name: &str, delta: u64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO system_stats (key, value)
            VALUES ($1, $2)
            ON CONFLICT(key) DO UPDATE SET value = value + excluded.value
            "#,
        )
        .bind(name)
        .bind(delta as i64)
        .execute(&self.pool)
        .await?;

        self.note_mutation().await;

        Ok(())
    }

    /// Read a counter; unseen counters are 0.
    pub async fn load_counter(&self, name: &str) -> Result<u64, StoreError> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM system_stats WHERE key = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value.unwrap_or(0).max(0) as u64)
    }

    // =========================================================================
    // queries
    // =========================================================================

    /// Return up to `limit` stored events, optionally filtered to one
    /// topic, sorted by publisher timestamp descending with the
    /// composite key as a stable tiebreak. `limit` is clamped to
    /// [1, 1000].
    pub async fn query_events(
        &self,
        topic: Option<&str>,
        limit: i64,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let limit = limit.clamp(QUERY_LIMIT_MIN, QUERY_LIMIT_MAX);

        type Row = (
            String,
            String,
            String,
            String,
            serde_json::Value,
            DateTime<Utc>,
        );

        let rows: Vec<Row> = if let Some(topic) = topic {
            sqlx::query_as(
                r#"
                SELECT topic, event_id, timestamp, source, payload, processed_at
                FROM event_payloads
                WHERE topic = $1
                ORDER BY timestamp DESC, topic ASC, event_id ASC
                LIMIT $2
                "#,
            )
            .bind(topic)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(
                r#"
                SELECT topic, event_id, timestamp, source, payload, processed_at
                FROM event_payloads
                ORDER BY timestamp DESC, topic ASC, event_id ASC
                LIMIT $1
                "#,
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows
            .into_iter()
            .map(
                |(topic, event_id, timestamp, source, payload, processed_at)| StoredEvent {
                    topic,
                    event_id,
                    timestamp,
                    source,
                    payload,
                    processed_at,
                },
            )
            .collect())
    }

    /// Distinct topics observed so far, sorted.
    pub async fn topics(&self) -> Result<Vec<String>, StoreError> {
        let topics = sqlx::query_scalar("SELECT DISTINCT topic FROM event_payloads ORDER BY topic")
            .fetch_all(&self.pool)
            .await?;

        Ok(topics)
    }

    // =========================================================================
    // durability bookkeeping
    // =========================================================================

    /// In checkpoint mode, fsync the WAL every [`CHECKPOINT_EVERY`]
    /// mutations. Strict mode syncs on every commit already. The
    /// mutation itself has already committed, so a failed checkpoint
    /// must not fail the call; it only widens the loss window.
    async fn note_mutation(&self) {
        if self.mode != DurabilityMode::Checkpoint {
            return;
        }

        let count = self.mutations.fetch_add(1, Ordering::Relaxed) + 1;
        if count % CHECKPOINT_EVERY == 0 {
            if let Err(error) = sqlx::query("PRAGMA wal_checkpoint(PASSIVE)")
                .execute(&self.pool)
                .await
            {
                tracing::warn!(%error, "WAL checkpoint failed");
            }
        }
    }
}
