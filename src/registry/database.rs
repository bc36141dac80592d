//! Registry Database Module
//!
//! Owns the SQLite connection pool and the schema. Every record kind lives in
//! its own table keyed by its opaque id:
//! - `file_batches`: published batches
//! - `pending_payments`: open purchases, with a UNIQUE constraint on `unique_amount`
//! - `draft_sessions` / `edit_sessions`: TTL-bearing conversational state
//! - `scheduled_jobs`: durable timers
//!
//! Timestamps are stored as unix milliseconds, decimals and ids as text and
//! file lists as JSON arrays.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS file_batches (
        id          TEXT PRIMARY KEY,
        owner_id    INTEGER NOT NULL,
        file_refs   TEXT NOT NULL,
        is_paid     BOOLEAN NOT NULL,
        price       TEXT,
        payee_ref   TEXT,
        payee_name  TEXT,
        created_at  INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pending_payments (
        id               TEXT PRIMARY KEY,
        batch_id         TEXT NOT NULL,
        buyer_id         INTEGER NOT NULL,
        unique_amount    TEXT NOT NULL UNIQUE,
        status           TEXT NOT NULL,
        confirm_job_id   TEXT,
        approval_job_id  TEXT,
        created_at       INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS draft_sessions (
        creator_id     INTEGER PRIMARY KEY,
        file_refs      TEXT NOT NULL,
        menu_chat      INTEGER,
        menu_message   INTEGER,
        last_activity  INTEGER NOT NULL,
        expires_at     INTEGER NOT NULL,
        version        INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS edit_sessions (
        batch_id         TEXT PRIMARY KEY,
        owner_id         INTEGER NOT NULL,
        file_refs        TEXT NOT NULL,
        prompt_chat      INTEGER,
        prompt_message   INTEGER,
        accepting_files  BOOLEAN NOT NULL,
        last_activity    INTEGER NOT NULL,
        expires_at       INTEGER NOT NULL,
        version          INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS edit_sessions_owner ON edit_sessions (owner_id)",
    r#"
    CREATE TABLE IF NOT EXISTS scheduled_jobs (
        id           TEXT PRIMARY KEY,
        kind         TEXT NOT NULL,
        fire_at      INTEGER NOT NULL,
        payload      TEXT NOT NULL,
        lease_until  INTEGER,
        created_at   INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS scheduled_jobs_fire_at ON scheduled_jobs (fire_at)",
];

/// Persistent record store
///
/// All mutations that matter are conditional writes (insert-if-absent,
/// update/delete guarded by status or version) so the request path and the
/// job dispatcher can share records without exclusive access.
pub struct Registry {
    pool: SqlitePool,
}

impl Registry {
    /// Opens (creating if needed) the database at `url` and applies the schema
    ///
    /// # Arguments
    /// * `url` - sqlx SQLite URL, e.g. `sqlite://paylink.db` or `sqlite::memory:`
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database lives and dies with its connection, so it
        // gets exactly one that is never recycled.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_options.connect_with(options).await?;

        let registry = Self { pool };
        registry.migrate().await?;
        info!(url, "registry ready");
        Ok(registry)
    }

    /// Fresh private in-memory database
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Round-trips a trivial query
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| Error::integrity(format!("timestamp {ms} out of range")))
}
