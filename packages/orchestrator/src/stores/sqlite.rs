//! SQLite storage implementation.
//!
//! A file-based backend that survives process restarts. Several processes
//! may share one database file: every write is a single upsert statement,
//! so concurrent writers queue on SQLite's lock instead of overwriting each
//! other.
//!
//! Tables:
//! - `checkpoints` - one record per job id, overwritten in place
//! - `jobs` - ledger job records, indexed by scope and creation time
//! - `completed_work` - finished work, indexed by scope and completion time
//! - `results` - final assembled results
//!
//! Timestamps are stored as microseconds since the epoch so range queries
//! compare integers.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::debug;

use crate::checkpoint::CheckpointRecord;
use crate::error::{StoreError, StoreResult};
use crate::guard::normalize_subject;
use crate::links::LinkCandidate;
use crate::traits::store::{
    CheckpointStore, CompletedWork, JobRecord, JobStatus, LinkSource, ResultSink, SubmissionLedger,
};
use crate::types::ids::JobId;
use crate::types::result::JobResult;

/// How long a writer waits for another connection's lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite-based engine store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) a database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        debug!(path = %path.display(), "sqlite store opened");
        Self::with_pool(pool).await
    }

    /// Create a store from a connection URL.
    ///
    /// # Example URLs
    /// - `sqlite://orchestrator.db?mode=rwc` - File-based, created if missing
    /// - `sqlite::memory:` - Use [`SqliteStore::in_memory`] instead
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_err)?
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        Self::with_pool(pool).await
    }

    /// Create an in-memory store (for testing).
    ///
    /// Each SQLite connection gets its own in-memory database, so the pool
    /// holds exactly one connection for the life of the store.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(db_err)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(db_err)?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                job_id TEXT PRIMARY KEY,
                saved_at INTEGER NOT NULL,
                record TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_checkpoints_saved_at ON checkpoints(saved_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                scope TEXT NOT NULL,
                subject TEXT NOT NULL,
                subject_key TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_scope_created ON jobs(scope, created_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS completed_work (
                job_id TEXT PRIMARY KEY,
                scope TEXT NOT NULL,
                subject TEXT NOT NULL,
                subject_key TEXT NOT NULL,
                locator TEXT NOT NULL,
                title TEXT,
                completed_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_completed_scope_at ON completed_work(scope, completed_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS results (
                job_id TEXT PRIMARY KEY,
                result TEXT NOT NULL,
                persisted_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Load a persisted result.
    pub async fn read_result(&self, job_id: JobId) -> StoreResult<Option<JobResult>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT result FROM results WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn parse_job_id(raw: &str) -> StoreResult<JobId> {
    raw.parse()
        .map_err(|_| StoreError::Unavailable(format!("invalid job id in store: {raw}")))
}

fn from_micros(micros: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Unavailable(format!("invalid timestamp in store: {micros}")))
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct JobRow {
    job_id: String,
    scope: String,
    subject: String,
    status: String,
    created_at: i64,
    updated_at: i64,
}

impl JobRow {
    fn into_record(self) -> StoreResult<JobRecord> {
        Ok(JobRecord {
            job_id: parse_job_id(&self.job_id)?,
            scope: self.scope,
            subject: self.subject,
            status: JobStatus::from_str(&self.status).map_err(StoreError::Unavailable)?,
            created_at: from_micros(self.created_at)?,
            updated_at: from_micros(self.updated_at)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct CompletedRow {
    job_id: String,
    scope: String,
    subject: String,
    locator: String,
    title: Option<String>,
    completed_at: i64,
}

impl CompletedRow {
    fn into_work(self) -> StoreResult<CompletedWork> {
        Ok(CompletedWork {
            job_id: parse_job_id(&self.job_id)?,
            scope: self.scope,
            subject: self.subject,
            locator: self.locator,
            title: self.title,
            completed_at: from_micros(self.completed_at)?,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn read_checkpoint(&self, job_id: JobId) -> StoreResult<Option<CheckpointRecord>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT record FROM checkpoints WHERE job_id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        match row {
            Some((json,)) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write_checkpoint(&self, job_id: JobId, record: &CheckpointRecord) -> StoreResult<()> {
        let json = serde_json::to_string(record)?;
        sqlx::query(
            r#"
            INSERT INTO checkpoints (job_id, saved_at, record)
            VALUES (?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                saved_at = excluded.saved_at,
                record = excluded.record
            "#,
        )
        .bind(job_id.to_string())
        .bind(record.saved_at.timestamp_micros())
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn delete_checkpoint(&self, job_id: JobId) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE job_id = ?")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn sweep_checkpoints(&self, saved_before: DateTime<Utc>) -> StoreResult<usize> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE saved_at < ?")
            .bind(saved_before.timestamp_micros())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl SubmissionLedger for SqliteStore {
    async fn completed_since(&self, scope: &str, since: DateTime<Utc>) -> StoreResult<Vec<CompletedWork>> {
        let rows = sqlx::query_as::<_, CompletedRow>(
            r#"
            SELECT job_id, scope, subject, locator, title, completed_at
            FROM completed_work
            WHERE scope = ? AND completed_at >= ?
            ORDER BY completed_at DESC
            "#,
        )
        .bind(scope)
        .bind(since.timestamp_micros())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(CompletedRow::into_work).collect()
    }

    async fn jobs_since(&self, scope: &str, since: DateTime<Utc>) -> StoreResult<Vec<JobRecord>> {
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT job_id, scope, subject, status, created_at, updated_at
            FROM jobs
            WHERE scope = ? AND created_at >= ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(scope)
        .bind(since.timestamp_micros())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(JobRow::into_record).collect()
    }

    async fn upsert_job(&self, record: &JobRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, scope, subject, subject_key, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                scope = excluded.scope,
                subject = excluded.subject,
                subject_key = excluded.subject_key,
                status = excluded.status,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.job_id.to_string())
        .bind(&record.scope)
        .bind(&record.subject)
        .bind(normalize_subject(&record.subject))
        .bind(record.status.as_str())
        .bind(record.created_at.timestamp_micros())
        .bind(record.updated_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn record_completed(&self, work: &CompletedWork) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO completed_work (job_id, scope, subject, subject_key, locator, title, completed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                scope = excluded.scope,
                subject = excluded.subject,
                subject_key = excluded.subject_key,
                locator = excluded.locator,
                title = excluded.title,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(work.job_id.to_string())
        .bind(&work.scope)
        .bind(&work.subject)
        .bind(normalize_subject(&work.subject))
        .bind(&work.locator)
        .bind(&work.title)
        .bind(work.completed_at.timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[async_trait]
impl ResultSink for SqliteStore {
    async fn persist_result(&self, result: &JobResult) -> StoreResult<()> {
        let json = serde_json::to_string(result)?;
        sqlx::query(
            r#"
            INSERT INTO results (job_id, result, persisted_at)
            VALUES (?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                result = excluded.result,
                persisted_at = excluded.persisted_at
            "#,
        )
        .bind(result.job_id.to_string())
        .bind(json)
        .bind(Utc::now().timestamp_micros())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}

#[async_trait]
impl LinkSource for SqliteStore {
    async fn internal_candidates(
        &self,
        scope: &str,
        exclude_subject: &str,
        limit: usize,
    ) -> StoreResult<Vec<LinkCandidate>> {
        let rows = sqlx::query_as::<_, CompletedRow>(
            r#"
            SELECT job_id, scope, subject, locator, title, completed_at
            FROM completed_work
            WHERE scope = ? AND subject_key != ?
            ORDER BY completed_at DESC
            LIMIT ?
            "#,
        )
        .bind(scope)
        .bind(normalize_subject(exclude_subject))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|row| row.into_work().map(|work| LinkCandidate::from(&work)))
            .collect()
    }
}
