//! PostgreSQL-backed job ledger.
//!
//! All writes are single statements, so each one is its own transaction.
//! Claiming selects the lowest pending id with `FOR UPDATE SKIP LOCKED` so
//! concurrent workers step over each other's candidate rows instead of
//! queueing behind them.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;

use super::{Job, JobId, JobLedger, JobStatus, StatusCount};
use crate::error::LedgerResult;

pub struct PostgresJobLedger {
    pool: PgPool,
}

impl PostgresJobLedger {
    /// Connect a new pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::from_pool(pool))
    }

    /// Reuse an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl JobLedger for PostgresJobLedger {
    async fn claim_next_pending(&self, owner: &str) -> LedgerResult<Option<JobId>> {
        let id = sqlx::query_scalar::<_, JobId>(
            r#"
            WITH next_job AS (
                SELECT id
                FROM crawl_jobs
                WHERE status = 'pending'
                ORDER BY id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE crawl_jobs
            SET status = 'in_progress',
                owner = $1,
                updated_at = NOW()
            FROM next_job
            WHERE crawl_jobs.id = next_job.id
              AND crawl_jobs.status = 'pending'
            RETURNING crawl_jobs.id
            "#,
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        debug!(owner = %owner, job_id = ?id, "claim_next_pending");
        Ok(id)
    }

    async fn insert_if_absent(&self, id: JobId) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO crawl_jobs (id, status, updated_at)
            VALUES ($1, 'pending', NOW())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reserve(&self, id: JobId, owner: &str) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO crawl_jobs (id, status, owner, updated_at)
            VALUES ($1, 'in_progress', $2, NOW())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim(&self, id: JobId, owner: &str) -> LedgerResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = 'in_progress',
                owner = $2,
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_status(&self, id: JobId) -> LedgerResult<Option<JobStatus>> {
        let status =
            sqlx::query_scalar::<_, JobStatus>("SELECT status FROM crawl_jobs WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(status)
    }

    async fn get(&self, id: JobId) -> LedgerResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(
            "SELECT id, status, owner, updated_at FROM crawl_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn set_status(&self, id: JobId, status: JobStatus) -> LedgerResult<bool> {
        // Only claim paths may create pending work
        if status == JobStatus::Pending {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE crawl_jobs
            SET status = $2,
                updated_at = NOW()
            WHERE id = $1
              AND (status = 'in_progress' OR status = $2)
            "#,
        )
        .bind(id)
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn has_pending(&self) -> LedgerResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM crawl_jobs WHERE status = 'pending')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn status_counts(&self) -> LedgerResult<Vec<StatusCount>> {
        let counts = sqlx::query_as::<_, StatusCount>(
            r#"
            SELECT status, COUNT(*) AS count
            FROM crawl_jobs
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(counts)
    }
}
