//! Job ledger: the only shared state between crawl workers.
//!
//! Every worker coordinates exclusively through conditional updates on the
//! ledger. There is no scheduler process and no worker-to-worker messaging.
//!
//! - [`PostgresJobLedger`] - production ledger, claims with `FOR UPDATE SKIP LOCKED`
//! - [`MemoryJobLedger`] - same semantics in process, for tests and dry runs
//!
//! # Status lifecycle
//!
//! ```text
//! (no row) ──insert_if_absent──► pending ──claim──► in_progress ──► done
//!     │                                                 ├──► error
//!     └──────────reserve───────────────────────────────►├──► stale
//!                                                       └──► skipped
//! ```
//!
//! Only `in_progress` rows move forward. Nothing returns to `pending`, and
//! terminal statuses never transition again.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::LedgerResult;

pub use memory::MemoryJobLedger;
pub use postgres::PostgresJobLedger;

/// Identifier in the crawled numeric space.
pub type JobId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Done,
    Error,
    Stale,
    Skipped,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::InProgress,
        JobStatus::Done,
        JobStatus::Error,
        JobStatus::Stale,
        JobStatus::Skipped,
    ];

    /// Whether the job has left active work for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Error | JobStatus::Stale | JobStatus::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Done => "done",
            JobStatus::Error => "error",
            JobStatus::Stale => "stale",
            JobStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ledger row.
#[derive(FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    /// Owner token of the worker that last moved the job into `in_progress`.
    /// Advisory only; `status` alone decides exclusivity.
    pub owner: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Number of jobs currently in one status.
#[derive(FromRow, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: JobStatus,
    pub count: i64,
}

/// Atomic operations over the shared job table.
///
/// Implementations must guarantee that at most one caller ever moves a given
/// job into `in_progress`, and must never move a job out of a terminal
/// status. Any error is a store failure and is fatal to the caller.
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Claim the lowest pending job for `owner`, skipping rows other
    /// claimants are examining instead of waiting on them.
    async fn claim_next_pending(&self, owner: &str) -> LedgerResult<Option<JobId>>;

    /// Create a `pending` row unless one exists. Returns whether it was created.
    async fn insert_if_absent(&self, id: JobId) -> LedgerResult<bool>;

    /// Create the row directly as `in_progress` for `owner` unless one exists.
    /// Returns whether this caller created it.
    async fn reserve(&self, id: JobId, owner: &str) -> LedgerResult<bool>;

    /// Move one specific job from `pending` to `in_progress`.
    /// Returns `false` if the job is missing or no longer pending.
    async fn claim(&self, id: JobId, owner: &str) -> LedgerResult<bool>;

    async fn get_status(&self, id: JobId) -> LedgerResult<Option<JobStatus>>;

    async fn get(&self, id: JobId) -> LedgerResult<Option<Job>>;

    /// Transition an `in_progress` job to `status`.
    ///
    /// Re-setting the current status is harmless. A `pending` target, a
    /// job that was never claimed, and a terminal job asked to change are
    /// all refused and reported as `false`.
    async fn set_status(&self, id: JobId, status: JobStatus) -> LedgerResult<bool>;

    /// Cheap probe for any pending work.
    async fn has_pending(&self) -> LedgerResult<bool>;

    /// Per-status totals, for observability.
    async fn status_counts(&self) -> LedgerResult<Vec<StatusCount>>;
}
