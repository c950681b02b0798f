//! Typed errors for the crawl worker.
//!
//! Only [`LedgerError`] is fatal. Fetch, resource and sink errors are
//! absorbed by the chain walker and turned into terminal job statuses or
//! log lines, so they never reach [`CrawlError`].

use thiserror::Error;

use crate::ledger::JobId;

/// Errors from the job ledger store.
///
/// A worker cannot guarantee exclusivity without the ledger, so these
/// always stop the worker.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Query or connection failure
    #[error("ledger database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failure
    #[error("ledger migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Transient failures while fetching a rendered document.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure
    #[error("HTTP error fetching {id}: {source}")]
    Http {
        id: JobId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Upstream answered with a non-success status (often throttling)
    #[error("upstream returned {status} for {id}")]
    Status { id: JobId, status: u16 },

    /// Fetch exceeded its time budget
    #[error("timed out fetching {id}")]
    Timeout { id: JobId },

    /// The renderer produced nothing usable
    #[error("render failed for {id}: {reason}")]
    Render { id: JobId, reason: String },
}

/// Failures downloading a single extracted resource.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("HTTP error downloading {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("upstream returned {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("empty body for {url}")]
    Empty { url: String },
}

/// Failures persisting an artifact.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact rejected: {reason}")]
    Rejected { reason: String },
}

/// Errors that stop a chain or the run loop.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Result type alias for chain and run-loop operations.
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;
