//! Leaderless Certificate Crawler
//!
//! Independent worker processes share one job ledger and nothing else.
//! Each worker drains pending jobs, walks sequential chains of identifiers
//! while documents keep matching, and explores the identifier space with
//! randomized forward jumps when the queue is empty.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cert_crawler::{CrawlContext, CrawlSettings, Orchestrator, WorkerIdentity};
//! use cert_crawler::testing::MockCrawl;
//!
//! let crawl = MockCrawl::new();
//! crawl.fetcher.add_cards(500..=510);
//! crawl.ledger.seed(500, JobStatus::Pending);
//!
//! let ctx = crawl.context(WorkerIdentity::fixed("worker-a", 0), CrawlSettings::default());
//! let summary = Orchestrator::new(ctx).run().await?;
//! ```
//!
//! # Modules
//!
//! - [`ledger`] - Job ledger trait, Postgres and in-memory implementations
//! - [`chain`] - Per-identifier state machine
//! - [`explore`] - Candidate selection when no work is pending
//! - [`orchestrator`] - Worker run loop
//! - [`fetch`], [`classify`], [`sink`] - External collaborators
//! - [`pacing`] - Circuit breaker, pacing and sleeps
//! - [`testing`] - Mock collaborators for testing

pub mod chain;
pub mod classify;
pub mod config;
pub mod context;
pub mod error;
pub mod explore;
pub mod fetch;
pub mod identity;
pub mod ledger;
pub mod orchestrator;
pub mod pacing;
pub mod sink;
pub mod testing;

pub use chain::{ChainEnd, ChainReport, ChainWalker, SkipReason};
pub use classify::{Classification, DocumentClassifier, KeywordClassifier, ResourceRef};
pub use config::CrawlerConfig;
pub use context::{CrawlContext, CrawlSettings};
pub use error::{CrawlError, CrawlResult, FetchError, LedgerError, ResourceError, SinkError};
pub use explore::{Exploration, Explorer};
pub use fetch::{DocumentFetcher, HttpDocumentFetcher, RenderedDocument};
pub use identity::WorkerIdentity;
pub use ledger::{Job, JobId, JobLedger, JobStatus, MemoryJobLedger, PostgresJobLedger};
pub use orchestrator::{Iteration, Mode, Orchestrator, RunSummary};
pub use pacing::{CircuitBreaker, Pacer, Sleeper, TokioSleeper};
pub use sink::{ArtifactSink, FetchedResource, FsArtifactSink, HttpResourceFetcher, ResourceFetcher};
