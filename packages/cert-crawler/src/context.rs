//! Dependencies shared by the chain walker and the run loop.
//!
//! Built once at startup (or in tests with fakes) and passed down
//! explicitly; nothing in the crawl loop reaches for global state.

use std::sync::Arc;
use std::time::Duration;

use crate::classify::DocumentClassifier;
use crate::config::{BreakerConfig, CrawlerConfig, ExplorationConfig, IdBounds, PacingConfig, RecheckConfig};
use crate::fetch::DocumentFetcher;
use crate::identity::WorkerIdentity;
use crate::ledger::JobLedger;
use crate::pacing::{Sleeper, TokioSleeper};
use crate::sink::{ArtifactSink, ResourceFetcher};

/// Crawl-loop tunables, detached from process configuration.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub bounds: IdBounds,
    pub exploration: ExplorationConfig,
    pub breaker: BreakerConfig,
    pub pacing: PacingConfig,
    pub recheck: RecheckConfig,
    pub max_completed_jobs: u64,
    pub fetch_timeout: Duration,
    pub required_resources: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            bounds: IdBounds::default(),
            exploration: ExplorationConfig::default(),
            breaker: BreakerConfig::default(),
            pacing: PacingConfig::default(),
            recheck: RecheckConfig::default(),
            max_completed_jobs: 10_000,
            fetch_timeout: Duration::from_secs(15),
            required_resources: 2,
        }
    }
}

impl From<&CrawlerConfig> for CrawlSettings {
    fn from(config: &CrawlerConfig) -> Self {
        Self {
            bounds: config.bounds,
            exploration: config.exploration,
            breaker: config.breaker,
            pacing: config.pacing,
            recheck: config.recheck,
            max_completed_jobs: config.max_completed_jobs,
            fetch_timeout: config.fetch.timeout,
            required_resources: config.classifier.required_resources,
        }
    }
}

#[derive(Clone)]
pub struct CrawlContext {
    pub ledger: Arc<dyn JobLedger>,
    pub fetcher: Arc<dyn DocumentFetcher>,
    pub classifier: Arc<dyn DocumentClassifier>,
    pub resources: Arc<dyn ResourceFetcher>,
    pub sink: Arc<dyn ArtifactSink>,
    pub sleeper: Arc<dyn Sleeper>,
    pub identity: WorkerIdentity,
    pub settings: CrawlSettings,
}

impl CrawlContext {
    pub fn new(
        ledger: Arc<dyn JobLedger>,
        fetcher: Arc<dyn DocumentFetcher>,
        classifier: Arc<dyn DocumentClassifier>,
        resources: Arc<dyn ResourceFetcher>,
        sink: Arc<dyn ArtifactSink>,
        identity: WorkerIdentity,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            ledger,
            fetcher,
            classifier,
            resources,
            sink,
            sleeper: Arc::new(TokioSleeper),
            identity,
            settings,
        }
    }

    /// Replace the sleeper (tests observe waits instead of taking them).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}
