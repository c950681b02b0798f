use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::ledger::JobId;

/// Inclusive bounds of the crawled identifier space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdBounds {
    pub lower: JobId,
    pub upper: JobId,
}

impl IdBounds {
    pub fn new(lower: JobId, upper: JobId) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, id: JobId) -> bool {
        (self.lower..=self.upper).contains(&id)
    }
}

impl Default for IdBounds {
    fn default() -> Self {
        Self::new(100_000_001, 123_371_178)
    }
}

/// Randomized jump used when the ledger has no pending work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplorationConfig {
    pub jump_min: i64,
    pub jump_max: i64,
    /// Modulus for the per-worker exploration offset
    pub offset_window: u64,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            jump_min: 100,
            jump_max: 500,
            offset_window: 1000,
        }
    }
}

/// Consecutive-failure circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    pub threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            cooldown: Duration::from_secs(600),
        }
    }
}

/// Delay between run-loop iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    pub min: Duration,
    pub max: Duration,
    /// Take a long break every N iterations (0 disables)
    pub break_every: u64,
    pub break_duration: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min: Duration::from_secs(20),
            max: Duration::from_secs(30),
            break_every: 50,
            break_duration: Duration::from_secs(60),
        }
    }
}

/// Periodic re-sync between exploration and queue mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecheckConfig {
    /// Re-probe the queue after this many consecutive exploration chains (0 disables)
    pub interval: u64,
    pub sleep: Duration,
}

impl Default for RecheckConfig {
    fn default() -> Self {
        Self {
            interval: 10,
            sleep: Duration::from_secs(30),
        }
    }
}

/// Where and how documents are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Document location with `{id}` standing in for the identifier
    pub url_template: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            url_template: "https://www.psacard.com/cert/{id}/psa".to_string(),
            timeout: Duration::from_secs(15),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36"
                .to_string(),
        }
    }
}

impl FetchConfig {
    pub fn url_for(&self, id: JobId) -> String {
        self.url_template.replace("{id}", &id.to_string())
    }
}

/// Keyword markers consumed by the document classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierConfig {
    pub target_keyword: String,
    pub excluded_keywords: Vec<String>,
    pub required_resources: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            target_keyword: "pokemon".to_string(),
            excluded_keywords: vec![
                "japanese".to_string(),
                "asia".to_string(),
                "chinese".to_string(),
            ],
            required_resources: 2,
        }
    }
}

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub worker_name: String,
    pub bounds: IdBounds,
    pub exploration: ExplorationConfig,
    pub breaker: BreakerConfig,
    pub pacing: PacingConfig,
    pub recheck: RecheckConfig,
    pub max_completed_jobs: u64,
    pub fetch: FetchConfig,
    pub classifier: ClassifierConfig,
    pub artifact_dir: PathBuf,
}

impl CrawlerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let exploration_defaults = ExplorationConfig::default();
        let breaker_defaults = BreakerConfig::default();
        let pacing_defaults = PacingConfig::default();
        let recheck_defaults = RecheckConfig::default();
        let fetch_defaults = FetchConfig::default();
        let classifier_defaults = ClassifierConfig::default();
        let bounds_defaults = IdBounds::default();

        let worker_name = lookup("WORKER_ID")
            .or_else(|| lookup("HOSTNAME"))
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));

        let excluded_keywords = match lookup("EXCLUDED_KEYWORDS") {
            Some(raw) => raw
                .split(',')
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            None => classifier_defaults.excluded_keywords,
        };

        let config = Self {
            database_url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            worker_name,
            bounds: IdBounds::new(
                parse_or(&lookup, "ID_LOWER_BOUND", bounds_defaults.lower)?,
                parse_or(&lookup, "ID_UPPER_BOUND", bounds_defaults.upper)?,
            ),
            exploration: ExplorationConfig {
                jump_min: parse_or(&lookup, "JUMP_MIN", exploration_defaults.jump_min)?,
                jump_max: parse_or(&lookup, "JUMP_MAX", exploration_defaults.jump_max)?,
                offset_window: parse_or(
                    &lookup,
                    "EXPLORATION_OFFSET_WINDOW",
                    exploration_defaults.offset_window,
                )?,
            },
            breaker: BreakerConfig {
                threshold: parse_or(
                    &lookup,
                    "CONSECUTIVE_ERROR_THRESHOLD",
                    breaker_defaults.threshold,
                )?,
                cooldown: secs_or(&lookup, "COOLDOWN_SECS", breaker_defaults.cooldown)?,
            },
            pacing: PacingConfig {
                min: secs_or(&lookup, "PACING_MIN_SECS", pacing_defaults.min)?,
                max: secs_or(&lookup, "PACING_MAX_SECS", pacing_defaults.max)?,
                break_every: parse_or(&lookup, "BREAK_EVERY", pacing_defaults.break_every)?,
                break_duration: secs_or(&lookup, "BREAK_SECS", pacing_defaults.break_duration)?,
            },
            recheck: RecheckConfig {
                interval: parse_or(&lookup, "RECHECK_INTERVAL", recheck_defaults.interval)?,
                sleep: secs_or(&lookup, "RECHECK_SLEEP_SECS", recheck_defaults.sleep)?,
            },
            max_completed_jobs: parse_or(&lookup, "MAX_COMPLETED_JOBS", 10_000)?,
            fetch: FetchConfig {
                url_template: lookup("DOCUMENT_URL_TEMPLATE")
                    .unwrap_or(fetch_defaults.url_template),
                timeout: secs_or(&lookup, "FETCH_TIMEOUT_SECS", fetch_defaults.timeout)?,
                user_agent: lookup("USER_AGENT").unwrap_or(fetch_defaults.user_agent),
            },
            classifier: ClassifierConfig {
                target_keyword: lookup("TARGET_KEYWORD")
                    .map(|k| k.trim().to_lowercase())
                    .unwrap_or(classifier_defaults.target_keyword),
                excluded_keywords,
                required_resources: parse_or(
                    &lookup,
                    "REQUIRED_RESOURCES",
                    classifier_defaults.required_resources,
                )?,
            },
            artifact_dir: lookup("ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./artifacts")),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the crawl loop cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.bounds.lower < 0 {
            bail!("ID_LOWER_BOUND must not be negative");
        }
        if self.bounds.lower > self.bounds.upper {
            bail!(
                "ID_LOWER_BOUND ({}) must not exceed ID_UPPER_BOUND ({})",
                self.bounds.lower,
                self.bounds.upper
            );
        }
        if self.exploration.jump_min < 0 || self.exploration.jump_min > self.exploration.jump_max
        {
            bail!("JUMP_MIN must be non-negative and not exceed JUMP_MAX");
        }
        if self.exploration.offset_window == 0 {
            bail!("EXPLORATION_OFFSET_WINDOW must be at least 1");
        }
        if self.breaker.threshold == 0 {
            bail!("CONSECUTIVE_ERROR_THRESHOLD must be at least 1");
        }
        if self.pacing.min > self.pacing.max {
            bail!("PACING_MIN_SECS must not exceed PACING_MAX_SECS");
        }
        if !self.fetch.url_template.contains("{id}") {
            bail!("DOCUMENT_URL_TEMPLATE must contain an {{id}} placeholder");
        }
        Ok(())
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid number", key)),
        None => Ok(default),
    }
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}
