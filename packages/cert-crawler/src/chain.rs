//! Chain walker: the per-identifier state machine.
//!
//! ```text
//! Claiming ─► Fetching ─► Classifying ─► Extracting ─► Persisting ─► Advance ─┐
//!    ▲            │            │              │                                │
//!    │            ▼            ▼              ▼                                │
//!    │        Erroring     Terminating    Terminating                          │
//!    │            │        (stale/skip)    (skip)                              │
//!    └────────────┴──── next pending job, or Terminating(QueueEmpty) ◄─────────┘
//!                                                        id + 1 ◄──────────────┘
//! ```
//!
//! A chain advances strictly by one while documents keep matching and stops
//! at the first stale, skipped or out-of-bounds identifier. Fetch failures
//! and already-handled identifiers hand the chain over to the next pending
//! job in the ledger instead.

use tracing::{debug, info, warn};

use crate::classify::{Classification, ResourceRef};
use crate::context::CrawlContext;
use crate::error::{CrawlResult, FetchError};
use crate::fetch::RenderedDocument;
use crate::ledger::{JobId, JobStatus};
use crate::pacing::CircuitBreaker;

/// Why a matching run of documents ended at a skipped job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    OtherCategory,
    ExcludedSubcategory,
    IncompleteResources { found: usize, required: usize },
}

/// How a chain terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEnd {
    /// Chain was handed to the queue and the queue had nothing pending
    QueueEmpty,
    /// Document did not show the requested identifier
    Stale(JobId),
    Skipped { id: JobId, reason: SkipReason },
    /// Next sequential identifier lies past the upper bound
    OutOfBounds(JobId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    pub start: JobId,
    /// Jobs marked `done`
    pub completed: u64,
    /// Artifacts successfully stored
    pub artifacts: u64,
    /// Every identifier fetched, in order
    pub attempted: Vec<JobId>,
    pub end: ChainEnd,
}

impl ChainReport {
    pub fn last_attempted(&self) -> Option<JobId> {
        self.attempted.last().copied()
    }
}

enum ChainStep {
    Claiming { id: JobId, claimed: bool },
    Fetching { id: JobId },
    Classifying { id: JobId, document: RenderedDocument },
    Extracting { id: JobId, classification: Classification },
    Persisting { id: JobId, label: String, resources: Vec<ResourceRef> },
    Advance { id: JobId },
    Erroring { id: JobId, error: FetchError },
    Terminating(ChainEnd),
}

/// Drives one chain at a time. The circuit breaker outlives individual
/// chains, so consecutive failures are counted per worker.
pub struct ChainWalker {
    ctx: CrawlContext,
    breaker: CircuitBreaker,
}

impl ChainWalker {
    pub fn new(ctx: CrawlContext) -> Self {
        let breaker = CircuitBreaker::new(ctx.settings.breaker);
        Self { ctx, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Walk a chain starting at `start`.
    ///
    /// `claimed` is true when the caller already holds `start` in
    /// `in_progress` (e.g. it came from `claim_next_pending`). Only ledger
    /// failures are returned as errors.
    pub async fn walk(&mut self, start: JobId, claimed: bool) -> CrawlResult<ChainReport> {
        let mut completed = 0;
        let mut artifacts = 0;
        let mut attempted = Vec::new();
        let mut step = ChainStep::Claiming { id: start, claimed };

        loop {
            step = match step {
                ChainStep::Claiming { id, claimed } => self.claiming(id, claimed).await?,
                ChainStep::Fetching { id } => {
                    attempted.push(id);
                    self.fetching(id).await
                }
                ChainStep::Classifying { id, document } => self.classifying(id, document).await?,
                ChainStep::Extracting { id, classification } => {
                    self.extracting(id, classification).await?
                }
                ChainStep::Persisting {
                    id,
                    label,
                    resources,
                } => {
                    artifacts += self.persisting(id, &label, &resources).await;
                    ChainStep::Advance { id }
                }
                ChainStep::Advance { id } => {
                    if self.ctx.ledger.set_status(id, JobStatus::Done).await? {
                        completed += 1;
                        info!(job_id = id, "job done, continuing chain");
                    } else {
                        warn!(job_id = id, "ledger refused done, job finished elsewhere");
                    }
                    match id.checked_add(1) {
                        Some(next) => ChainStep::Claiming {
                            id: next,
                            claimed: false,
                        },
                        None => ChainStep::Terminating(ChainEnd::OutOfBounds(id)),
                    }
                }
                ChainStep::Erroring { id, error } => self.erroring(id, error).await?,
                ChainStep::Terminating(end) => {
                    info!(start = start, completed = completed, end = ?end, "chain ended");
                    return Ok(ChainReport {
                        start,
                        completed,
                        artifacts,
                        attempted,
                        end,
                    });
                }
            };
        }
    }

    async fn claiming(&self, id: JobId, claimed: bool) -> CrawlResult<ChainStep> {
        if claimed {
            return Ok(ChainStep::Fetching { id });
        }

        if !self.ctx.settings.bounds.contains(id) {
            info!(job_id = id, "identifier outside bounds, ending chain");
            return Ok(ChainStep::Terminating(ChainEnd::OutOfBounds(id)));
        }

        let owner = &self.ctx.identity.owner_token;
        let acquired = match self.ctx.ledger.get_status(id).await? {
            None => self.ctx.ledger.reserve(id, owner).await?,
            Some(JobStatus::Pending) => self.ctx.ledger.claim(id, owner).await?,
            Some(status) => {
                info!(job_id = id, status = %status, "already handled, switching to queue");
                return self.next_from_queue().await;
            }
        };

        if acquired {
            Ok(ChainStep::Fetching { id })
        } else {
            debug!(job_id = id, "lost claim race, switching to queue");
            self.next_from_queue().await
        }
    }

    async fn fetching(&mut self, id: JobId) -> ChainStep {
        info!(job_id = id, fetcher = self.ctx.fetcher.name(), "fetching");
        let timeout = self.ctx.settings.fetch_timeout;

        match tokio::time::timeout(timeout, self.ctx.fetcher.fetch(id)).await {
            Ok(Ok(document)) => {
                self.breaker.record_success();
                ChainStep::Classifying { id, document }
            }
            Ok(Err(error)) => ChainStep::Erroring { id, error },
            Err(_) => ChainStep::Erroring {
                id,
                error: FetchError::Timeout { id },
            },
        }
    }

    async fn erroring(&mut self, id: JobId, error: FetchError) -> CrawlResult<ChainStep> {
        let tripped = self.breaker.record_failure();
        warn!(
            job_id = id,
            error = %error,
            consecutive_failures = self.breaker.consecutive_failures(),
            "fetch failed"
        );

        self.ctx.ledger.set_status(id, JobStatus::Error).await?;

        if tripped {
            let cooldown = self.breaker.cooldown();
            warn!(
                cooldown_secs = cooldown.as_secs(),
                "too many consecutive fetch failures, cooling down"
            );
            self.ctx.sleeper.sleep(cooldown).await;
            self.breaker.reset();
        }

        self.next_from_queue().await
    }

    async fn classifying(&self, id: JobId, document: RenderedDocument) -> CrawlResult<ChainStep> {
        if !self.ctx.fetcher.is_document_for(&document, id) {
            warn!(job_id = id, "document does not show requested id, marking stale");
            self.ctx.ledger.set_status(id, JobStatus::Stale).await?;
            return Ok(ChainStep::Terminating(ChainEnd::Stale(id)));
        }

        let classification = self.ctx.classifier.classify(&document);
        if !classification.matches_target_category {
            return self.skip(id, SkipReason::OtherCategory).await;
        }
        if classification.excluded_subcategory {
            return self.skip(id, SkipReason::ExcludedSubcategory).await;
        }

        Ok(ChainStep::Extracting { id, classification })
    }

    async fn extracting(&self, id: JobId, classification: Classification) -> CrawlResult<ChainStep> {
        let required = self.ctx.settings.required_resources;
        let found = classification.resources.len();
        if found < required {
            return self
                .skip(id, SkipReason::IncompleteResources { found, required })
                .await;
        }

        let label = classification
            .label
            .unwrap_or_else(|| "unknown".to_string());
        info!(job_id = id, label = %label, resources = found, "extracting");

        Ok(ChainStep::Persisting {
            id,
            label,
            resources: classification.resources,
        })
    }

    /// Store what can be stored. Individual failures never fail the job.
    async fn persisting(&self, id: JobId, label: &str, resources: &[ResourceRef]) -> u64 {
        let mut stored = 0;

        for resource in resources {
            let fetched = match self.ctx.resources.fetch(resource).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(job_id = id, resource = %resource.name, error = %e, "resource download failed");
                    continue;
                }
            };

            match self.ctx.sink.store(id, label, &fetched).await {
                Ok(_) => stored += 1,
                Err(e) => {
                    warn!(job_id = id, resource = %resource.name, error = %e, "artifact store failed");
                }
            }
        }

        if stored < resources.len() as u64 {
            warn!(
                job_id = id,
                stored = stored,
                expected = resources.len(),
                "job completing with partial artifacts"
            );
        }

        stored
    }

    async fn skip(&self, id: JobId, reason: SkipReason) -> CrawlResult<ChainStep> {
        info!(job_id = id, reason = ?reason, "marking skipped, chain broken");
        self.ctx.ledger.set_status(id, JobStatus::Skipped).await?;
        Ok(ChainStep::Terminating(ChainEnd::Skipped { id, reason }))
    }

    async fn next_from_queue(&self) -> CrawlResult<ChainStep> {
        match self
            .ctx
            .ledger
            .claim_next_pending(&self.ctx.identity.owner_token)
            .await?
        {
            Some(next) => {
                info!(job_id = next, "switching to queued job");
                Ok(ChainStep::Claiming {
                    id: next,
                    claimed: true,
                })
            }
            None => {
                info!("queue empty, ending chain");
                Ok(ChainStep::Terminating(ChainEnd::QueueEmpty))
            }
        }
    }
}
