//! Worker run loop.
//!
//! Each iteration prefers queued work and falls back to exploration:
//!
//! 1. Claim the lowest pending job. If one exists, walk a chain from it.
//! 2. Otherwise explore. A discarded candidate ends the iteration
//!    immediately and is not paced, so the next draw follows at once; a
//!    published one starts a chain.
//! 3. After an exploration chain, probe the ledger for pending work and,
//!    every `recheck.interval` exploration chains with nothing pending,
//!    wait `recheck.sleep` before continuing.
//! 4. Pace before the next iteration.
//!
//! The loop ends once `max_completed_jobs` jobs have been marked `done`.

use serde::Serialize;
use tracing::{debug, info};

use crate::chain::{ChainReport, ChainWalker};
use crate::context::CrawlContext;
use crate::error::CrawlResult;
use crate::explore::{Exploration, Explorer};
use crate::ledger::{JobId, JobStatus};
use crate::pacing::Pacer;

/// Where a chain's starting identifier came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Queue,
    Exploration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    Chain { mode: Mode, report: ChainReport },
    /// Exploration candidate was already handled; no chain ran
    Discarded { id: JobId, status: JobStatus },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub completed: u64,
    pub chains_from_queue: u64,
    pub chains_from_exploration: u64,
    pub discarded_candidates: u64,
}

pub struct Orchestrator {
    ctx: CrawlContext,
    walker: ChainWalker,
    explorer: Explorer,
    pacer: Pacer,
    rng: fastrand::Rng,
    exploration_streak: u64,
    summary: RunSummary,
}

impl Orchestrator {
    pub fn new(ctx: CrawlContext) -> Self {
        let settings = &ctx.settings;
        let explorer = Explorer::new(
            settings.bounds,
            settings.exploration,
            ctx.identity.exploration_offset,
        );
        let pacer = Pacer::new(settings.pacing);
        let walker = ChainWalker::new(ctx.clone());

        Self {
            ctx,
            walker,
            explorer,
            pacer,
            rng: fastrand::Rng::new(),
            exploration_streak: 0,
            summary: RunSummary::default(),
        }
    }

    /// Use a fixed random source (deterministic tests).
    pub fn with_rng(mut self, rng: fastrand::Rng) -> Self {
        self.rng = rng;
        self
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn explorer(&self) -> &Explorer {
        &self.explorer
    }

    pub fn walker(&self) -> &ChainWalker {
        &self.walker
    }

    /// Run until the completion cap is reached or the ledger fails.
    pub async fn run(&mut self) -> CrawlResult<RunSummary> {
        let cap = self.ctx.settings.max_completed_jobs;
        info!(
            worker = %self.ctx.identity.name,
            owner = %self.ctx.identity.owner_token,
            exploration_offset = self.ctx.identity.exploration_offset,
            max_completed_jobs = cap,
            "worker starting"
        );

        while self.summary.completed < cap {
            self.run_once().await?;
        }

        info!(
            completed = self.summary.completed,
            chains_from_queue = self.summary.chains_from_queue,
            chains_from_exploration = self.summary.chains_from_exploration,
            "completion cap reached, worker stopping"
        );
        Ok(self.summary.clone())
    }

    /// One iteration of the run loop.
    pub async fn run_once(&mut self) -> CrawlResult<Iteration> {
        let ledger = self.ctx.ledger.clone();

        let (mode, start, claimed) =
            match ledger.claim_next_pending(&self.ctx.identity.owner_token).await? {
                Some(id) => {
                    info!(job_id = id, "claimed queued job");
                    self.exploration_streak = 0;
                    (Mode::Queue, id, true)
                }
                None => match self.explorer.explore(ledger.as_ref(), &mut self.rng).await? {
                    Exploration::Published(id) => {
                        info!(job_id = id, "exploring from candidate");
                        (Mode::Exploration, id, false)
                    }
                    Exploration::Discarded { id, status } => {
                        self.summary.discarded_candidates += 1;
                        debug!(
                            job_id = id,
                            status = %status,
                            "candidate discarded, drawing again unpaced"
                        );
                        return Ok(Iteration::Discarded { id, status });
                    }
                },
            };

        let report = self.walker.walk(start, claimed).await?;
        self.summary.completed += report.completed;
        self.explorer
            .observe(report.last_attempted().unwrap_or(start));

        match mode {
            Mode::Queue => self.summary.chains_from_queue += 1,
            Mode::Exploration => {
                self.summary.chains_from_exploration += 1;
                self.after_exploration_chain().await?;
            }
        }

        self.pacer.pause(&mut self.rng, self.ctx.sleeper.as_ref()).await;

        Ok(Iteration::Chain { mode, report })
    }

    async fn after_exploration_chain(&mut self) -> CrawlResult<()> {
        self.exploration_streak += 1;

        let pending = self.ctx.ledger.has_pending().await?;
        if pending {
            info!("pending work appeared, returning to queue");
            return Ok(());
        }

        let recheck = self.ctx.settings.recheck;
        if recheck.interval > 0 && self.exploration_streak % recheck.interval == 0 {
            info!(
                exploration_chains = self.exploration_streak,
                sleep_secs = recheck.sleep.as_secs(),
                "queue still empty, waiting before exploring again"
            );
            self.ctx.sleeper.sleep(recheck.sleep).await;
        } else {
            debug!(exploration_chains = self.exploration_streak, "queue empty");
        }

        Ok(())
    }
}
