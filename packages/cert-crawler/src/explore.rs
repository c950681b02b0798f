//! Exploration: finding new work when the ledger has nothing pending.
//!
//! Candidates move forward from the last examined identifier by a random
//! jump plus the worker's fixed offset, wrapping to the lower bound once
//! they pass the upper bound.

use tracing::{debug, info};

use crate::config::{ExplorationConfig, IdBounds};
use crate::error::LedgerResult;
use crate::ledger::{JobId, JobLedger, JobStatus};

/// Outcome of one exploration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exploration {
    /// Candidate is (now) pending and may start a chain
    Published(JobId),
    /// Candidate was already handled; the explorer advanced past it
    Discarded { id: JobId, status: JobStatus },
}

#[derive(Debug, Clone)]
pub struct Explorer {
    bounds: IdBounds,
    jump_min: i64,
    jump_max: i64,
    offset: i64,
    last_examined: Option<JobId>,
}

impl Explorer {
    pub fn new(bounds: IdBounds, config: ExplorationConfig, offset: i64) -> Self {
        Self {
            bounds,
            jump_min: config.jump_min,
            jump_max: config.jump_max.max(config.jump_min),
            offset,
            last_examined: None,
        }
    }

    pub fn last_examined(&self) -> Option<JobId> {
        self.last_examined
    }

    /// Record the most recently examined identifier.
    pub fn observe(&mut self, id: JobId) {
        self.last_examined = Some(id);
    }

    /// Next candidate, always within bounds.
    pub fn next_candidate(&self, rng: &mut fastrand::Rng) -> JobId {
        let base = self
            .last_examined
            .unwrap_or(self.bounds.lower)
            .max(self.bounds.lower);
        let jump = rng.i64(self.jump_min..=self.jump_max);
        let candidate = base.saturating_add(jump).saturating_add(self.offset);

        if candidate > self.bounds.upper {
            info!(
                candidate = candidate,
                upper = self.bounds.upper,
                "exploration passed upper bound, wrapping"
            );
            self.bounds.lower
        } else if candidate < self.bounds.lower {
            self.bounds.lower
        } else {
            candidate
        }
    }

    /// Pick a candidate and make sure it is visible in the ledger.
    ///
    /// A candidate with no row is inserted as `pending`; one that is already
    /// pending is returned as-is. Any other status discards it.
    pub async fn explore(
        &mut self,
        ledger: &dyn JobLedger,
        rng: &mut fastrand::Rng,
    ) -> LedgerResult<Exploration> {
        let candidate = self.next_candidate(rng);

        match ledger.get_status(candidate).await? {
            None => {
                let created = ledger.insert_if_absent(candidate).await?;
                debug!(job_id = candidate, created = created, "published exploration candidate");
                Ok(Exploration::Published(candidate))
            }
            Some(JobStatus::Pending) => Ok(Exploration::Published(candidate)),
            Some(status) => {
                debug!(job_id = candidate, status = %status, "candidate already handled");
                self.last_examined = Some(candidate);
                Ok(Exploration::Discarded {
                    id: candidate,
                    status,
                })
            }
        }
    }
}
