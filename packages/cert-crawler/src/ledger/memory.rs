//! In-memory ledger for testing and dry runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{Job, JobId, JobLedger, JobStatus, StatusCount};
use crate::error::LedgerResult;

/// In-memory job ledger.
///
/// Every operation takes the write lock for its whole read-modify-write, which
/// gives the same at-most-one-claimant guarantee as the Postgres ledger within
/// one process. Data is lost on restart.
#[derive(Default)]
pub struct MemoryJobLedger {
    jobs: RwLock<BTreeMap<JobId, Job>>,
}

impl MemoryJobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row with an arbitrary status (test setup).
    pub fn seed(&self, id: JobId, status: JobStatus) {
        self.jobs.write().unwrap().insert(
            id,
            Job {
                id,
                status,
                owner: None,
                updated_at: Utc::now(),
            },
        );
    }

    /// Snapshot of every row, ordered by id.
    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().unwrap().is_empty()
    }
}

#[async_trait]
impl JobLedger for MemoryJobLedger {
    async fn claim_next_pending(&self, owner: &str) -> LedgerResult<Option<JobId>> {
        let mut jobs = self.jobs.write().unwrap();
        let next = jobs
            .values_mut()
            .find(|job| job.status == JobStatus::Pending);

        Ok(next.map(|job| {
            job.status = JobStatus::InProgress;
            job.owner = Some(owner.to_string());
            job.updated_at = Utc::now();
            job.id
        }))
    }

    async fn insert_if_absent(&self, id: JobId) -> LedgerResult<bool> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&id) {
            return Ok(false);
        }
        jobs.insert(
            id,
            Job {
                id,
                status: JobStatus::Pending,
                owner: None,
                updated_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn reserve(&self, id: JobId, owner: &str) -> LedgerResult<bool> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&id) {
            return Ok(false);
        }
        jobs.insert(
            id,
            Job {
                id,
                status: JobStatus::InProgress,
                owner: Some(owner.to_string()),
                updated_at: Utc::now(),
            },
        );
        Ok(true)
    }

    async fn claim(&self, id: JobId, owner: &str) -> LedgerResult<bool> {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::InProgress;
                job.owner = Some(owner.to_string());
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_status(&self, id: JobId) -> LedgerResult<Option<JobStatus>> {
        Ok(self.jobs.read().unwrap().get(&id).map(|job| job.status))
    }

    async fn get(&self, id: JobId) -> LedgerResult<Option<Job>> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    async fn set_status(&self, id: JobId, status: JobStatus) -> LedgerResult<bool> {
        if status == JobStatus::Pending {
            return Ok(false);
        }

        let mut jobs = self.jobs.write().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::InProgress || job.status == status => {
                job.status = status;
                job.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn has_pending(&self) -> LedgerResult<bool> {
        Ok(self
            .jobs
            .read()
            .unwrap()
            .values()
            .any(|job| job.status == JobStatus::Pending))
    }

    async fn status_counts(&self) -> LedgerResult<Vec<StatusCount>> {
        let jobs = self.jobs.read().unwrap();
        Ok(JobStatus::ALL
            .iter()
            .filter_map(|status| {
                let count = jobs.values().filter(|job| job.status == *status).count() as i64;
                (count > 0).then_some(StatusCount {
                    status: *status,
                    count,
                })
            })
            .collect())
    }
}
