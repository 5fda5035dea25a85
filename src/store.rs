//! Job record store: the single source of truth for a job's lifecycle.
//!
//! Every write is a point update keyed by job id, so workers never coordinate
//! with each other through the store; each one only touches the record of the
//! job it owns.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use crate::types::job::{Job, JobId, JobUpdate};
use crate::types::states::{JobStatus, TransitionError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job record store unavailable: {0}")]
    Unavailable(String),
    #[error("no job with id {0}")]
    NotFound(JobId),
    #[error("job id {0} already exists")]
    Duplicate(JobId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Number of job records in each status.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct StatusCounts {
    #[serde(rename = "jobs-queued")]
    pub queued: u64,
    #[serde(rename = "jobs-processing")]
    pub processing: u64,
    #[serde(rename = "jobs-completed")]
    pub completed: u64,
    #[serde(rename = "jobs-failed")]
    pub failed: u64,
}

impl StatusCounts {
    fn add(&mut self, status: JobStatus) {
        match status {
            JobStatus::Queued => self.queued += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Stores a new record. Fails with `Duplicate` if the id is taken.
    async fn insert(&self, job: Job) -> Result<(), StoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Applies `update` to the record and returns the record as written.
    async fn update(
        &self,
        id: JobId,
        update: JobUpdate,
    ) -> Result<Job, StoreError>;

    /// All records in `status`, oldest first.
    async fn list_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Vec<Job>, StoreError>;

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError>;
}

/// In-process store, sharded so that updates to different jobs never contend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: DashMap<JobId, Job>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert(&self, job: Job) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.jobs.entry(job.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(job.id)),
            Entry::Vacant(slot) => {
                slot.insert(job);
                Ok(())
            },
        }
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.get(&id).map(|job| job.value().clone()))
    }

    async fn update(
        &self,
        id: JobId,
        update: JobUpdate,
    ) -> Result<Job, StoreError> {
        let mut job = self.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        // Apply to a copy so a rejected update leaves the record untouched.
        let mut next = job.value().clone();
        next.apply(update)?;
        *job.value_mut() = next.clone();

        Ok(next)
    }

    async fn list_by_status(
        &self,
        status: JobStatus,
    ) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|job| job.status == status)
            .map(|job| job.value().clone())
            .collect();

        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn count_by_status(&self) -> Result<StatusCounts, StoreError> {
        let mut counts = StatusCounts::default();
        for job in self.jobs.iter() {
            counts.add(job.status);
        }

        Ok(counts)
    }
}
