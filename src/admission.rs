//! Admission: turns conversion requests into queued job records.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::parser::is_valid_source;
use crate::queue::Queue;
use crate::store::{JobStore, StoreError};
use crate::types::job::{Job, JobId, NewJob};
use crate::types::states::JobStatus;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("malformed job: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct Admission {
    store: Arc<dyn JobStore>,
    queue: Arc<Queue>,
}

impl Admission {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<Queue>) -> Self {
        Self { store, queue }
    }

    /// Stores `request` as a queued job and places its id in the priority
    /// lane if its priority is positive, else the default lane. The record is
    /// written before the id is queued, so a worker never dequeues an id it
    /// can't look up.
    #[instrument(
        skip_all,
        fields(source = %request.source_ref, priority = request.priority),
    )]
    pub async fn enqueue(
        &self,
        request: NewJob,
    ) -> Result<JobId, AdmissionError> {
        validate(&request)?;

        let job = Job::new(request);
        let (id, lane) = (job.id, job.lane());

        self.store.insert(job).await?;
        self.queue.push(lane, id);

        info!(job = %id, ?lane, "job queued");
        Ok(id)
    }

    /// Applies [`enqueue`](Self::enqueue) to each request in order. Each one
    /// succeeds or fails on its own; nothing is rolled back.
    pub async fn enqueue_batch(
        &self,
        requests: Vec<NewJob>,
    ) -> Vec<Result<JobId, AdmissionError>> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            outcomes.push(self.enqueue(request).await);
        }

        outcomes
    }

    /// Re-queues every record still in `status=queued`, oldest first, and
    /// returns how many were placed. Meant for startup, after the queue's
    /// contents were lost; ids already in the queue would be duplicated, and
    /// the scheduler skips such duplicates once the first copy has started.
    pub async fn recover_queued(&self) -> Result<usize, StoreError> {
        let stranded = self.store.list_by_status(JobStatus::Queued).await?;

        for job in &stranded {
            self.queue.push(job.lane(), job.id);
        }

        if !stranded.is_empty() {
            warn!(count = stranded.len(), "re-queued stranded jobs");
        }

        Ok(stranded.len())
    }
}

fn validate(request: &NewJob) -> Result<(), AdmissionError> {
    if request.source_ref.is_empty() {
        return Err(AdmissionError::Malformed("empty source reference"));
    }

    if !is_valid_source(request.source_ref.as_bytes()) {
        return Err(AdmissionError::Malformed(
            "source reference must be at most 200 printable ASCII bytes",
        ));
    }

    Ok(())
}
