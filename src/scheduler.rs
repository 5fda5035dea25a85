//! The worker pool: N tasks that each take an entry from the queue, claim a
//! slot under the shared concurrency limit, and drive the job to a terminal
//! state.
//!
//! Workers share nothing but the queue, the record store and the
//! [`InFlight`] counter. Losing the capacity race is backpressure, not an
//! error: the entry goes back to the tail of the default lane and the worker
//! pauses before trying again.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::select;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::pipeline::{JobFailure, Pipeline};
use crate::queue::{Lane, Queue, QueueEntry};
use crate::store::{JobStore, StoreError};
use crate::types::job::JobUpdate;
use crate::util::panic_message;

/// Shortest dequeue wait. A zero wait would leave idle workers spinning.
pub const MIN_POLL_WAIT: Duration = Duration::from_millis(1);

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Most jobs that may be `processing` at once.
    pub concurrency: usize,
    /// Number of worker tasks.
    pub workers: usize,
    /// Bounded wait on each lane per dequeue attempt. Raised to
    /// [`MIN_POLL_WAIT`] if shorter.
    pub poll_wait: Duration,
    /// Pause after re-queueing an entry that lost the capacity race.
    pub backpressure_pause: Duration,
    /// Pause after an unexpected error in the loop itself.
    pub error_pause: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            workers: 10,
            poll_wait: Duration::from_secs(1),
            backpressure_pause: Duration::from_secs(1),
            error_pause: Duration::from_secs(5),
        }
    }
}

/// Bounded count of jobs currently held by a worker.
#[derive(Debug)]
pub struct InFlight {
    count: AtomicUsize,
    limit: usize,
}

impl InFlight {
    /// A limit of zero is raised to one, or nothing could ever run.
    pub fn new(limit: usize) -> Self {
        Self {
            count: AtomicUsize::new(0),
            limit: limit.max(1),
        }
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Claims a slot if one is free. The slot is released when the returned
    /// guard drops.
    pub fn try_acquire(self: &Arc<Self>) -> Option<InFlightSlot> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.limit).then_some(n + 1)
            })
            .ok()?;

        Some(InFlightSlot(Arc::clone(self)))
    }
}

#[derive(Debug)]
pub struct InFlightSlot(Arc<InFlight>);

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.0.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// What a worker did with one dequeued entry.
#[derive(Debug, Eq, PartialEq)]
enum Dispatch {
    Ran,
    Deferred,
}

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    queue: Arc<Queue>,
    pipeline: Arc<Pipeline>,
    in_flight: Arc<InFlight>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<Queue>,
        pipeline: Pipeline,
        mut config: SchedulerConfig,
    ) -> Self {
        config.poll_wait = config.poll_wait.max(MIN_POLL_WAIT);

        Self {
            store,
            queue,
            pipeline: Arc::new(pipeline),
            in_flight: Arc::new(InFlight::new(config.concurrency)),
            config,
        }
    }

    /// Shared handle on the in-flight counter, for stats.
    pub fn in_flight(&self) -> Arc<InFlight> {
        Arc::clone(&self.in_flight)
    }

    /// Runs the worker pool until `cancel` fires and every worker has
    /// finished the job it holds. A worker that dies is replaced.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut workers = JoinSet::new();
        let mut next_index = 0;

        for _ in 0..self.config.workers.max(1) {
            workers.spawn(self.clone().work(next_index, cancel.clone()));
            next_index += 1;
        }

        info!(
            workers = next_index,
            concurrency = self.in_flight.limit(),
            "scheduler started"
        );

        while let Some(joined) = workers.join_next().await {
            let Err(error) = joined else { continue };

            error!(%error, "worker task ended abnormally");
            if !cancel.is_cancelled() {
                workers.spawn(self.clone().work(next_index, cancel.clone()));
                next_index += 1;
            }
        }

        info!("scheduler stopped");
    }

    async fn work(self, index: usize, cancel: CancellationToken) {
        debug!(worker = index, "worker started");

        loop {
            // Queue::next is cancel-safe, so nothing is lost if shutdown wins.
            let entry = select! {
                entry = self.queue.next(self.config.poll_wait) => entry,
                _ = cancel.cancelled() => break,
            };
            let Some(entry) = entry else { continue };

            let pause = match self.dispatch(entry).await {
                Ok(Dispatch::Ran) => continue,
                Ok(Dispatch::Deferred) => self.config.backpressure_pause,
                Err(error) => {
                    error!(worker = index, %error, "scheduler loop error");
                    self.config.error_pause
                },
            };

            select! {
                _ = sleep(pause) => {},
                _ = cancel.cancelled() => break,
            }
        }

        debug!(worker = index, "worker stopped");
    }

    async fn dispatch(
        &self,
        entry: QueueEntry,
    ) -> Result<Dispatch, StoreError> {
        let Some(_slot) = self.in_flight.try_acquire() else {
            self.queue.push(Lane::Default, entry.id);
            warn!(
                job = %entry.id,
                lane = ?entry.lane,
                limit = self.in_flight.limit(),
                "at capacity, re-queued to default lane"
            );
            return Ok(Dispatch::Deferred);
        };

        // The slot is held until the terminal status has been written.
        self.process(entry).await?;
        Ok(Dispatch::Ran)
    }

    #[instrument(skip_all, fields(job = %entry.id, lane = ?entry.lane))]
    async fn process(&self, entry: QueueEntry) -> Result<(), StoreError> {
        let job = match self.store.update(entry.id, JobUpdate::Start).await {
            Ok(job) => job,
            Err(StoreError::NotFound(_)) => {
                warn!("dequeued id has no record, dropping entry");
                return Ok(());
            },
            Err(StoreError::Transition(error)) => {
                warn!(%error, "job already started, dropping duplicate entry");
                return Ok(());
            },
            Err(error) => {
                // Still queued in the store, so keep it in the queue too.
                self.queue.push(entry.lane, entry.id);
                return Err(error);
            },
        };
        info!(source = %job.source_ref, kind = %job.kind, "job started");

        let outcome = AssertUnwindSafe(self.pipeline.run(&*self.store, &job))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(JobFailure::Panicked(panic_message(&*payload)))
            });

        let update = match outcome {
            Ok(result_ref) => {
                info!(%result_ref, "job completed");
                JobUpdate::Complete { result_ref }
            },
            Err(failure) => {
                error!(%failure, "job failed");
                JobUpdate::Fail {
                    error: failure.to_string(),
                }
            },
        };

        self.store.update(job.id, update).await.map(drop)
    }
}
