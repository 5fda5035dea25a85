//! Executes parsed protocol commands against admission, the record store and
//! the queue, producing wire replies.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::admission::{Admission, AdmissionError};
use crate::parser::ParsingError;
use crate::queue::{Lane, Queue};
use crate::scheduler::InFlight;
use crate::store::JobStore;
use crate::types::job::NewJob;
use crate::types::protocol::{BatchOutcome, Command, QueueStats, Response};

/// Default cap on the number of lines a `convert-batch` may announce.
pub const DEFAULT_MAX_BATCH: u32 = 100;

#[derive(Clone)]
pub struct Frontend {
    admission: Admission,
    store: Arc<dyn JobStore>,
    queue: Arc<Queue>,
    in_flight: Arc<InFlight>,
    max_batch: u32,
}

impl Frontend {
    pub fn new(
        admission: Admission,
        store: Arc<dyn JobStore>,
        queue: Arc<Queue>,
        in_flight: Arc<InFlight>,
        max_batch: u32,
    ) -> Self {
        Self {
            admission,
            store,
            queue,
            in_flight,
            max_batch,
        }
    }

    /// Whether a `convert-batch` announcing `count` lines will be accepted.
    pub fn admits_batch(&self, count: u32) -> bool {
        count <= self.max_batch
    }

    /// Executes a single-line command.
    ///
    /// `convert-batch` needs its job lines, so it goes through
    /// [`execute_batch`](Self::execute_batch) instead; `quit` is handled by
    /// the connection. Both are answered with `INTERNAL_ERROR` here.
    pub async fn execute(&self, command: Command) -> Response {
        match command {
            Command::Convert(request) => {
                match self.admission.enqueue(request).await {
                    Ok(id) => Response::Queued { id },
                    Err(error) => admission_failure(error),
                }
            },
            Command::Status { id } => match self.store.get(id).await {
                Ok(Some(job)) => Response::OkJob { job },
                Ok(None) => Response::NotFound,
                Err(error) => {
                    warn!(%error, job = %id, "status lookup failed");
                    Response::Unavailable
                },
            },
            Command::Stats => self.stats().await,
            Command::ConvertBatch { .. } | Command::Quit => {
                warn!(?command, "command reached the executor unexpectedly");
                Response::InternalError
            },
        }
    }

    /// Admits each line of a batch independently, in order. Lines that failed
    /// to parse are reported as errors without being admitted.
    pub async fn execute_batch(
        &self,
        lines: Vec<Result<NewJob, ParsingError>>,
    ) -> Response {
        let mut outcomes = Vec::with_capacity(lines.len());

        for line in lines {
            let outcome = match line {
                Ok(request) => match self.admission.enqueue(request).await {
                    Ok(id) => BatchOutcome::queued(id),
                    Err(error) => BatchOutcome::failed(error),
                },
                Err(error) => BatchOutcome::failed(error),
            };
            outcomes.push(outcome);
        }

        debug!(count = outcomes.len(), "batch admitted");
        Response::OkBatch { outcomes }
    }

    pub async fn stats(&self) -> Response {
        match self.store.count_by_status().await {
            Ok(jobs) => Response::OkStats {
                data: QueueStats {
                    priority_pending: self.queue.len(Lane::Priority),
                    default_pending: self.queue.len(Lane::Default),
                    in_flight: self.in_flight.current(),
                    concurrency_limit: self.in_flight.limit(),
                    jobs,
                },
            },
            Err(error) => {
                warn!(%error, "stats unavailable");
                Response::Unavailable
            },
        }
    }
}

fn admission_failure(error: AdmissionError) -> Response {
    match error {
        AdmissionError::Malformed(reason) => {
            debug!(reason, "rejected malformed job");
            Response::BadFormat
        },
        AdmissionError::Store(error) => {
            warn!(%error, "job not admitted");
            Response::Unavailable
        },
    }
}
