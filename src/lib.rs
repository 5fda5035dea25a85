//! convoy: a prioritised, concurrency-bounded media conversion job queue.
//!
//! Jobs are admitted into one of two lanes, picked up by a pool of workers
//! under a shared concurrency limit, and driven through download and upload
//! with bounded retries. The job record store is the source of truth for
//! every job's status; the queue only holds ids.

pub mod admission;
pub mod credential;
pub mod line_reader;
pub mod media;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod types;
pub mod util;
