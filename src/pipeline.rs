//! The conversion pipeline run for one job: download, then upload.
//!
//! Each step yields a tagged result; the first failure short-circuits and
//! becomes the job's terminal error. Progress and attempt counts are written
//! to the store as steps finish.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, instrument};

use crate::media::{
    ArtifactSink, DownloadError, DownloadRequest, ProviderChain, UploadError,
};
use crate::retry::{retry, RetryError, RetryPolicy};
use crate::store::{JobStore, StoreError};
use crate::types::job::{
    Job, JobUpdate, Step, PROGRESS_DOWNLOADED, PROGRESS_UPLOADED,
};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub download: RetryPolicy,
    pub upload: RetryPolicy,
    /// Directory under which each job gets a private scratch directory.
    pub scratch_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            download: RetryPolicy::new(3, Duration::from_secs(1)),
            upload: RetryPolicy::new(3, Duration::from_secs(1)),
            scratch_root: std::env::temp_dir().join("convoy"),
        }
    }
}

/// Why a job ended in `failed`. The display form is what the job record's
/// `error` field holds.
#[derive(Debug, thiserror::Error)]
pub enum JobFailure {
    #[error("download failed: {0}")]
    Download(RetryError<DownloadError>),
    #[error("upload failed: {0}")]
    Upload(RetryError<UploadError>),
    #[error("scratch directory unavailable: {0}")]
    Scratch(std::io::Error),
    #[error("job record update failed: {0}")]
    Store(#[from] StoreError),
    #[error("pipeline panicked: {0}")]
    Panicked(String),
}

pub struct Pipeline {
    sources: ProviderChain,
    sink: Arc<dyn ArtifactSink>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        sources: ProviderChain,
        sink: Arc<dyn ArtifactSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            sources,
            sink,
            config,
        }
    }

    /// Runs the pipeline for a job that has already been marked
    /// `processing`, returning the public reference of the artifact.
    ///
    /// The scratch directory is removed when this returns, on every path.
    #[instrument(skip_all, fields(job = %job.id))]
    pub async fn run(
        &self,
        store: &dyn JobStore,
        job: &Job,
    ) -> Result<String, JobFailure> {
        let scratch = self.scratch_dir(job).map_err(JobFailure::Scratch)?;
        let destination = scratch
            .path()
            .join(format!("{}.{}", job.id, job.kind.extension()));

        let request = DownloadRequest {
            source_ref: &job.source_ref,
            kind: job.kind,
            quality: job.quality,
            destination: &destination,
        };

        let downloaded =
            self.sources.download(&self.config.download, &request).await;
        record_attempts(store, job, Step::Download, match &downloaded {
            Ok(done) => done.attempts,
            Err(error) => error.attempts(),
        })
        .await?;
        let artifact = downloaded.map_err(JobFailure::Download)?.value;
        store
            .update(job.id, JobUpdate::Progress(PROGRESS_DOWNLOADED))
            .await?;
        debug!(path = %artifact.path.display(), "downloaded");

        let uploaded = retry(&self.config.upload, "upload", || {
            self.sink.upload(&artifact)
        })
        .await;
        record_attempts(store, job, Step::Upload, match &uploaded {
            Ok(done) => done.attempts,
            Err(error) => error.attempts(),
        })
        .await?;
        let public_ref = uploaded.map_err(JobFailure::Upload)?.value;
        store
            .update(job.id, JobUpdate::Progress(PROGRESS_UPLOADED))
            .await?;
        debug!(%public_ref, "uploaded");

        Ok(public_ref)
    }

    fn scratch_dir(&self, job: &Job) -> std::io::Result<TempDir> {
        std::fs::create_dir_all(&self.config.scratch_root)?;
        tempfile::Builder::new()
            .prefix(&format!("{}-", job.id))
            .tempdir_in(&self.config.scratch_root)
    }
}

async fn record_attempts(
    store: &dyn JobStore,
    job: &Job,
    step: Step,
    count: u32,
) -> Result<(), StoreError> {
    store
        .update(job.id, JobUpdate::Attempts { step, count })
        .await
        .map(drop)
}
