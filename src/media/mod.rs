//! Contracts for the remote operations a conversion depends on, plus the
//! implementations the server ships with.
//!
//! The scheduler treats every collaborator as an opaque, possibly slow,
//! possibly failing unit of work. Errors are classified for the retry
//! executor through [`Retryable`].

mod chain;
mod command;
mod directory;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

pub use chain::ProviderChain;
pub use command::{classify_failure, CommandSource};
pub use directory::DirectorySink;

use crate::retry::{Disposition, Retryable};
use crate::types::job::{MediaKind, Quality};

/// A converted file sitting in a job's scratch directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: MediaKind,
}

#[derive(Clone, Copy, Debug)]
pub struct DownloadRequest<'a> {
    pub source_ref: &'a str,
    pub kind: MediaKind,
    pub quality: Quality,
    /// Where the artifact must be written. Lives inside the job's scratch
    /// directory.
    pub destination: &'a Path,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DownloadError {
    #[error("content not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("source unavailable: {0}")]
    Unavailable(String),
    #[error("timed out")]
    Timeout,
}

impl Retryable for DownloadError {
    fn disposition(&self) -> Disposition {
        match self {
            DownloadError::NotFound(_) | DownloadError::AccessDenied(_) => {
                Disposition::Terminal
            },
            DownloadError::RateLimited { retry_after } => {
                Disposition::RateLimited(*retry_after)
            },
            DownloadError::Unavailable(_) | DownloadError::Timeout => {
                Disposition::Transient
            },
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum UploadError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("timed out")]
    Timeout,
}

impl Retryable for UploadError {
    fn disposition(&self) -> Disposition {
        Disposition::Transient
    }
}

/// Retrieves and encodes media into a local file.
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn download(
        &self,
        request: &DownloadRequest<'_>,
    ) -> Result<Artifact, DownloadError>;
}

/// Publishes an artifact to durable storage.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Returns the public reference of the stored artifact.
    async fn upload(&self, artifact: &Artifact) -> Result<String, UploadError>;
}
