use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::states::{JobStatus, TransitionError};
use crate::queue::Lane;

pub type JobId = Uuid;

/// Progress recorded when a worker picks a job up.
pub const PROGRESS_STARTED: u8 = 10;
/// Progress recorded once the media has been fetched into scratch space.
pub const PROGRESS_DOWNLOADED: u8 = 60;
/// Progress recorded once the artifact has been published.
pub const PROGRESS_UPLOADED: u8 = 80;
pub const PROGRESS_DONE: u8 = 100;

/// Output category of a conversion.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// File extension of artifacts of this kind.
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Audio => "mp3",
            MediaKind::Video => "mp4",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        })
    }
}

/// Resolution/bitrate tier.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    Medium,
    High,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        })
    }
}

/// A conversion request as handed over by admission, before it has an id or
/// any lifecycle state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewJob {
    pub source_ref: String,
    pub kind: MediaKind,
    pub quality: Quality,
    pub priority: i32,
}

/// Which remote step an attempt count belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    Download,
    Upload,
}

/// A point update to a job record. Every change a worker makes to a job goes
/// through [`Job::apply`], which enforces the state machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobUpdate {
    /// queued -> processing, progress set to [`PROGRESS_STARTED`].
    Start,
    /// Raises progress; lower values than the current one are ignored.
    Progress(u8),
    Attempts { step: Step, count: u32 },
    /// processing -> completed.
    Complete { result_ref: String },
    /// processing -> failed.
    Fail { error: String },
}

/// The persisted unit of conversion work.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "source")]
    pub source_ref: String,
    pub kind: MediaKind,
    pub quality: Quality,
    pub priority: i32,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(rename = "result", skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "download-attempts")]
    pub download_attempts: u32,
    #[serde(rename = "upload-attempts")]
    pub upload_attempts: u32,
    #[serde(rename = "created-at")]
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Creates a queued record with a fresh id.
    pub fn new(request: NewJob) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_ref: request.source_ref,
            kind: request.kind,
            quality: request.quality,
            priority: request.priority,
            status: JobStatus::Queued,
            progress: 0,
            result_ref: None,
            error: None,
            download_attempts: 0,
            upload_attempts: 0,
            created_at: Utc::now(),
        }
    }

    /// The lane this job is admitted into.
    pub fn lane(&self) -> Lane {
        Lane::for_priority(self.priority)
    }

    pub fn apply(&mut self, update: JobUpdate) -> Result<(), TransitionError> {
        match update {
            JobUpdate::Start => {
                self.transition(JobStatus::Processing)?;
                self.progress = PROGRESS_STARTED;
            },
            JobUpdate::Progress(progress) => {
                self.expect_processing()?;
                self.progress = self.progress.max(progress.min(PROGRESS_DONE));
            },
            JobUpdate::Attempts { step, count } => {
                self.expect_processing()?;
                match step {
                    Step::Download => self.download_attempts = count,
                    Step::Upload => self.upload_attempts = count,
                }
            },
            JobUpdate::Complete { result_ref } => {
                self.transition(JobStatus::Completed)?;
                self.progress = PROGRESS_DONE;
                self.result_ref = Some(result_ref);
                self.error = None;
            },
            JobUpdate::Fail { error } => {
                self.transition(JobStatus::Failed)?;
                self.result_ref = None;
                self.error = Some(error);
            },
        }

        Ok(())
    }

    fn transition(&mut self, to: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to,
            });
        }

        self.status = to;
        Ok(())
    }

    fn expect_processing(&self) -> Result<(), TransitionError> {
        match self.status {
            JobStatus::Processing => Ok(()),
            other => Err(TransitionError::NotProcessing(other)),
        }
    }
}
