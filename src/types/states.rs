use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a conversion job.
///
/// `Queued` is initial; `Completed` and `Failed` are terminal. The only legal
/// path is queued -> processing -> {completed | failed}.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a job in this state may move to `next`.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, next),
            (Queued, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use JobStatus::*;

        f.write_str(match self {
            Queued => "queued",
            Processing => "processing",
            Completed => "completed",
            Failed => "failed",
        })
    }
}

/// A rejected change to a job record.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("cannot move job from {from} to {to}")]
    Illegal { from: JobStatus, to: JobStatus },
    #[error("job is {0}, not processing")]
    NotProcessing(JobStatus),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use JobStatus::*;

        let all = [Queued, Processing, Completed, Failed];
        let legal = [
            (Queued, Processing),
            (Processing, Completed),
            (Processing, Failed),
        ];

        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }

        assert!(Completed.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Queued.is_terminal());
        assert!(!Processing.is_terminal());
    }
}
