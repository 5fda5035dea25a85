use serde::Serialize;

use super::job::{Job, JobId, NewJob};
use super::serialisable::WireSerialisable;
use crate::store::StatusCounts;

/// A command sent by the client to the server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Admits a single conversion job. Replies `QUEUED <id>`.
    ///
    /// On the wire: `convert <kind> <quality> <priority> <source>`
    Convert(NewJob),
    /// Announces that `count` job lines follow, each formatted as
    /// `<kind> <quality> <priority> <source>`. Every line is admitted on its
    /// own; the reply lists one outcome per line in input order.
    ///
    /// On the wire: `convert-batch <count>`
    ConvertBatch { count: u32 },
    /// Returns the full job record, or `NOT_FOUND`.
    ///
    /// On the wire: `status <id>`
    Status { id: JobId },
    /// Returns lane depths, in-flight workers and job counts by status.
    ///
    /// On the wire: `stats`
    Stats,
    /// Requests that the server close this connection.
    ///
    /// On the wire: `quit`
    Quit,
}

/// All possible replies to a `Command`.
#[derive(Debug)]
pub enum Response {
    /// Indicates a server bug. Can be sent in response to any command.
    ///
    /// On the wire: `INTERNAL_ERROR`.
    InternalError,
    /// The client sent a malformed command or job line.
    ///
    /// On the wire: `BAD_FORMAT`.
    BadFormat,
    /// The job record store could not be reached; nothing was admitted.
    ///
    /// On the wire: `UNAVAILABLE`.
    Unavailable,
    /// In response to a `convert-batch`, the announced count exceeded the
    /// configured maximum. The announced lines are read and discarded.
    ///
    /// On the wire: `BATCH_TOO_BIG`.
    BatchTooBig,
    /// In response to a `convert`, the job was stored and placed in a lane.
    ///
    /// On the wire: `QUEUED <id>`.
    Queued { id: JobId },
    /// In response to a `status`, the job is not known.
    ///
    /// On the wire: `NOT_FOUND`.
    NotFound,
    /// In response to a `convert-batch`.
    ///
    /// On the wire: `OK <n_bytes>` plus data in YAML *list* format.
    OkBatch { outcomes: Vec<BatchOutcome> },
    /// In response to a `status`.
    ///
    /// On the wire: `OK <n_bytes>` plus data in YAML dictionary format.
    OkJob { job: Job },
    /// In response to a `stats`.
    ///
    /// On the wire: `OK <n_bytes>` plus data in YAML dictionary format.
    OkStats { data: QueueStats },
}

impl WireSerialisable for Response {
    fn serialise_wire(&self) -> Vec<u8> {
        use Response::*;

        match self {
            InternalError => b"INTERNAL_ERROR\r\n".to_vec(),
            BadFormat => b"BAD_FORMAT\r\n".to_vec(),
            Unavailable => b"UNAVAILABLE\r\n".to_vec(),
            BatchTooBig => b"BATCH_TOO_BIG\r\n".to_vec(),
            Queued { id } => format!("QUEUED {id}\r\n").into(),
            NotFound => b"NOT_FOUND\r\n".to_vec(),
            OkBatch { outcomes } => ok_yaml(outcomes),
            OkJob { job } => ok_yaml(job),
            OkStats { data } => ok_yaml(data),
        }
    }
}

/// Frames `data` as `OK <n_bytes>\r\n<yaml>\r\n`.
fn ok_yaml<T: Serialize>(data: &T) -> Vec<u8> {
    match serde_yaml::to_string(data) {
        Ok(data) => format!("OK {}\r\n{data}\r\n", data.len()).into(),
        Err(error) => {
            tracing::error!(%error, "failed to serialise reply");
            b"INTERNAL_ERROR\r\n".to_vec()
        },
    }
}

/// Result of admitting one line of a batch. Exactly one field is set.
#[derive(Debug, Eq, PartialEq, Serialize)]
pub struct BatchOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchOutcome {
    pub fn queued(id: JobId) -> Self {
        Self {
            id: Some(id),
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            id: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueueStats {
    /// entries waiting in the priority lane
    #[serde(rename = "current-priority-pending")]
    pub priority_pending: usize,
    /// entries waiting in the default lane
    #[serde(rename = "current-default-pending")]
    pub default_pending: usize,
    /// jobs currently held by a worker
    #[serde(rename = "current-in-flight")]
    pub in_flight: usize,
    /// maximum number of jobs processed at once
    #[serde(rename = "concurrency-limit")]
    pub concurrency_limit: usize,
    /// job records by status
    #[serde(flatten)]
    pub jobs: StatusCounts,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::job::{MediaKind, Quality};

    #[test]
    fn test_serialise_simple() {
        assert_eq!(Response::BadFormat.serialise_wire(), b"BAD_FORMAT\r\n");
        assert_eq!(Response::Unavailable.serialise_wire(), b"UNAVAILABLE\r\n");

        let id = uuid::Uuid::nil();
        assert_eq!(
            Response::Queued { id }.serialise_wire(),
            b"QUEUED 00000000-0000-0000-0000-000000000000\r\n"
        );
    }

    #[test]
    fn test_serialise_framed_yaml() {
        let job = Job::new(NewJob {
            source_ref: "abc".into(),
            kind: MediaKind::Video,
            quality: Quality::High,
            priority: 2,
        });

        let wire = Response::OkJob { job }.serialise_wire();
        let wire = String::from_utf8(wire).unwrap();
        let (header, body) = wire.split_once("\r\n").unwrap();
        let body = body.strip_suffix("\r\n").unwrap();

        assert_eq!(header, format!("OK {}", body.len()));
        assert!(body.contains("status: queued"));
        assert!(body.contains("kind: video"));
        assert!(body.contains("source: abc"));
        assert!(!body.contains("result:"));
        assert!(!body.contains("error:"));
    }

    #[test]
    fn test_serialise_batch_outcomes() {
        let outcomes = vec![
            BatchOutcome::queued(uuid::Uuid::nil()),
            BatchOutcome::failed("bad format"),
        ];
        let wire = Response::OkBatch { outcomes }.serialise_wire();
        let wire = String::from_utf8(wire).unwrap();

        assert!(wire.contains("- id: 00000000-0000-0000-0000-000000000000"));
        assert!(wire.contains("- error: bad format"));
    }
}
