//! What a task produces once its completion signal fires.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::HarnessError;

/// Body and status of a finished fetch, plus the decoded field if one was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedData {
    pub status: u16,
    pub body: Vec<u8>,
    /// Number of body events the transport delivered.
    pub chunks: usize,
    pub decoded: Option<String>,
}

/// A download whose on-disk size matched the reported byte count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArtifact {
    pub status: u16,
    /// Where the transport materialized the artifact. Transports may remove
    /// it once the terminal events have returned.
    pub location: PathBuf,
    pub size_on_disk: u64,
    pub total_bytes_written: u64,
    pub progress_events: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Fetched(FetchedData),
    Downloaded(DownloadedArtifact),
}

/// Exactly one of these is produced per submitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(Payload),
    Failure(HarnessError),
    TimedOut(Duration),
}

impl Outcome {
    /// The decoded field of a successful fetch.
    pub fn decoded(&self) -> Option<&str> {
        match self {
            Outcome::Success(Payload::Fetched(data)) => data.decoded.as_deref(),
            _ => None,
        }
    }

    pub fn artifact(&self) -> Option<&DownloadedArtifact> {
        match self {
            Outcome::Success(Payload::Downloaded(artifact)) => Some(artifact),
            _ => None,
        }
    }

    /// Fold into a `Result`, turning a timeout into `HarnessError::Timeout`.
    pub fn into_result(self) -> Result<Payload, HarnessError> {
        match self {
            Outcome::Success(payload) => Ok(payload),
            Outcome::Failure(err) => Err(err),
            Outcome::TimedOut(after) => Err(HarnessError::Timeout(after)),
        }
    }
}

impl From<Result<Payload, HarnessError>> for Outcome {
    fn from(result: Result<Payload, HarnessError>) -> Self {
        match result {
            Ok(payload) => Outcome::Success(payload),
            Err(err) => Outcome::Failure(err),
        }
    }
}
