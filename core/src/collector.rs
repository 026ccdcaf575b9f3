//! Accumulates progress events into one terminal snapshot.
//!
//! # Design
//! Both collectors walk `Idle -> Accumulating -> Finalized`. Every event
//! handler returns a `Result` so a transport that breaks the event protocol
//! (body bytes after completion, a second terminal event, shrinking byte
//! counts) is reported as an `InvariantViolation` instead of being absorbed.
//! Nothing is ever overwritten once `Finalized`.
//!
//! `DataCollector` never decodes. It hands the whole buffer over only at the
//! terminal event, so decoding cannot run on a partial body.

use std::fs;
use std::path::Path;

use crate::error::{HarnessError, Result, TransportError};
use crate::http::ResponseMeta;
use crate::outcome::DownloadedArtifact;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Accumulating,
    Finalized,
}

fn violation(msg: impl Into<String>) -> HarnessError {
    HarnessError::InvariantViolation(msg.into())
}

/// Complete body of a fetch, released by `DataCollector::finish`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedBody {
    pub meta: ResponseMeta,
    pub body: Vec<u8>,
    pub chunks: usize,
}

#[derive(Debug)]
pub struct DataCollector {
    state: CollectorState,
    meta: Option<ResponseMeta>,
    buffer: Vec<u8>,
    chunks: usize,
}

impl Default for DataCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl DataCollector {
    pub fn new() -> Self {
        Self {
            state: CollectorState::Idle,
            meta: None,
            buffer: Vec::new(),
            chunks: 0,
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn on_response(&mut self, meta: &ResponseMeta) -> Result<()> {
        if self.state == CollectorState::Finalized {
            return Err(violation("response received after the terminal event"));
        }
        if self.meta.is_some() {
            return Err(violation("response received twice"));
        }
        self.meta = Some(meta.clone());
        Ok(())
    }

    pub fn on_data(&mut self, chunk: &[u8]) -> Result<()> {
        if self.state == CollectorState::Finalized {
            return Err(violation(format!(
                "{} body bytes received after the terminal event",
                chunk.len()
            )));
        }
        self.state = CollectorState::Accumulating;
        self.buffer.extend_from_slice(chunk);
        self.chunks += 1;
        Ok(())
    }

    /// Terminal event. Succeeds at most once; the buffer is moved out.
    pub fn finish(&mut self, error: Option<TransportError>) -> Result<CollectedBody> {
        if self.state == CollectorState::Finalized {
            return Err(violation("duplicate terminal event"));
        }
        self.state = CollectorState::Finalized;
        if let Some(err) = error {
            return Err(err.into());
        }
        let meta = self
            .meta
            .take()
            .ok_or_else(|| violation("task completed without a response"))?;
        Ok(CollectedBody {
            meta,
            body: std::mem::take(&mut self.buffer),
            chunks: self.chunks,
        })
    }
}

#[derive(Debug)]
pub struct DownloadCollector {
    state: CollectorState,
    meta: Option<ResponseMeta>,
    total_bytes_written: u64,
    total_bytes_expected: Option<u64>,
    progress_events: usize,
}

impl Default for DownloadCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadCollector {
    pub fn new() -> Self {
        Self {
            state: CollectorState::Idle,
            meta: None,
            total_bytes_written: 0,
            total_bytes_expected: None,
            progress_events: 0,
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    /// Length announced by the response, or by the latest progress event.
    pub fn total_bytes_expected(&self) -> Option<u64> {
        self.total_bytes_expected
    }

    pub fn progress_events(&self) -> usize {
        self.progress_events
    }

    pub fn on_response(&mut self, meta: &ResponseMeta) -> Result<()> {
        if self.state == CollectorState::Finalized {
            return Err(violation("response received after the terminal event"));
        }
        if self.meta.is_some() {
            return Err(violation("response received twice"));
        }
        self.total_bytes_expected = meta.expected_length();
        self.meta = Some(meta.clone());
        Ok(())
    }

    pub fn on_progress(
        &mut self,
        bytes_written: u64,
        total_bytes_written: u64,
        total_bytes_expected: Option<u64>,
    ) -> Result<()> {
        if self.state == CollectorState::Finalized {
            return Err(violation("progress reported after the terminal event"));
        }
        if total_bytes_written < self.total_bytes_written {
            return Err(violation(format!(
                "total bytes written went backwards: {} after {}",
                total_bytes_written, self.total_bytes_written
            )));
        }
        if total_bytes_written - self.total_bytes_written != bytes_written {
            return Err(violation(format!(
                "progress of {bytes_written} bytes does not account for total moving from {} to {}",
                self.total_bytes_written, total_bytes_written
            )));
        }
        self.state = CollectorState::Accumulating;
        self.total_bytes_written = total_bytes_written;
        if total_bytes_expected.is_some() {
            self.total_bytes_expected = total_bytes_expected;
        }
        self.progress_events += 1;
        Ok(())
    }

    /// Terminal event. Compares the artifact's size on disk with the last
    /// reported total; a mismatch reports both numbers.
    pub fn on_finished(&mut self, location: &Path) -> Result<DownloadedArtifact> {
        if self.state == CollectorState::Finalized {
            return Err(violation("duplicate terminal event"));
        }
        self.state = CollectorState::Finalized;

        let status = self
            .meta
            .as_ref()
            .map(|m| m.status)
            .ok_or_else(|| violation("download finished without a response"))?;
        let size_on_disk = verify_artifact(
            location,
            self.total_bytes_written,
            self.total_bytes_expected,
        )?;
        Ok(DownloadedArtifact {
            status,
            location: location.to_path_buf(),
            size_on_disk,
            total_bytes_written: self.total_bytes_written,
            progress_events: self.progress_events,
        })
    }

    /// Terminal event for a task that ended without an artifact.
    pub fn on_failed(&mut self, error: TransportError) -> HarnessError {
        if self.state == CollectorState::Finalized {
            return violation(format!("duplicate terminal event ({error})"));
        }
        self.state = CollectorState::Finalized;
        error.into()
    }
}

/// Check a materialized artifact against the byte count reported for it.
///
/// Returns the size on disk. The size must equal `total_bytes_written`
/// exactly, and a length the server announced must agree as well.
pub fn verify_artifact(
    location: &Path,
    total_bytes_written: u64,
    total_bytes_expected: Option<u64>,
) -> Result<u64> {
    let size_on_disk = fs::metadata(location)
        .map_err(|e| {
            violation(format!(
                "unable to read size of downloaded file {}: {e}",
                location.display()
            ))
        })?
        .len();
    if size_on_disk != total_bytes_written {
        return Err(violation(format!(
            "downloaded file is {size_on_disk} bytes but {total_bytes_written} bytes were reported written"
        )));
    }
    if let Some(expected) = total_bytes_expected {
        if expected != total_bytes_written {
            return Err(violation(format!(
                "server announced {expected} bytes but {total_bytes_written} bytes were written"
            )));
        }
    }
    Ok(size_on_disk)
}
