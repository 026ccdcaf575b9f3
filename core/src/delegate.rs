//! Event protocol between a transport and the object observing one task.
//!
//! # Design
//! One trait per task kind, one method per event. A transport owns the boxed
//! delegate for the lifetime of the task and calls it from the task's worker
//! thread, so implementations get `&mut self` and need no interior locking.
//!
//! Ordering contract every transport honors:
//! - `did_receive_response` at most once, before any body event.
//! - Body events (`did_receive_data` / `did_write_data`) zero or more times.
//! - `did_finish_downloading` at most once, only on success, before completion.
//! - `did_complete` exactly once, last.

use std::fmt;
use std::path::Path;

use uuid::Uuid;

use crate::error::TransportError;
use crate::http::ResponseMeta;

/// Identifies one transport task in logs and artifact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One "wrote N more bytes" notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteProgress {
    pub bytes_written: u64,
    pub total_bytes_written: u64,
    pub total_bytes_expected: Option<u64>,
}

/// Observer of a data (fetch) task.
pub trait DataDelegate: Send {
    fn did_receive_response(&mut self, _task: TaskId, _meta: &ResponseMeta) {}

    fn did_receive_data(&mut self, task: TaskId, chunk: &[u8]);

    /// Terminal. `None` means the body was delivered in full.
    fn did_complete(&mut self, task: TaskId, error: Option<TransportError>);
}

/// Observer of a download task.
pub trait DownloadDelegate: Send {
    fn did_receive_response(&mut self, _task: TaskId, _meta: &ResponseMeta) {}

    fn did_write_data(&mut self, task: TaskId, progress: WriteProgress);

    /// The artifact at `location` is complete. It is only guaranteed to
    /// exist until this call returns.
    fn did_finish_downloading(&mut self, task: TaskId, location: &Path);

    /// Terminal. `None` means `did_finish_downloading` already ran.
    fn did_complete(&mut self, task: TaskId, error: Option<TransportError>);
}
