//! Transports execute operations and report back through delegate events.
//!
//! # Design
//! A `Transport` starts a task and returns a `TaskHandle` immediately; all
//! events are delivered later on a worker context the transport chooses.
//! Callback-style completion is layered on top of the delegate protocol: the
//! `*_with_handler` methods wrap a closure in an adapter delegate that buffers
//! what the events carry and invokes the closure once, at `did_complete`.
//! Download progress goes through the same `DownloadCollector` checks a
//! delegate-mode observer applies, so a broken byte count fails either way.
//! Any transport gets both completion styles by implementing the two
//! delegate entry points.

pub mod network;
pub mod scripted;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::collector::DownloadCollector;
use crate::delegate::{DataDelegate, DownloadDelegate, TaskId, WriteProgress};
use crate::error::{HarnessError, TransportError};
use crate::http::{OperationRequest, ResponseMeta};

pub use network::HttpTransport;
pub use scripted::{Script, ScriptedTransport};

/// Identity of a started task plus a cooperative cancellation flag.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: TaskId,
    cancelled: Arc<AtomicBool>,
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskHandle {
    pub fn new() -> Self {
        Self {
            id: TaskId::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Ask the transport to stop. The task still ends with exactly one
    /// `did_complete`, carrying `TransportError::Cancelled`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Everything a data-task completion closure receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataResponse {
    pub meta: ResponseMeta,
    pub body: Vec<u8>,
    pub chunks: usize,
}

/// Everything a download-task completion closure receives. The file at
/// `location` exists while the closure runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResponse {
    pub meta: ResponseMeta,
    pub location: PathBuf,
    pub total_bytes_written: u64,
    pub total_bytes_expected: Option<u64>,
    pub progress_events: usize,
}

/// Completion closures receive the id of the task they complete.
pub type DataCompletion = Box<dyn FnOnce(TaskId, Result<DataResponse, HarnessError>) + Send>;
pub type DownloadCompletion =
    Box<dyn FnOnce(TaskId, Result<DownloadResponse, HarnessError>) + Send>;

/// Delete a task's artifact once its terminal events have returned.
fn remove_artifact(task: TaskId, location: &Path) {
    match std::fs::remove_file(location) {
        Ok(()) => debug!(task_id = %task, "artifact removed"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(task_id = %task, error = %e, "failed to remove artifact"),
    }
}

pub trait Transport: Send + Sync {
    fn data_task(&self, request: OperationRequest, delegate: Box<dyn DataDelegate>) -> TaskHandle;

    fn download_task(
        &self,
        request: OperationRequest,
        delegate: Box<dyn DownloadDelegate>,
    ) -> TaskHandle;

    fn data_task_with_handler(&self, request: OperationRequest, handler: DataCompletion) -> TaskHandle {
        self.data_task(request, Box::new(DataHandlerAdapter::new(handler)))
    }

    fn download_task_with_handler(
        &self,
        request: OperationRequest,
        handler: DownloadCompletion,
    ) -> TaskHandle {
        self.download_task(request, Box::new(DownloadHandlerAdapter::new(handler)))
    }
}

struct DataHandlerAdapter {
    meta: Option<ResponseMeta>,
    body: Vec<u8>,
    chunks: usize,
    handler: Option<DataCompletion>,
}

impl DataHandlerAdapter {
    fn new(handler: DataCompletion) -> Self {
        Self {
            meta: None,
            body: Vec::new(),
            chunks: 0,
            handler: Some(handler),
        }
    }
}

impl DataDelegate for DataHandlerAdapter {
    fn did_receive_response(&mut self, _task: TaskId, meta: &ResponseMeta) {
        self.meta = Some(meta.clone());
    }

    fn did_receive_data(&mut self, _task: TaskId, chunk: &[u8]) {
        self.body.extend_from_slice(chunk);
        self.chunks += 1;
    }

    fn did_complete(&mut self, task: TaskId, error: Option<TransportError>) {
        let Some(handler) = self.handler.take() else {
            error!(task_id = %task, "completion handler already invoked; dropping terminal event");
            return;
        };
        let result = match (error, self.meta.take()) {
            (Some(err), _) => Err(err.into()),
            (None, Some(meta)) => Ok(DataResponse {
                meta,
                body: std::mem::take(&mut self.body),
                chunks: self.chunks,
            }),
            (None, None) => Err(HarnessError::InvariantViolation(
                "task completed without a response".to_string(),
            )),
        };
        handler(task, result);
    }
}

struct DownloadHandlerAdapter {
    collector: DownloadCollector,
    meta: Option<ResponseMeta>,
    location: Option<PathBuf>,
    /// First progress event the collector rejected.
    rejected: Option<HarnessError>,
    handler: Option<DownloadCompletion>,
}

impl DownloadHandlerAdapter {
    fn new(handler: DownloadCompletion) -> Self {
        Self {
            collector: DownloadCollector::new(),
            meta: None,
            location: None,
            rejected: None,
            handler: Some(handler),
        }
    }
}

impl DownloadDelegate for DownloadHandlerAdapter {
    fn did_receive_response(&mut self, task: TaskId, meta: &ResponseMeta) {
        match self.collector.on_response(meta) {
            Ok(()) => self.meta = Some(meta.clone()),
            Err(e) => error!(task_id = %task, error = %e, "transport broke the event protocol"),
        }
    }

    fn did_write_data(&mut self, task: TaskId, progress: WriteProgress) {
        if let Err(e) = self.collector.on_progress(
            progress.bytes_written,
            progress.total_bytes_written,
            progress.total_bytes_expected,
        ) {
            error!(task_id = %task, error = %e, "download progress rejected");
            self.rejected.get_or_insert(e);
        }
    }

    fn did_finish_downloading(&mut self, _task: TaskId, location: &Path) {
        self.location = Some(location.to_path_buf());
    }

    fn did_complete(&mut self, task: TaskId, error: Option<TransportError>) {
        let Some(handler) = self.handler.take() else {
            error!(task_id = %task, "completion handler already invoked; dropping terminal event");
            return;
        };
        let result = match (error, self.rejected.take(), self.meta.take(), self.location.take()) {
            (Some(err), _, _, _) => Err(err.into()),
            (None, Some(rejected), _, _) => Err(rejected),
            (None, None, Some(meta), Some(location)) => Ok(DownloadResponse {
                meta,
                location,
                total_bytes_written: self.collector.total_bytes_written(),
                total_bytes_expected: self.collector.total_bytes_expected(),
                progress_events: self.collector.progress_events(),
            }),
            (None, None, None, _) => Err(HarnessError::InvariantViolation(
                "download completed without a response".to_string(),
            )),
            (None, None, Some(_), None) => Err(HarnessError::InvariantViolation(
                "download completed without a final location".to_string(),
            )),
        };
        handler(task, result);
    }
}
