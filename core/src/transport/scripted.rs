//! In-memory transport that replays a fixed event script on a worker thread.
//!
//! Lets harness behavior be checked without a network: identical scripts
//! drive the callback and delegate paths through identical event sequences,
//! and misbehaving transports (stalls, duplicate terminal events, artifacts
//! that disagree with reported progress) can be reproduced on demand.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use super::{remove_artifact, TaskHandle, Transport};
use crate::delegate::{DataDelegate, DownloadDelegate, TaskId, WriteProgress};
use crate::error::TransportError;
use crate::http::{OperationRequest, ResponseMeta};

const STALL_POLL: Duration = Duration::from_millis(5);

/// The events one task will emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    /// `None` means the transport fails before any response arrives.
    pub response: Option<ResponseMeta>,
    pub chunks: Vec<Vec<u8>>,
    pub failure: Option<TransportError>,
    /// Never complete on its own; end only when cancelled.
    pub stall: bool,
    pub chunk_delay: Duration,
    pub duplicate_completion: bool,
    /// Bytes dropped from the on-disk artifact while still being reported.
    pub short_artifact_by: u64,
}

impl Script {
    /// A 200 response with the given body pieces.
    pub fn ok<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            response: Some(ResponseMeta::new(200)),
            chunks: chunks.into_iter().map(Into::into).collect(),
            failure: None,
            stall: false,
            chunk_delay: Duration::ZERO,
            duplicate_completion: false,
            short_artifact_by: 0,
        }
    }

    /// A response with `status` and an empty body.
    pub fn status(status: u16) -> Self {
        Self {
            response: Some(ResponseMeta::new(status)),
            ..Self::ok(Vec::<Vec<u8>>::new())
        }
    }

    /// Fails with `error` before any response.
    pub fn fail(error: TransportError) -> Self {
        Self {
            response: None,
            failure: Some(error),
            ..Self::ok(Vec::<Vec<u8>>::new())
        }
    }

    /// Never delivers a terminal event unless cancelled.
    pub fn stall() -> Self {
        Self {
            stall: true,
            ..Self::ok(Vec::<Vec<u8>>::new())
        }
    }

    /// Split `body` into pieces of at most `size` bytes.
    pub fn chunked(body: &[u8], size: usize) -> Self {
        Self::ok(body.chunks(size.max(1)).map(<[u8]>::to_vec))
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let Some(meta) = self.response.as_mut() {
            meta.headers.push((name.to_string(), value.to_string()));
        }
        self
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn with_duplicate_completion(mut self) -> Self {
        self.duplicate_completion = true;
        self
    }

    pub fn with_short_artifact(mut self, missing: u64) -> Self {
        self.short_artifact_by = missing;
        self
    }
}

/// Replays one `Script` for every task it starts.
#[derive(Debug, Clone)]
pub struct ScriptedTransport {
    script: Script,
    download_dir: PathBuf,
    started: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new(script: Script, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            script,
            download_dir: download_dir.into(),
            started: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of tasks started so far.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn data_task(&self, request: OperationRequest, mut delegate: Box<dyn DataDelegate>) -> TaskHandle {
        self.started.fetch_add(1, Ordering::SeqCst);
        let handle = TaskHandle::new();
        let worker = handle.clone();
        let script = self.script.clone();
        debug!(task_id = %handle.id(), url = request.url(), "replaying data script");

        thread::spawn(move || {
            let task = worker.id();
            let result = replay_data(&script, &worker, delegate.as_mut());
            delegate.did_complete(task, result.err());
            if script.duplicate_completion {
                delegate.did_complete(task, None);
            }
        });
        handle
    }

    fn download_task(
        &self,
        request: OperationRequest,
        mut delegate: Box<dyn DownloadDelegate>,
    ) -> TaskHandle {
        self.started.fetch_add(1, Ordering::SeqCst);
        let handle = TaskHandle::new();
        let worker = handle.clone();
        let script = self.script.clone();
        let location = self.download_dir.join(format!("{}.download", handle.id()));
        debug!(task_id = %handle.id(), url = request.url(), "replaying download script");

        thread::spawn(move || {
            let task = worker.id();
            let result = replay_download(&script, &worker, &location, delegate.as_mut());
            delegate.did_complete(task, result.err());
            if script.duplicate_completion {
                delegate.did_complete(task, None);
            }
            remove_artifact(task, &location);
        });
        handle
    }
}

fn wait_for_cancel(handle: &TaskHandle) -> TransportError {
    while !handle.is_cancelled() {
        thread::sleep(STALL_POLL);
    }
    TransportError::Cancelled
}

fn pause(script: &Script, handle: &TaskHandle) -> Result<(), TransportError> {
    if !script.chunk_delay.is_zero() {
        thread::sleep(script.chunk_delay);
    }
    if handle.is_cancelled() {
        return Err(TransportError::Cancelled);
    }
    Ok(())
}

fn replay_data(
    script: &Script,
    handle: &TaskHandle,
    delegate: &mut dyn DataDelegate,
) -> Result<(), TransportError> {
    let task: TaskId = handle.id();
    if script.stall {
        return Err(wait_for_cancel(handle));
    }
    let Some(meta) = &script.response else {
        return Err(script.failure.clone().unwrap_or(TransportError::Cancelled));
    };
    delegate.did_receive_response(task, meta);
    for chunk in &script.chunks {
        pause(script, handle)?;
        delegate.did_receive_data(task, chunk);
    }
    match &script.failure {
        Some(err) => Err(err.clone()),
        None => Ok(()),
    }
}

fn replay_download(
    script: &Script,
    handle: &TaskHandle,
    location: &Path,
    delegate: &mut dyn DownloadDelegate,
) -> Result<(), TransportError> {
    let task = handle.id();
    if script.stall {
        return Err(wait_for_cancel(handle));
    }
    let Some(meta) = &script.response else {
        return Err(script.failure.clone().unwrap_or(TransportError::Cancelled));
    };
    delegate.did_receive_response(task, meta);

    if let Some(dir) = location.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut file = File::create(location)?;
    let expected = meta.expected_length();
    let mut total = 0u64;
    for chunk in &script.chunks {
        pause(script, handle)?;
        file.write_all(chunk)?;
        total += chunk.len() as u64;
        delegate.did_write_data(
            task,
            WriteProgress {
                bytes_written: chunk.len() as u64,
                total_bytes_written: total,
                total_bytes_expected: expected,
            },
        );
    }
    if let Some(err) = &script.failure {
        return Err(err.clone());
    }
    file.set_len(total.saturating_sub(script.short_artifact_by))?;
    drop(file);
    delegate.did_finish_downloading(task, location);
    Ok(())
}
