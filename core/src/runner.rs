//! Binds one operation to one transport task and one completion signal.
//!
//! # Design
//! `TaskRunner::run` starts exactly one task and returns without blocking.
//! Who fulfills the signal depends on the mode:
//! - `Callback`: the completion closure handed to the transport decodes or
//!   verifies the result and fulfills the signal itself.
//! - `Delegate`: an observer owning a collector receives every event and
//!   fulfills the signal from its terminal event. The runner never touches
//!   the signal on this path.
//!
//! Both paths share `fetched_payload` and `downloaded_payload`, so the same
//! transport behavior yields the same `Outcome` in either mode. A transport
//! failure always reaches the signal as `Outcome::Failure`.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::collector::{verify_artifact, CollectedBody, DataCollector, DownloadCollector};
use crate::decode;
use crate::delegate::{DataDelegate, DownloadDelegate, TaskId, WriteProgress};
use crate::error::{HarnessError, Result, TransportError};
use crate::http::{OperationRequest, ResponseMeta};
use crate::outcome::{DownloadedArtifact, FetchedData, Outcome, Payload};
use crate::signal::CompletionSignal;
use crate::transport::{DataResponse, DownloadResponse, TaskHandle, Transport};

/// The only status an operation accepts.
pub const EXPECTED_STATUS: u16 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    Callback,
    Delegate,
}

impl CompletionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionMode::Callback => "callback",
            CompletionMode::Delegate => "delegate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// Fetch a body; when `field` is set, decode it and extract that field.
    Fetch { field: Option<String> },
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OperationKind,
    pub request: OperationRequest,
}

impl Operation {
    pub fn fetch(request: impl Into<OperationRequest>, field: Option<&str>) -> Self {
        Self {
            kind: OperationKind::Fetch {
                field: field.map(str::to_string),
            },
            request: request.into(),
        }
    }

    pub fn download(request: impl Into<OperationRequest>) -> Self {
        Self {
            kind: OperationKind::Download,
            request: request.into(),
        }
    }
}

pub struct TaskRunner {
    transport: Arc<dyn Transport>,
    mode: CompletionMode,
    signal: CompletionSignal<Outcome>,
    handle: Option<TaskHandle>,
}

impl TaskRunner {
    pub fn new(transport: Arc<dyn Transport>, mode: CompletionMode) -> Self {
        Self {
            transport,
            mode,
            signal: CompletionSignal::new(),
            handle: None,
        }
    }

    pub fn mode(&self) -> CompletionMode {
        self.mode
    }

    /// The signal this runner's task will fulfill.
    pub fn signal(&self) -> CompletionSignal<Outcome> {
        self.signal.clone()
    }

    pub fn handle(&self) -> Option<&TaskHandle> {
        self.handle.as_ref()
    }

    /// Start the operation. A runner starts at most one task.
    pub fn run(&mut self, operation: Operation) -> Result<TaskHandle> {
        if let Some(existing) = &self.handle {
            return Err(HarnessError::InvariantViolation(format!(
                "runner already started task {}",
                existing.id()
            )));
        }
        let Operation { kind, request } = operation;
        let signal = self.signal.clone();
        let handle = match (kind, self.mode) {
            (OperationKind::Fetch { field }, CompletionMode::Delegate) => self
                .transport
                .data_task(request, Box::new(FetchObserver::new(field, signal))),
            (OperationKind::Fetch { field }, CompletionMode::Callback) => {
                self.transport.data_task_with_handler(
                    request,
                    Box::new(move |task: TaskId, result: Result<DataResponse>| {
                        let outcome: Outcome = result
                            .and_then(|r| {
                                fetched_payload(
                                    CollectedBody {
                                        meta: r.meta,
                                        body: r.body,
                                        chunks: r.chunks,
                                    },
                                    field.as_deref(),
                                )
                            })
                            .into();
                        if !signal.fulfill(outcome) {
                            error!(task_id = %task, "completion handler ran after the outcome was recorded");
                        }
                    }),
                )
            }
            (OperationKind::Download, CompletionMode::Delegate) => self
                .transport
                .download_task(request, Box::new(DownloadObserver::new(signal))),
            (OperationKind::Download, CompletionMode::Callback) => {
                self.transport.download_task_with_handler(
                    request,
                    Box::new(move |task: TaskId, result: Result<DownloadResponse>| {
                        let outcome: Outcome = result.and_then(downloaded_payload).into();
                        if !signal.fulfill(outcome) {
                            error!(task_id = %task, "completion handler ran after the outcome was recorded");
                        }
                    }),
                )
            }
        };
        info!(task_id = %handle.id(), mode = self.mode.as_str(), "task started");
        self.handle = Some(handle.clone());
        Ok(handle)
    }
}

fn require_expected_status(status: u16) -> Result<()> {
    if status == EXPECTED_STATUS {
        Ok(())
    } else {
        Err(TransportError::Status { status }.into())
    }
}

/// Status check, then decode of the complete body.
fn fetched_payload(collected: CollectedBody, field: Option<&str>) -> Result<Payload> {
    require_expected_status(collected.meta.status)?;
    let decoded = match field {
        Some(key) => Some(decode::first_record_field(&collected.body, key)?),
        None => None,
    };
    Ok(Payload::Fetched(FetchedData {
        status: collected.meta.status,
        body: collected.body,
        chunks: collected.chunks,
        decoded,
    }))
}

/// Size check against the artifact, then status check.
fn downloaded_payload(response: DownloadResponse) -> Result<Payload> {
    let size_on_disk = verify_artifact(
        &response.location,
        response.total_bytes_written,
        response.total_bytes_expected,
    )?;
    require_expected_status(response.meta.status)?;
    Ok(Payload::Downloaded(DownloadedArtifact {
        status: response.meta.status,
        location: response.location,
        size_on_disk,
        total_bytes_written: response.total_bytes_written,
        progress_events: response.progress_events,
    }))
}

struct FetchObserver {
    collector: DataCollector,
    field: Option<String>,
    signal: CompletionSignal<Outcome>,
}

impl FetchObserver {
    fn new(field: Option<String>, signal: CompletionSignal<Outcome>) -> Self {
        Self {
            collector: DataCollector::new(),
            field,
            signal,
        }
    }
}

impl DataDelegate for FetchObserver {
    fn did_receive_response(&mut self, task: TaskId, meta: &ResponseMeta) {
        if let Err(e) = self.collector.on_response(meta) {
            error!(task_id = %task, error = %e, "transport broke the event protocol");
        }
    }

    fn did_receive_data(&mut self, task: TaskId, chunk: &[u8]) {
        debug!(task_id = %task, bytes = chunk.len(), "data received");
        if let Err(e) = self.collector.on_data(chunk) {
            error!(task_id = %task, error = %e, "transport broke the event protocol");
        }
    }

    fn did_complete(&mut self, task: TaskId, error: Option<TransportError>) {
        let result = self
            .collector
            .finish(error)
            .and_then(|body| fetched_payload(body, self.field.as_deref()));
        if let Err(HarnessError::InvariantViolation(msg)) = &result {
            error!(task_id = %task, violation = %msg, "fetch collector rejected terminal event");
        }
        if !self.signal.fulfill(result.into()) {
            error!(task_id = %task, "terminal event arrived after the outcome was recorded");
        }
    }
}

struct DownloadObserver {
    collector: DownloadCollector,
    finished: Option<Result<DownloadedArtifact>>,
    completed: bool,
    signal: CompletionSignal<Outcome>,
}

impl DownloadObserver {
    fn new(signal: CompletionSignal<Outcome>) -> Self {
        Self {
            collector: DownloadCollector::new(),
            finished: None,
            completed: false,
            signal,
        }
    }
}

impl DownloadDelegate for DownloadObserver {
    fn did_receive_response(&mut self, task: TaskId, meta: &ResponseMeta) {
        if let Err(e) = self.collector.on_response(meta) {
            error!(task_id = %task, error = %e, "transport broke the event protocol");
        }
    }

    fn did_write_data(&mut self, task: TaskId, progress: WriteProgress) {
        debug!(
            task_id = %task,
            bytes = progress.bytes_written,
            total = progress.total_bytes_written,
            "data written"
        );
        if let Err(e) = self.collector.on_progress(
            progress.bytes_written,
            progress.total_bytes_written,
            progress.total_bytes_expected,
        ) {
            error!(task_id = %task, error = %e, "download progress rejected");
            self.finished.get_or_insert(Err(e));
        }
    }

    fn did_finish_downloading(&mut self, task: TaskId, location: &Path) {
        let result = self.collector.on_finished(location).and_then(|artifact| {
            require_expected_status(artifact.status)?;
            Ok(artifact)
        });
        match self.finished.as_ref().map(|r| r.is_ok()) {
            // Progress already failed; keep the first failure.
            Some(false) => {}
            Some(true) => {
                error!(task_id = %task, "duplicate finish event");
                self.finished = Some(Err(HarnessError::InvariantViolation(
                    "duplicate terminal event".to_string(),
                )));
            }
            None => self.finished = Some(result),
        }
    }

    fn did_complete(&mut self, task: TaskId, error: Option<TransportError>) {
        // `did_finish_downloading` has already finalized the collector.
        if self.completed {
            error!(task_id = %task, violation = "duplicate terminal event", "download observer rejected terminal event");
            return;
        }
        self.completed = true;
        let result = match (error, self.finished.take()) {
            (Some(err), _) => Err(self.collector.on_failed(err)),
            (None, Some(finished)) => finished,
            (None, None) => Err(HarnessError::InvariantViolation(
                "download completed without a final location".to_string(),
            )),
        };
        let outcome: Outcome = result.map(Payload::Downloaded).into();
        if !self.signal.fulfill(outcome) {
            error!(task_id = %task, "terminal event arrived after the outcome was recorded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Script, ScriptedTransport};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);
    const NEPAL: &[u8] = br#"[{"name":"Nepal","capital":"Kathmandu","region":"Asia"}]"#;

    fn outcome_for(script: Script, mode: CompletionMode, operation: Operation) -> Outcome {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(script, dir.path()));
        let mut runner = TaskRunner::new(transport, mode);
        let signal = runner.signal();
        runner.run(operation).unwrap();
        signal.wait_timeout(WAIT).expect("signal never fired")
    }

    fn fetch_capital() -> Operation {
        Operation::fetch("http://countries.test/rest/v1/name/Nepal?fullText=true", Some("capital"))
    }

    #[test]
    fn delegate_fetch_decodes_multi_chunk_body() {
        let outcome = outcome_for(Script::chunked(NEPAL, 7), CompletionMode::Delegate, fetch_capital());
        assert_eq!(outcome.decoded(), Some("Kathmandu"));
        match outcome {
            Outcome::Success(Payload::Fetched(data)) => {
                assert_eq!(data.chunks, NEPAL.len().div_ceil(7));
                assert_eq!(data.body, NEPAL.to_vec());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn callback_fetch_decodes_body() {
        let outcome = outcome_for(Script::ok([NEPAL]), CompletionMode::Callback, fetch_capital());
        assert_eq!(outcome.decoded(), Some("Kathmandu"));
    }

    #[test]
    fn modes_agree_on_equivalent_scripts() {
        let scripts = [
            Script::chunked(NEPAL, 5),
            Script::status(404),
            Script::fail(TransportError::Network("connection refused".to_string())),
            Script::ok([&b"<html>oops</html>"[..]]),
        ];
        for script in scripts {
            let by_callback = outcome_for(script.clone(), CompletionMode::Callback, fetch_capital());
            let by_delegate = outcome_for(script.clone(), CompletionMode::Delegate, fetch_capital());
            assert_eq!(by_callback, by_delegate, "script {script:?}");
        }
    }

    #[test]
    fn non_200_status_is_a_failure_in_both_modes() {
        for mode in [CompletionMode::Callback, CompletionMode::Delegate] {
            let outcome = outcome_for(Script::status(503), mode, fetch_capital());
            assert_eq!(
                outcome,
                Outcome::Failure(HarnessError::Transport(TransportError::Status { status: 503 }))
            );
        }
    }

    #[test]
    fn malformed_body_is_a_decode_failure_not_a_sentinel() {
        let outcome = outcome_for(Script::ok([&b"not json"[..]]), CompletionMode::Delegate, fetch_capital());
        assert!(matches!(outcome, Outcome::Failure(HarnessError::Decode(_))));
        assert_eq!(outcome.decoded(), None);
    }

    #[test]
    fn failure_after_partial_body_reaches_the_signal() {
        let script = Script {
            failure: Some(TransportError::Network("reset by peer".to_string())),
            ..Script::chunked(NEPAL, 10)
        };
        for mode in [CompletionMode::Callback, CompletionMode::Delegate] {
            let outcome = outcome_for(script.clone(), mode, fetch_capital());
            assert_eq!(
                outcome,
                Outcome::Failure(HarnessError::Transport(TransportError::Network(
                    "reset by peer".to_string()
                )))
            );
        }
    }

    #[test]
    fn download_reports_written_total_in_both_modes() {
        let body = vec![b'x'; 1000];
        for mode in [CompletionMode::Callback, CompletionMode::Delegate] {
            let outcome = outcome_for(
                Script::chunked(&body, 128),
                mode,
                Operation::download("http://files.test/LICENSE.txt"),
            );
            let artifact = outcome.artifact().expect("download failed");
            assert_eq!(artifact.total_bytes_written, 1000);
            assert_eq!(artifact.size_on_disk, 1000);
            assert_eq!(artifact.progress_events, 8);
        }
    }

    #[test]
    fn short_artifact_is_an_invariant_violation() {
        let script = Script::chunked(&[1u8; 64], 16).with_short_artifact(4);
        for mode in [CompletionMode::Callback, CompletionMode::Delegate] {
            let outcome = outcome_for(script.clone(), mode, Operation::download("http://files.test/a"));
            assert_eq!(
                outcome,
                Outcome::Failure(HarnessError::InvariantViolation(
                    "downloaded file is 60 bytes but 64 bytes were reported written".to_string()
                ))
            );
        }
    }

    /// Reports totals of 10, 20 and then 15 bytes for a 15-byte artifact.
    struct MiscountingTransport {
        dir: std::path::PathBuf,
    }

    impl Transport for MiscountingTransport {
        fn data_task(&self, _request: OperationRequest, mut delegate: Box<dyn DataDelegate>) -> TaskHandle {
            let handle = TaskHandle::new();
            delegate.did_complete(handle.id(), Some(TransportError::Cancelled));
            handle
        }

        fn download_task(
            &self,
            _request: OperationRequest,
            mut delegate: Box<dyn DownloadDelegate>,
        ) -> TaskHandle {
            let handle = TaskHandle::new();
            let task = handle.id();
            let location = self.dir.join(format!("{task}.download"));
            std::fs::write(&location, [0u8; 15]).unwrap();
            delegate.did_receive_response(task, &ResponseMeta::new(200));
            for (bytes, total) in [(10, 10), (10, 20), (5, 15)] {
                delegate.did_write_data(
                    task,
                    WriteProgress {
                        bytes_written: bytes,
                        total_bytes_written: total,
                        total_bytes_expected: None,
                    },
                );
            }
            delegate.did_finish_downloading(task, &location);
            delegate.did_complete(task, None);
            handle
        }
    }

    #[test]
    fn shrinking_progress_fails_in_both_modes() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(MiscountingTransport {
            dir: dir.path().to_path_buf(),
        });
        for mode in [CompletionMode::Callback, CompletionMode::Delegate] {
            let mut runner = TaskRunner::new(transport.clone(), mode);
            let signal = runner.signal();
            runner.run(Operation::download("http://files.test/a")).unwrap();
            assert_eq!(
                signal.wait_timeout(WAIT).unwrap(),
                Outcome::Failure(HarnessError::InvariantViolation(
                    "total bytes written went backwards: 15 after 20".to_string()
                )),
                "{mode:?}"
            );
        }
    }

    #[test]
    fn announced_length_mismatch_fails_in_both_modes() {
        let script = Script::chunked(&[1u8; 30], 10).with_header("Content-Length", "32");
        for mode in [CompletionMode::Callback, CompletionMode::Delegate] {
            let outcome = outcome_for(script.clone(), mode, Operation::download("http://files.test/a"));
            assert_eq!(
                outcome,
                Outcome::Failure(HarnessError::InvariantViolation(
                    "server announced 32 bytes but 30 bytes were written".to_string()
                )),
                "{mode:?}"
            );
        }
    }

    #[test]
    fn cancel_mid_body_stops_a_slow_transfer() {
        let script = Script::chunked(NEPAL, 4).with_chunk_delay(Duration::from_millis(20));
        let operations = [fetch_capital(), Operation::download("http://files.test/a")];
        for mode in [CompletionMode::Callback, CompletionMode::Delegate] {
            for operation in operations.clone() {
                let dir = tempfile::tempdir().unwrap();
                let transport = Arc::new(ScriptedTransport::new(script.clone(), dir.path()));
                let mut runner = TaskRunner::new(transport, mode);
                let signal = runner.signal();
                let handle = runner.run(operation).unwrap();
                std::thread::sleep(Duration::from_millis(50));
                assert!(signal.is_pending());
                handle.cancel();
                assert_eq!(
                    signal.wait_timeout(WAIT).unwrap(),
                    Outcome::Failure(HarnessError::Transport(TransportError::Cancelled))
                );
            }
        }
    }

    #[test]
    fn duplicate_download_completion_keeps_first_outcome() {
        let script = Script::chunked(&[3u8; 40], 16).with_duplicate_completion();
        for mode in [CompletionMode::Callback, CompletionMode::Delegate] {
            let dir = tempfile::tempdir().unwrap();
            let transport = Arc::new(ScriptedTransport::new(script.clone(), dir.path()));
            let mut runner = TaskRunner::new(transport, mode);
            let signal = runner.signal();
            runner.run(Operation::download("http://files.test/a")).unwrap();
            let first = signal.wait_timeout(WAIT).unwrap();
            std::thread::sleep(Duration::from_millis(50));
            let artifact = first.artifact().unwrap_or_else(|| panic!("{mode:?}: {first:?}"));
            assert_eq!(artifact.total_bytes_written, 40);
            assert_eq!(artifact.progress_events, 3);
            assert!(!artifact.location.exists(), "artifact should be removed after completion");
            assert_eq!(signal.wait_timeout(WAIT).unwrap(), first);
        }
    }

    #[test]
    fn duplicate_terminal_event_keeps_first_outcome() {
        let script = Script::ok([NEPAL]).with_duplicate_completion();
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(script, dir.path()));
        let mut runner = TaskRunner::new(transport, CompletionMode::Delegate);
        let signal = runner.signal();
        runner.run(fetch_capital()).unwrap();
        let first = signal.wait_timeout(WAIT).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(first.decoded(), Some("Kathmandu"));
        assert_eq!(signal.wait_timeout(WAIT).unwrap(), first);
    }

    #[test]
    fn run_starts_exactly_one_task() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(Script::ok([NEPAL]), dir.path()));
        let mut runner = TaskRunner::new(transport.clone(), CompletionMode::Callback);
        runner.run(fetch_capital()).unwrap();
        assert!(matches!(
            runner.run(fetch_capital()),
            Err(HarnessError::InvariantViolation(_))
        ));
        assert_eq!(transport.started(), 1);
        assert!(runner.handle().is_some());
    }

    #[test]
    fn run_returns_before_the_task_completes() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(Script::stall(), dir.path()));
        let mut runner = TaskRunner::new(transport, CompletionMode::Delegate);
        let signal = runner.signal();
        let handle = runner.run(fetch_capital()).unwrap();
        assert!(signal.is_pending());
        handle.cancel();
        assert_eq!(
            signal.wait_timeout(WAIT).unwrap(),
            Outcome::Failure(HarnessError::Transport(TransportError::Cancelled))
        );
    }
}
