//! `ureq`-backed transport. One worker thread per task.
//!
//! # Design
//! Non-2xx statuses come back as data (`http_status_as_error(false)`): a
//! transport reports what the server said, and the runner decides whether
//! the status is acceptable. Bodies are read in `chunk_size` pieces and each
//! piece becomes one event, so even small bodies may arrive in several
//! events. Downloads stream to `<download_dir>/<task-id>.download`, and the
//! file is removed once `did_complete` has returned.
//!
//! Cancellation is cooperative: the flag is checked before the request and
//! between body reads. A read blocked on the socket is bounded by the
//! agent's global timeout.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;

use tracing::{debug, info, warn};
use ureq::typestate::WithBody;
use ureq::{Agent, Body, RequestBuilder};

use super::{remove_artifact, TaskHandle, Transport};
use crate::config::HarnessConfig;
use crate::delegate::{DataDelegate, DownloadDelegate, WriteProgress};
use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, OperationRequest, ResponseMeta};

#[derive(Clone)]
pub struct HttpTransport {
    agent: Agent,
    chunk_size: usize,
    download_dir: PathBuf,
}

impl HttpTransport {
    pub fn new(config: &HarnessConfig) -> Self {
        let agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(config.request_timeout()))
            .build()
            .new_agent();
        Self {
            agent,
            chunk_size: config.chunk_size.max(1),
            download_dir: config.download_dir.clone(),
        }
    }
}

impl Transport for HttpTransport {
    fn data_task(&self, request: OperationRequest, mut delegate: Box<dyn DataDelegate>) -> TaskHandle {
        let handle = TaskHandle::new();
        let worker = handle.clone();
        let agent = self.agent.clone();
        let chunk_size = self.chunk_size;
        let request = request.into_http();
        info!(task_id = %handle.id(), method = request.method.as_str(), url = %request.url, "starting data task");

        thread::spawn(move || {
            let task = worker.id();
            let result = stream_data(&agent, request, chunk_size, &worker, delegate.as_mut());
            if let Err(e) = &result {
                warn!(task_id = %task, error = %e, "data task failed");
            }
            delegate.did_complete(task, result.err());
        });
        handle
    }

    fn download_task(
        &self,
        request: OperationRequest,
        mut delegate: Box<dyn DownloadDelegate>,
    ) -> TaskHandle {
        let handle = TaskHandle::new();
        let worker = handle.clone();
        let agent = self.agent.clone();
        let chunk_size = self.chunk_size;
        let location = self.download_dir.join(format!("{}.download", handle.id()));
        let request = request.into_http();
        info!(task_id = %handle.id(), method = request.method.as_str(), url = %request.url, "starting download task");

        thread::spawn(move || {
            let task = worker.id();
            let result = stream_download(&agent, request, chunk_size, &worker, &location, delegate.as_mut());
            if let Err(e) = &result {
                warn!(task_id = %task, error = %e, "download task failed");
            }
            delegate.did_complete(task, result.err());
            remove_artifact(task, &location);
        });
        handle
    }
}

fn stream_data(
    agent: &Agent,
    request: HttpRequest,
    chunk_size: usize,
    handle: &TaskHandle,
    delegate: &mut dyn DataDelegate,
) -> Result<(), TransportError> {
    let task = handle.id();
    if handle.is_cancelled() {
        return Err(TransportError::Cancelled);
    }
    let mut response = call(agent, request)?;
    let meta = response_meta(&response);
    debug!(task_id = %task, status = meta.status, "response received");
    delegate.did_receive_response(task, &meta);

    let mut reader = response.body_mut().as_reader();
    let mut buf = vec![0u8; chunk_size];
    while let Some(n) = read_chunk(&mut reader, &mut buf, handle)? {
        delegate.did_receive_data(task, &buf[..n]);
    }
    Ok(())
}

fn stream_download(
    agent: &Agent,
    request: HttpRequest,
    chunk_size: usize,
    handle: &TaskHandle,
    location: &Path,
    delegate: &mut dyn DownloadDelegate,
) -> Result<(), TransportError> {
    let task = handle.id();
    if handle.is_cancelled() {
        return Err(TransportError::Cancelled);
    }
    let mut response = call(agent, request)?;
    let meta = response_meta(&response);
    let expected = meta.expected_length();
    debug!(task_id = %task, status = meta.status, ?expected, "response received");
    delegate.did_receive_response(task, &meta);

    if let Some(dir) = location.parent() {
        fs::create_dir_all(dir)?;
    }
    let mut file = File::create(location)?;
    let mut reader = response.body_mut().as_reader();
    let mut buf = vec![0u8; chunk_size];
    let mut total = 0u64;
    while let Some(n) = read_chunk(&mut reader, &mut buf, handle)? {
        file.write_all(&buf[..n])?;
        total += n as u64;
        delegate.did_write_data(
            task,
            WriteProgress {
                bytes_written: n as u64,
                total_bytes_written: total,
                total_bytes_expected: expected,
            },
        );
    }
    file.flush()?;
    drop(file);

    debug!(task_id = %task, bytes = total, location = %location.display(), "download materialized");
    delegate.did_finish_downloading(task, location);
    Ok(())
}

/// Next body piece, or `None` at end of body.
fn read_chunk(reader: &mut impl Read, buf: &mut [u8], handle: &TaskHandle) -> Result<Option<usize>, TransportError> {
    loop {
        if handle.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        match reader.read(buf) {
            Ok(0) => return Ok(None),
            Ok(n) => return Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransportError::Network(e.to_string())),
        }
    }
}

fn call(agent: &Agent, request: HttpRequest) -> Result<ureq::http::Response<Body>, TransportError> {
    let HttpRequest {
        method,
        url,
        headers,
        body,
    } = request;
    let result = match method {
        HttpMethod::Get => with_headers(agent.get(&url), &headers).call(),
        HttpMethod::Delete => with_headers(agent.delete(&url), &headers).call(),
        HttpMethod::Post => send(with_headers(agent.post(&url), &headers), body),
        HttpMethod::Put => send(with_headers(agent.put(&url), &headers), body),
    };
    result.map_err(|e| TransportError::Network(e.to_string()))
}

fn with_headers<B>(mut builder: RequestBuilder<B>, headers: &[(String, String)]) -> RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn send(builder: RequestBuilder<WithBody>, body: Option<String>) -> Result<ureq::http::Response<Body>, ureq::Error> {
    match body {
        Some(body) => builder.send(body.as_bytes()),
        None => builder.send_empty(),
    }
}

fn response_meta(response: &ureq::http::Response<Body>) -> ResponseMeta {
    ResponseMeta {
        status: response.status().as_u16(),
        headers: response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
    }
}
