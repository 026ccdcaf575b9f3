//! Error types for the verification harness.
//!
//! # Design
//! `TransportError` is what a transport reports through `did_complete`; it
//! never carries the response body because the harness only needs to know
//! that the call chain ended badly. `HarnessError` is the scenario-level
//! taxonomy: every failure a driver can report lands in exactly one variant.
//!
//! Payloads are plain strings and integers so both enums are `Clone` and
//! `PartialEq`. Outcomes produced by the callback and delegate paths are
//! compared directly in tests.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Failure reported by a transport at the end of a task.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server answered, but not with the status the operation requires.
    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },

    /// Connection, TLS, or protocol failure before a full response arrived.
    #[error("network failure: {0}")]
    Network(String),

    /// Local I/O failed while materializing a download.
    #[error("I/O failure: {0}")]
    Io(String),

    /// The task was cancelled through its `TaskHandle`.
    #[error("task cancelled")]
    Cancelled,
}

/// Every way a scenario can fail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HarnessError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The payload arrived but did not have the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// The completion signal did not fire before the deadline.
    #[error("no terminal event within {}ms", .0.as_millis())]
    Timeout(Duration),

    /// An event sequence or artifact contradicted what the harness observed.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

/// Invalid harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid value {value:?} for {key}: {reason}")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
    pub reason: String,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for HarnessError {
    fn from(e: serde_json::Error) -> Self {
        HarnessError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_reports_millis() {
        let err = HarnessError::Timeout(Duration::from_millis(5000));
        assert_eq!(err.to_string(), "no terminal event within 5000ms");
    }

    #[test]
    fn transport_error_converts_into_harness_error() {
        let err: HarnessError = TransportError::Status { status: 404 }.into();
        assert_eq!(
            err,
            HarnessError::Transport(TransportError::Status { status: 404 })
        );
        assert_eq!(err.to_string(), "transport error: unexpected HTTP status 404");
    }

    #[test]
    fn json_error_becomes_decode_error() {
        let e = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        assert!(matches!(HarnessError::from(e), HarnessError::Decode(_)));
    }
}
