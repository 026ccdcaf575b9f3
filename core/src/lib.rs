//! Verification harness for task-based HTTP fetch and download operations.
//!
//! # Overview
//! A scenario submits one operation to a transport, blocks on a one-shot
//! completion signal with a deadline, and judges the outcome. Transports
//! report through delegate events; callback-style completion is built on the
//! same events, so both styles can be checked against each other.
//!
//! # Design
//! - `CompletionSignal` is the only synchronization point between a
//!   transport's worker thread and the waiting driver.
//! - Collectors own all accumulation state and reject event sequences that
//!   break the delegate protocol instead of absorbing them.
//! - Every failure (transport, decode, timeout, invariant) ends up as a
//!   reported scenario failure; nothing hangs and nothing is swallowed.
//! - The HTTP transport is `ureq`; `ScriptedTransport` replays event scripts
//!   for deterministic runs.

pub mod catalog;
pub mod collector;
pub mod config;
pub mod decode;
pub mod delegate;
pub mod driver;
pub mod error;
pub mod http;
pub mod outcome;
pub mod runner;
pub mod signal;
pub mod transport;

pub use collector::{DataCollector, DownloadCollector};
pub use config::HarnessConfig;
pub use delegate::{DataDelegate, DownloadDelegate, TaskId, WriteProgress};
pub use driver::{Expectation, Scenario, ScenarioReport, SuiteReport, Verdict, VerificationDriver};
pub use error::{ConfigError, HarnessError, Result, TransportError};
pub use http::{HttpMethod, HttpRequest, OperationRequest, ResponseMeta};
pub use outcome::{DownloadedArtifact, FetchedData, Outcome, Payload};
pub use runner::{CompletionMode, Operation, OperationKind, TaskRunner};
pub use signal::{CompletionSignal, SignalState};
pub use transport::{HttpTransport, Script, ScriptedTransport, TaskHandle, Transport};
