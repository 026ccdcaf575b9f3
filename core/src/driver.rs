//! Runs scenarios: start a task, block on its signal, judge the outcome.
//!
//! # Design
//! Every scenario gets a fresh `TaskRunner` and `CompletionSignal`; nothing
//! is shared between scenarios except the transport. The driver thread does
//! no work while waiting. When the deadline passes the task is cancelled and
//! the scenario fails with the timeout as its reason; the driver never waits
//! past the configured deadline.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::http::OperationRequest;
use crate::outcome::{Outcome, Payload};
use crate::runner::{CompletionMode, Operation, TaskRunner};
use crate::transport::Transport;

/// What a scenario requires of its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// A fetch whose decoded field equals `value`.
    Field { value: String },
    /// Any successful outcome. Downloads must also have matched sizes.
    Succeeds,
    /// A failure, for scenarios that exercise error paths.
    Fails,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub operation: Operation,
    pub mode: CompletionMode,
    pub expect: Expectation,
}

impl Scenario {
    /// Fetch `request`, decode `key` from the first record, expect `value`.
    pub fn fetch_field(
        name: &str,
        request: impl Into<OperationRequest>,
        mode: CompletionMode,
        key: &str,
        value: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            operation: Operation::fetch(request, Some(key)),
            mode,
            expect: Expectation::Field {
                value: value.to_string(),
            },
        }
    }

    pub fn download(
        name: &str,
        request: impl Into<OperationRequest>,
        mode: CompletionMode,
    ) -> Self {
        Self {
            name: name.to_string(),
            operation: Operation::download(request),
            mode,
            expect: Expectation::Succeeds,
        }
    }

    pub fn expecting(mut self, expect: Expectation) -> Self {
        self.expect = expect;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    pub mode: CompletionMode,
    pub outcome: Outcome,
    pub verdict: Verdict,
    pub elapsed: Duration,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Passed
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.verdict {
            Verdict::Passed => write!(
                f,
                "PASS {} [{}] in {}ms",
                self.name,
                self.mode.as_str(),
                self.elapsed.as_millis()
            ),
            Verdict::Failed(reason) => write!(
                f,
                "FAIL {} [{}]: {reason}",
                self.name,
                self.mode.as_str()
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub reports: Vec<ScenarioReport>,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.passed()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ScenarioReport> {
        self.reports.iter().filter(|r| !r.passed())
    }

    pub fn all_passed(&self) -> bool {
        self.reports.iter().all(ScenarioReport::passed)
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in &self.reports {
            writeln!(f, "{report}")?;
        }
        write!(f, "{}/{} scenarios passed", self.passed(), self.reports.len())
    }
}

pub struct VerificationDriver {
    transport: Arc<dyn Transport>,
    wait_timeout: Duration,
}

impl VerificationDriver {
    pub fn new(transport: Arc<dyn Transport>, config: &HarnessConfig) -> Self {
        Self {
            transport,
            wait_timeout: config.wait_timeout(),
        }
    }

    pub fn with_timeout(transport: Arc<dyn Transport>, wait_timeout: Duration) -> Self {
        Self {
            transport,
            wait_timeout,
        }
    }

    pub fn run(&self, scenario: &Scenario) -> ScenarioReport {
        let mut runner = TaskRunner::new(Arc::clone(&self.transport), scenario.mode);
        let signal = runner.signal();
        let started = Instant::now();

        let outcome = match runner.run(scenario.operation.clone()) {
            Ok(handle) => match signal.wait_until(started + self.wait_timeout) {
                Ok(outcome) => outcome,
                Err(expired) => {
                    warn!(
                        scenario = %scenario.name,
                        task_id = %handle.id(),
                        waited_ms = expired.waited.as_millis() as u64,
                        "no terminal event before the deadline; cancelling task"
                    );
                    signal.expire();
                    handle.cancel();
                    Outcome::TimedOut(self.wait_timeout)
                }
            },
            Err(e) => Outcome::Failure(e),
        };
        let elapsed = started.elapsed();
        let verdict = judge(&scenario.expect, &outcome);

        let report = ScenarioReport {
            name: scenario.name.clone(),
            mode: scenario.mode,
            outcome,
            verdict,
            elapsed,
        };
        if report.passed() {
            info!(scenario = %report.name, elapsed_ms = elapsed.as_millis() as u64, "scenario passed");
        } else {
            warn!(scenario = %report.name, "{report}");
        }
        report
    }

    pub fn run_suite(&self, scenarios: &[Scenario]) -> SuiteReport {
        SuiteReport {
            reports: scenarios.iter().map(|s| self.run(s)).collect(),
        }
    }
}

fn judge(expect: &Expectation, outcome: &Outcome) -> Verdict {
    match (expect, outcome.clone().into_result()) {
        // A missing terminal event never satisfies an expectation.
        (_, Err(err @ HarnessError::Timeout(_))) => Verdict::Failed(err.to_string()),
        (Expectation::Fails, Err(_)) => Verdict::Passed,
        (Expectation::Fails, Ok(_)) => {
            Verdict::Failed("expected a failure but the operation succeeded".to_string())
        }
        (_, Err(err)) => Verdict::Failed(err.to_string()),
        (Expectation::Field { value }, Ok(Payload::Fetched(data))) => {
            match data.decoded.as_deref() {
                Some(actual) if actual == value.as_str() => Verdict::Passed,
                Some(actual) => Verdict::Failed(format!("expected {value:?}, decoded {actual:?}")),
                None => Verdict::Failed("no field was decoded".to_string()),
            }
        }
        (Expectation::Succeeds, Ok(Payload::Downloaded(artifact))) => {
            if artifact.size_on_disk == artifact.total_bytes_written {
                Verdict::Passed
            } else {
                Verdict::Failed(format!(
                    "size of downloaded file ({}) not equal to total bytes downloaded ({})",
                    artifact.size_on_disk, artifact.total_bytes_written
                ))
            }
        }
        (Expectation::Succeeds, Ok(Payload::Fetched(_))) => Verdict::Passed,
        (Expectation::Field { .. }, Ok(Payload::Downloaded(_))) => {
            Verdict::Failed("a field expectation does not apply to a download".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HarnessError, TransportError};
    use crate::transport::{Script, ScriptedTransport};

    const ITALY: &[u8] = br#"[{"name":"Italy","capital":"Rome"}]"#;

    fn driver(script: Script, timeout: Duration) -> (VerificationDriver, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(script, dir.path()));
        (VerificationDriver::with_timeout(transport, timeout), dir)
    }

    fn italy(mode: CompletionMode) -> Scenario {
        Scenario::fetch_field(
            "italy",
            "http://countries.test/rest/v1/name/Italy?fullText=true",
            mode,
            "capital",
            "Rome",
        )
    }

    #[test]
    fn matching_field_passes() {
        let (driver, _dir) = driver(Script::chunked(ITALY, 4), Duration::from_secs(5));
        for mode in [CompletionMode::Callback, CompletionMode::Delegate] {
            let report = driver.run(&italy(mode));
            assert!(report.passed(), "{report}");
            assert_eq!(report.outcome.decoded(), Some("Rome"));
        }
    }

    #[test]
    fn wrong_value_fails_with_both_values() {
        let (driver, _dir) = driver(Script::ok([ITALY]), Duration::from_secs(5));
        let scenario = Scenario::fetch_field(
            "italy",
            "http://countries.test/x",
            CompletionMode::Delegate,
            "capital",
            "Milan",
        );
        let report = driver.run(&scenario);
        assert_eq!(
            report.verdict,
            Verdict::Failed("expected \"Milan\", decoded \"Rome\"".to_string())
        );
    }

    #[test]
    fn stalled_transport_times_out_at_the_deadline_and_is_cancelled() {
        let timeout = Duration::from_millis(100);
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new(Script::stall(), dir.path()));
        let driver = VerificationDriver::with_timeout(transport, timeout);

        let report = driver.run(&italy(CompletionMode::Delegate));
        assert!(report.elapsed >= timeout);
        assert!(report.elapsed < Duration::from_secs(5));
        assert_eq!(report.outcome, Outcome::TimedOut(timeout));
        assert_eq!(
            report.verdict,
            Verdict::Failed("no terminal event within 100ms".to_string())
        );
    }

    #[test]
    fn transport_failure_is_reported_not_hung() {
        let (driver, _dir) = driver(
            Script::fail(TransportError::Network("dns failure".to_string())),
            Duration::from_secs(5),
        );
        let report = driver.run(&italy(CompletionMode::Callback));
        assert_eq!(
            report.outcome,
            Outcome::Failure(HarnessError::Transport(TransportError::Network(
                "dns failure".to_string()
            )))
        );
        assert_eq!(
            report.verdict,
            Verdict::Failed("transport error: network failure: dns failure".to_string())
        );
    }

    #[test]
    fn expected_failure_passes() {
        let (driver, _dir) = driver(Script::status(404), Duration::from_secs(5));
        let report = driver.run(&italy(CompletionMode::Delegate).expecting(Expectation::Fails));
        assert!(report.passed());
    }

    #[test]
    fn download_scenario_checks_sizes() {
        let (driver, _dir) = driver(Script::chunked(&[9u8; 300], 64), Duration::from_secs(5));
        let report = driver.run(&Scenario::download(
            "download",
            "http://files.test/LICENSE.txt",
            CompletionMode::Delegate,
        ));
        assert!(report.passed(), "{report}");
        assert_eq!(report.outcome.artifact().unwrap().total_bytes_written, 300);
    }

    #[test]
    fn suite_report_counts_failures() {
        let (driver, _dir) = driver(Script::ok([ITALY]), Duration::from_secs(5));
        let suite = driver.run_suite(&[
            italy(CompletionMode::Delegate),
            italy(CompletionMode::Callback).expecting(Expectation::Fails),
        ]);
        assert_eq!(suite.passed(), 1);
        assert!(!suite.all_passed());
        assert_eq!(suite.failures().count(), 1);
        assert!(suite.to_string().ends_with("1/2 scenarios passed"));
    }
}
