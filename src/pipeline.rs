//! The change-triggered pipeline: build, test with coverage, locate the
//! report, parse it, publish the snapshot, prune old results.
//!
//! Each step gates the next; the first failure ends the run with
//! [`RunOutcome::Failed`]. Nothing inside a run escapes as an error.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::diagnostics::{extract_failing_tests, TestFailure};
use crate::locate::ArtifactLocator;
use crate::model::CoverageReport;
use crate::parsers::cobertura::CoberturaParser;
use crate::parsers::parse_file;
use crate::process::{CommandRunner, ProcessOutput};
use crate::publish::ResultPublisher;
use crate::report;
use crate::watch::ChangeEvent;

/// Why a run was started.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// The initial run when the host starts.
    Startup,
    /// A settled burst of source changes; carries the most recent event.
    Change(ChangeEvent),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Startup => f.write_str("startup"),
            Trigger::Change(event) => write!(f, "{:?} {}", event.kind, event.path.display()),
        }
    }
}

/// Where the current (or last) run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Building,
    Testing,
    LocatingReport,
    Parsing,
    Publishing,
    Succeeded,
    Failed,
}

impl RunState {
    fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }
}

/// The single logical run owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub state: RunState,
    pub started_at: Option<DateTime<Utc>>,
    pub trigger: Option<Trigger>,
}

impl Default for PipelineRun {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            started_at: None,
            trigger: None,
        }
    }
}

/// Result of [`PipelineOrchestrator::run_once`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Succeeded {
        report: CoverageReport,
    },
    Failed {
        reason: String,
        /// Failing tests scraped from the test output, when the test step failed.
        failures: Vec<TestFailure>,
    },
    /// Another run was in progress; this request was folded into a single
    /// follow-up run that the in-progress caller performs.
    Coalesced,
}

impl RunOutcome {
    fn failed(reason: impl Into<String>) -> Self {
        RunOutcome::Failed {
            reason: reason.into(),
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Succeeded { .. })
    }

    #[must_use]
    pub fn report(&self) -> Option<&CoverageReport> {
        match self {
            RunOutcome::Succeeded { report } => Some(report),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    run: PipelineRun,
    in_flight: bool,
    pending: Option<Trigger>,
}

impl Inner {
    /// Claim the run slot for `trigger`, handing it back. When a run is
    /// already in flight the trigger becomes the pending follow-up instead
    /// and `None` is returned.
    fn claim_or_defer(&mut self, trigger: Trigger) -> Option<Trigger> {
        if self.in_flight {
            self.pending = Some(trigger);
            return None;
        }
        self.in_flight = true;
        Some(trigger)
    }

    /// Take the pending follow-up, or release the run slot when there is
    /// none. Both happen under the same lock, so a trigger deferred by a
    /// concurrent caller is either returned here or finds the slot free.
    fn next_or_release(&mut self) -> Option<Trigger> {
        let next = self.pending.take();
        if next.is_none() {
            self.in_flight = false;
        }
        next
    }
}

/// Sequences one run at a time.
///
/// Concurrent callers never queue: a call that arrives during a run records
/// its trigger as the single pending follow-up (replacing any earlier one)
/// and returns [`RunOutcome::Coalesced`].
#[derive(Debug)]
pub struct PipelineOrchestrator<R> {
    config: PipelineConfig,
    runner: R,
    locator: ArtifactLocator,
    publisher: ResultPublisher,
    parser: CoberturaParser,
    inner: Mutex<Inner>,
}

impl<R: CommandRunner> PipelineOrchestrator<R> {
    pub fn new(config: PipelineConfig, runner: R) -> Self {
        let locator = ArtifactLocator::new(config.excluded_segments.clone());
        let publisher = ResultPublisher::new(
            config.working_dir.clone(),
            locator.clone(),
            &config.snapshot_file_name,
        );
        Self {
            config,
            runner,
            locator,
            publisher,
            parser: CoberturaParser,
            inner: Mutex::new(Inner::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Snapshot of the current run state.
    #[must_use]
    pub fn current_run(&self) -> PipelineRun {
        self.lock().run.clone()
    }

    /// Run the pipeline for `trigger`, or coalesce into the run in progress.
    ///
    /// When follow-up requests arrive while this call is running, it performs
    /// one more run after the current one and returns that run's outcome.
    pub async fn run_once(&self, trigger: Trigger) -> RunOutcome {
        let claimed = self.lock().claim_or_defer(trigger);
        let Some(mut trigger) = claimed else {
            debug!("Run in progress, coalescing trigger");
            return RunOutcome::Coalesced;
        };
        let guard = InFlight { inner: &self.inner };

        loop {
            let outcome = self.execute(trigger).await;
            let next = self.lock().next_or_release();
            match next {
                Some(next) => trigger = next,
                None => {
                    guard.disarm();
                    return outcome;
                }
            }
        }
    }

    async fn execute(&self, trigger: Trigger) -> RunOutcome {
        info!(trigger = %trigger, "Pipeline run started");
        self.begin(trigger);
        let working_dir = &self.config.working_dir;

        self.transition(RunState::Building);
        let build = self.runner.run(&self.config.build, working_dir).await;
        if !build.success() {
            warn!(exit_code = build.exit_code, "Build failed");
            let detail = failure_detail(&build);
            if !detail.is_empty() {
                warn!("Build error:\n{detail}");
            }
            return self.fail(format!("build failed (exit code {})", build.exit_code));
        }

        self.transition(RunState::Testing);
        let tests_started = SystemTime::now();
        let test = self.runner.run(&self.config.test, working_dir).await;
        if !test.success() {
            warn!(exit_code = test.exit_code, "Tests failed");
            let detail = failure_detail(&test);
            if !detail.is_empty() {
                debug!("Test output:\n{detail}");
            }
            let failures = extract_failing_tests(&test.stdout);
            if !failures.is_empty() {
                warn!("Failing tests:");
                for failure in &failures {
                    warn!("  {}: {}", failure.test_name, failure.failure_reason);
                }
            }
            let outcome = RunOutcome::Failed {
                reason: format!("tests failed (exit code {})", test.exit_code),
                failures,
            };
            return self.finish(outcome);
        }

        self.transition(RunState::LocatingReport);
        let artifact = self
            .locator
            .find_latest(working_dir, &self.config.report_file_name)
            .filter(|a| is_fresh(a.modified, tests_started));
        let Some(artifact) = artifact else {
            info!(
                root = %working_dir.display(),
                "No coverage available: no fresh {} under TestResults",
                self.config.report_file_name
            );
            return self.fail("no coverage report found");
        };

        self.transition(RunState::Parsing);
        let Some(report) = parse_file(&self.parser, &artifact.path, &artifact.run_id) else {
            return self.fail(format!(
                "could not parse coverage report {}",
                artifact.path.display()
            ));
        };

        self.transition(RunState::Publishing);
        match self.publisher.publish(&report) {
            Ok(Some(path)) => debug!(path = %path.display(), "Snapshot published"),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Failed to write coverage snapshot");
                return self.fail(format!("could not publish snapshot: {e}"));
            }
        }
        let removed = self.publisher.prune(self.config.retain_count);
        if removed > 0 {
            debug!(removed, "Pruned old test results");
        }

        report::log_summary(&report);
        self.finish(RunOutcome::Succeeded { report })
    }

    fn begin(&self, trigger: Trigger) {
        let mut inner = self.lock();
        inner.run = PipelineRun {
            state: RunState::Idle,
            started_at: Some(Utc::now()),
            trigger: Some(trigger),
        };
    }

    fn transition(&self, state: RunState) {
        let mut inner = self.lock();
        debug_assert!(!inner.run.state.is_terminal(), "run already finished");
        debug!(from = ?inner.run.state, to = ?state, "Pipeline state");
        inner.run.state = state;
    }

    fn fail(&self, reason: impl Into<String>) -> RunOutcome {
        self.finish(RunOutcome::failed(reason))
    }

    /// Record the terminal state and log the run's single terminal line.
    fn finish(&self, outcome: RunOutcome) -> RunOutcome {
        match &outcome {
            RunOutcome::Succeeded { report } => {
                self.transition(RunState::Succeeded);
                info!(
                    "✓ Run succeeded: {:.1}% lines, {:.1}% branches",
                    report.summary.line_coverage, report.summary.branch_coverage
                );
            }
            RunOutcome::Failed { reason, .. } => {
                self.transition(RunState::Failed);
                warn!(reason = %reason, "✗ Run failed");
            }
            RunOutcome::Coalesced => {}
        }
        outcome
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }
}

fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-flight flag if the run future is dropped part way.
/// A run that finishes normally releases the slot through
/// [`Inner::next_or_release`] and disarms the guard.
struct InFlight<'a> {
    inner: &'a Mutex<Inner>,
}

impl InFlight<'_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut inner = lock_inner(self.inner);
        inner.in_flight = false;
        inner.pending = None;
    }
}

/// A report counts as produced by the test run that started at `since` when
/// it was modified no earlier than that second. File systems with coarse
/// timestamps truncate to the second, hence the floor.
fn is_fresh(modified: SystemTime, since: SystemTime) -> bool {
    let floor = since
        .duration_since(UNIX_EPOCH)
        .map(|d| UNIX_EPOCH + Duration::from_secs(d.as_secs()))
        .unwrap_or(UNIX_EPOCH);
    modified >= floor
}

/// The stream worth showing for a failed command: stderr, or stdout when
/// the tool reports its errors there.
fn failure_detail(output: &ProcessOutput) -> &str {
    if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    }
}
