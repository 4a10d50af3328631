//! Suite orchestration
//!
//! Runs a selection plan one suite at a time. Every suite that was started,
//! whatever its outcome, is followed by a device restore and a reboot so the
//! next suite sees the backed-up device state.

use tokio::sync::watch;
use tracing::Span;

use super::runner::{DiagnosticSink, SuiteInvocation, SuiteRunResult, SuiteRunner};
use super::selection::{PlannedSuite, SelectionPlan};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::device::{DeviceControl, DeviceScope};
use crate::report::{ReportBuilder, ResultsArchive};

/// What happened across the whole plan
#[derive(Debug, Default)]
pub struct PlanOutcome {
    /// Suites whose process ran to completion, in plan order
    pub results: Vec<SuiteRunResult>,
    /// Suites started (including ones that failed to start)
    pub attempted: usize,
    /// Whether any suite, restore or reboot failed
    pub failed: bool,
    /// Whether the plan stopped early on user request
    pub interrupted: bool,
}

/// Drives the plan against a device scope
pub struct Orchestrator<'a, D: DeviceControl + ?Sized, S: DiagnosticSink> {
    config: &'a Config,
    scope: &'a DeviceScope<D>,
    runner: SuiteRunner<S>,
    archive: &'a mut ResultsArchive,
    report: &'a mut ReportBuilder,
    interrupt: watch::Receiver<bool>,
    span: Span,
}

impl<'a, D: DeviceControl + ?Sized, S: DiagnosticSink> Orchestrator<'a, D, S> {
    pub fn new(
        config: &'a Config,
        scope: &'a DeviceScope<D>,
        runner: SuiteRunner<S>,
        archive: &'a mut ResultsArchive,
        report: &'a mut ReportBuilder,
        interrupt: watch::Receiver<bool>,
        parent: &Span,
    ) -> Self {
        Self {
            config,
            scope,
            runner,
            archive,
            report,
            interrupt,
            span: parent.clone(),
        }
    }

    /// Run every planned suite in order
    ///
    /// Suite failures never stop the plan. An interrupt stops it after the
    /// in-flight suite's restore and reboot.
    pub async fn run_plan(&mut self, plan: &SelectionPlan) -> PlanOutcome {
        let mut outcome = PlanOutcome::default();

        for entry in plan.iter() {
            if *self.interrupt.borrow() {
                tracing::warn!(parent: &self.span, "Interrupted, skipping remaining suites");
                outcome.interrupted = true;
                break;
            }

            outcome.attempted += 1;
            match self.run_suite(entry).await {
                Ok(result) => {
                    if !result.success {
                        outcome.failed = true;
                    }
                    outcome.results.push(result);
                }
                Err(e) if e.is_interrupt() => {
                    tracing::warn!(parent: &self.span, "Suite {} interrupted", entry.suite);
                    outcome.interrupted = true;
                }
                Err(e) => {
                    tracing::error!(parent: &self.span, "Suite {} failed: {}", entry.suite, e);
                    outcome.failed = true;
                }
            }

            // Always, even when the suite never started
            if let Err(e) = self.scope.restore().await {
                tracing::error!(parent: &self.span, "Device restore failed: {}", e);
                outcome.failed = true;
            }
            if let Err(e) = self.scope.reboot().await {
                tracing::error!(parent: &self.span, "Device reboot failed: {}", e);
                outcome.failed = true;
            }

            if outcome.interrupted {
                break;
            }
        }

        outcome
    }

    async fn run_suite(&mut self, entry: &PlannedSuite) -> Result<SuiteRunResult> {
        let spec = self
            .config
            .suite(&entry.suite)
            .ok_or_else(|| Error::UnknownSuite(entry.suite.clone()))?;

        let scratch = tempfile::Builder::new()
            .prefix(&format!("certsuite-{}-", entry.suite))
            .tempdir()?;

        let invocation = self.runner.invocation(spec, &entry.groups, scratch.path())?;
        let run = self.runner.execute(&entry.suite, &invocation).await;

        let collected = match &run {
            Ok(result) => {
                if !result.success {
                    let status = result
                        .exit_code
                        .map(|c| format!("exit code {}", c))
                        .unwrap_or_else(|| "a signal".to_string());
                    tracing::error!(
                        parent: &self.span,
                        "{}",
                        Error::SuiteFailed {
                            suite: entry.suite.clone(),
                            status
                        }
                    );
                }
                tracing::info!(
                    parent: &self.span,
                    "Suite {} wrote {} structured records",
                    entry.suite,
                    result.records
                );
                self.collect(&entry.suite, &invocation, true)
            }
            // Keep whatever the suite left behind before it stopped
            Err(_) => self.collect(&entry.suite, &invocation, false),
        };

        if let Err(e) = scratch.close() {
            tracing::debug!(parent: &self.span, "Failed to remove scratch directory: {}", e);
        }

        let result = run?;
        collected?;
        Ok(result)
    }

    /// Archive the invocation's artifacts and summarize its structured log
    ///
    /// With `require_all`, the first missing artifact or unreadable log is
    /// returned after everything present has been collected. Otherwise
    /// absent files are skipped.
    fn collect(&mut self, suite: &str, invocation: &SuiteInvocation, require_all: bool) -> Result<()> {
        let mut first_failure = None;

        for artifact in &invocation.artifacts {
            if !require_all && !artifact.is_file() {
                tracing::debug!(parent: &self.span, "No {} left to collect", artifact.display());
                continue;
            }
            let name = match artifact.file_name() {
                Some(name) => format!("{}/{}", suite, name.to_string_lossy()),
                None => {
                    first_failure.get_or_insert(Error::ArtifactMissing(artifact.clone()));
                    continue;
                }
            };
            if let Err(e) = self.archive.add_file(artifact, &name) {
                tracing::error!(parent: &self.span, "{}", e);
                first_failure.get_or_insert(e);
            }
        }

        if require_all || invocation.structured_log.is_file() {
            if let Err(e) = self.report.add_suite_log(suite, &invocation.structured_log) {
                tracing::error!(parent: &self.span, "Cannot read structured log of {}: {}", suite, e);
                first_failure.get_or_insert(e);
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
