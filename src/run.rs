//! Run controller
//!
//! Owns one full test run: connect to the device, install the automation
//! extension, enter the device scope, drive the suite plan and finalize the
//! results archive. The archive is finalized and its location reported no
//! matter how the run ends.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::Span;

use crate::automation::{extension, Automation};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::device::{DeviceControl, DeviceScope, ScopeOptions};
use crate::report::{ReportBuilder, ResultsArchive};
use crate::suite::{
    Orchestrator, PlanOutcome, SelectionPlan, SuiteRunResult, SuiteRunner, TemplateContext,
    TracingDiagnostics,
};

/// Exit code used when the user interrupted the run
pub const EXIT_INTERRUPTED: i32 = 130;

/// Aggregate result of a run
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Whether any phase or suite failed
    pub failed: bool,
    pub interrupted: bool,
    /// Final archive location, when it could be written
    pub archive: Option<PathBuf>,
    pub results: Vec<SuiteRunResult>,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        if self.interrupted {
            EXIT_INTERRUPTED
        } else if self.failed {
            1
        } else {
            0
        }
    }
}

/// Drives one run from device connection to archive
pub struct RunController<'a> {
    config: &'a Config,
    selectors: Vec<String>,
    interrupt: watch::Receiver<bool>,
    span: Span,
}

impl<'a> RunController<'a> {
    pub fn new(config: &'a Config, selectors: Vec<String>, interrupt: watch::Receiver<bool>) -> Self {
        Self {
            config,
            selectors,
            interrupt,
            span: tracing::info_span!("run"),
        }
    }

    /// Run the selected suites
    ///
    /// `connect` produces the device handle; it is only called once the
    /// archive and logging are in place so connection failures are recorded.
    pub async fn run<D, A, F, Fut>(
        &self,
        mut archive: ResultsArchive,
        connect: F,
        automation: A,
    ) -> RunOutcome
    where
        D: DeviceControl + 'static,
        A: Automation,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<D>>,
    {
        tracing::info!(
            parent: &self.span,
            "certsuite {} (certification version {})",
            env!("CARGO_PKG_VERSION"),
            self.config.version
        );
        tracing::info!(parent: &self.span, "Results archive: {}", archive.path().display());

        let mut report = ReportBuilder::new(&self.span);
        let mut outcome = RunOutcome::default();

        match self.drive(&mut archive, &mut report, connect, automation).await {
            Ok(plan) => {
                outcome.failed = plan.failed;
                outcome.interrupted = plan.interrupted;
                outcome.results = plan.results;
            }
            Err(e) if e.is_interrupt() => {
                tracing::warn!(parent: &self.span, "Testrun interrupted");
                outcome.interrupted = true;
            }
            Err(e) => {
                tracing::error!(parent: &self.span, "Run aborted: {}", e);
                outcome.failed = true;
            }
        }

        if outcome.failed {
            tracing::error!(parent: &self.span, "Encountered errors during run");
        }

        if report.report().has_regressions() {
            tracing::warn!(parent: &self.span, "Some suites had unexpected results or did not finish");
        }
        if let Err(e) = report.write_into(&mut archive) {
            tracing::error!(parent: &self.span, "Failed to write run report: {}", e);
            outcome.failed = true;
        }
        report.print_summary();

        match archive.finish() {
            Ok(path) => {
                eprintln!("Results saved to {}", path.display());
                outcome.archive = Some(path);
            }
            Err(e) => {
                tracing::error!(parent: &self.span, "Failed to write results archive: {}", e);
                outcome.failed = true;
            }
        }

        outcome
    }

    async fn drive<D, A, F, Fut>(
        &self,
        archive: &mut ResultsArchive,
        report: &mut ReportBuilder,
        connect: F,
        mut automation: A,
    ) -> Result<PlanOutcome>
    where
        D: DeviceControl + 'static,
        A: Automation,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<D>>,
    {
        let device = Arc::new(connect().await?);
        self.install_extension(device.as_ref()).await?;

        let mut scope = DeviceScope::new(device, ScopeOptions::from_config(self.config), &self.span);
        if let Err(e) = scope.enter(&mut automation).await {
            self.close_scope(&mut scope);
            return Err(e);
        }

        if let Some(staging) = scope.staging_dir() {
            tracing::debug!(parent: &self.span, "Device backup staged in {}", staging.display());
        }

        let plan = SelectionPlan::resolve(self.config, &self.selectors);
        if plan.is_empty() {
            tracing::warn!(parent: &self.span, "No suites selected");
        }
        tracing::info!(
            parent: &self.span,
            "Running {} suite(s): {}",
            plan.len(),
            plan.iter()
                .map(|e| e.suite.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let runner = SuiteRunner::new(
            TemplateContext::from_config(self.config),
            TracingDiagnostics::new(&self.span),
            self.interrupt.clone(),
            &self.span,
        );
        let outcome = Orchestrator::new(
            self.config,
            &scope,
            runner,
            archive,
            report,
            self.interrupt.clone(),
            &self.span,
        )
        .run_plan(&plan)
        .await;
        tracing::info!(
            parent: &self.span,
            "Attempted {} of {} suite(s)",
            outcome.attempted,
            plan.len()
        );

        self.close_scope(&mut scope);
        Ok(outcome)
    }

    async fn install_extension<D: DeviceControl + ?Sized>(&self, device: &D) -> Result<()> {
        let Some(ext) = &self.config.extension else {
            tracing::info!(parent: &self.span, "No automation extension configured, skipping install");
            return Ok(());
        };

        tracing::info!(parent: &self.span, "Installing automation extension");
        match extension::install(device, ext, &self.config.version).await {
            Ok(()) => Ok(()),
            Err(Error::ExtensionAlreadyInstalled) => {
                tracing::info!(parent: &self.span, "Automation extension already installed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn close_scope<D: DeviceControl + ?Sized>(&self, scope: &mut DeviceScope<D>) {
        if let Err(e) = scope.close() {
            tracing::warn!(parent: &self.span, "Failed to close device scope: {}", e);
        }
    }
}
