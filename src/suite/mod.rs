//! Test suites: selection, invocation and orchestration
//!
//! Suites are external executables. The harness never looks inside them; it
//! builds their command line, routes their output and collects the files
//! they leave behind.

pub mod classify;
pub mod listing;
pub mod orchestrator;
pub mod runner;
pub mod selection;
pub mod template;

pub use orchestrator::{Orchestrator, PlanOutcome};
pub use runner::{DiagnosticSink, SuiteRunResult, SuiteRunner, TracingDiagnostics};
pub use selection::SelectionPlan;
pub use template::TemplateContext;
