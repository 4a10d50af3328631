//! certsuite - device certification harness
//!
//! This library runs external test suites against a device, backing the
//! device up before testing and restoring and rebooting it after every suite.

pub mod automation;
pub mod cli;
pub mod commands;
pub mod common;
pub mod device;
pub mod report;
pub mod run;
pub mod suite;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use run::{RunController, RunOutcome};
