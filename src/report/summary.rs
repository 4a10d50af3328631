//! Run report built from structured suite logs
//!
//! Each suite's structured log is folded into a per-suite summary as soon as
//! the suite finishes. A result is unexpected when its record carries an
//! `expected` field, which structured loggers only emit on a mismatch.

use std::collections::BTreeMap;
use std::path::Path;

use colored::Colorize;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::Span;

use super::archive::ResultsArchive;
use crate::common::{Error, Result};

/// Archive entry holding the run report
pub const REPORT_ENTRY: &str = "report.json";

/// Status given to tests that started but never ended
const INCOMPLETE: &str = "INCOMPLETE";

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RunReport {
    pub suites: Vec<SuiteReport>,
}

impl RunReport {
    /// Whether any suite saw an unexpected result or did not finish
    pub fn has_regressions(&self) -> bool {
        self.suites.iter().any(|s| s.unexpected > 0 || !s.complete)
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SuiteReport {
    pub name: String,
    /// Whether the suite logged `suite_end`
    pub complete: bool,
    pub passed: usize,
    pub unexpected: usize,
    pub tests: Vec<TestReport>,
    /// Messages logged at ERROR or CRITICAL
    pub errors: Vec<String>,
    /// Lines in the structured log that could not be decoded
    pub malformed: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TestReport {
    pub test: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub subtests: Vec<SubtestReport>,
}

impl TestReport {
    fn new(test: &str) -> Self {
        Self {
            test: test.to_string(),
            status: INCOMPLETE.to_string(),
            expected: Some("OK".to_string()),
            message: None,
            subtests: Vec::new(),
        }
    }

    pub fn is_unexpected(&self) -> bool {
        self.expected.is_some() || self.subtests.iter().any(|s| s.expected.is_some())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubtestReport {
    pub subtest: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Accumulates the run report across suites
pub struct ReportBuilder {
    report: RunReport,
    span: Span,
}

fn str_field(record: &Map<String, Value>, name: &str) -> Option<String> {
    record.get(name).and_then(Value::as_str).map(str::to_string)
}

/// Test ids may be strings or lists of path components
fn test_id(record: &Map<String, Value>) -> Option<String> {
    match record.get("test")? {
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

impl ReportBuilder {
    pub fn new(parent: &Span) -> Self {
        Self {
            report: RunReport::default(),
            span: parent.clone(),
        }
    }

    /// Fold the structured log of `suite` into the report
    pub fn add_suite_log(&mut self, suite: &str, log: &Path) -> Result<()> {
        let content = std::fs::read_to_string(log).map_err(|e| Error::FileRead {
            path: log.display().to_string(),
            error: e.to_string(),
        })?;
        let summary = summarize(suite, &content);
        tracing::debug!(
            parent: &self.span,
            "Suite {}: {} passed, {} unexpected",
            suite,
            summary.passed,
            summary.unexpected
        );
        self.report.suites.push(summary);
        Ok(())
    }

    pub fn report(&self) -> &RunReport {
        &self.report
    }

    /// Write `report.json` into the archive
    pub fn write_into(&self, archive: &mut ResultsArchive) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.report)?;
        archive.add_bytes(REPORT_ENTRY, &bytes)
    }

    /// Print a per-suite summary to stdout
    pub fn print_summary(&self) {
        if self.report.suites.is_empty() {
            return;
        }
        println!("\n{}", "Summary:".blue().bold());
        for suite in &self.report.suites {
            let marker = if suite.unexpected == 0 && suite.complete {
                "✓".green()
            } else {
                "✗".red()
            };
            let mut line = format!(
                "{} passed, {} unexpected",
                suite.passed, suite.unexpected
            );
            if !suite.complete {
                line.push_str(", did not finish");
            }
            println!("  {} {}: {}", marker, suite.name.white().bold(), line);
        }
    }
}

/// Build the summary of one suite from its structured log text
pub fn summarize(suite: &str, content: &str) -> SuiteReport {
    let mut report = SuiteReport {
        name: suite.to_string(),
        ..SuiteReport::default()
    };
    // Tests may interleave, so open ones are keyed by id
    let mut running: BTreeMap<String, TestReport> = BTreeMap::new();

    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let record = match serde_json::from_str::<Map<String, Value>>(line) {
            Ok(record) => record,
            Err(_) => {
                report.malformed += 1;
                continue;
            }
        };

        match record.get("action").and_then(Value::as_str) {
            Some("test_start") => {
                if let Some(id) = test_id(&record) {
                    running.insert(id.clone(), TestReport::new(&id));
                }
            }
            Some("test_status") => {
                if let Some(id) = test_id(&record) {
                    let test = running
                        .entry(id.clone())
                        .or_insert_with(|| TestReport::new(&id));
                    test.subtests.push(SubtestReport {
                        subtest: str_field(&record, "subtest").unwrap_or_default(),
                        status: str_field(&record, "status").unwrap_or_default(),
                        expected: str_field(&record, "expected"),
                        message: str_field(&record, "message"),
                    });
                }
            }
            Some("test_end") => {
                if let Some(id) = test_id(&record) {
                    let mut test = running.remove(&id).unwrap_or_else(|| TestReport::new(&id));
                    test.status = str_field(&record, "status").unwrap_or_default();
                    test.expected = str_field(&record, "expected");
                    test.message = str_field(&record, "message");
                    report.tests.push(test);
                }
            }
            Some("suite_end") => report.complete = true,
            Some("log") => {
                let level = str_field(&record, "level").unwrap_or_default();
                if level == "ERROR" || level == "CRITICAL" {
                    report
                        .errors
                        .push(str_field(&record, "message").unwrap_or_default());
                }
            }
            _ => {}
        }
    }

    // Started but never ended: the suite crashed or was killed mid-test
    report.tests.extend(running.into_values());

    report.unexpected = report.tests.iter().filter(|t| t.is_unexpected()).count();
    report.passed = report.tests.len() - report.unexpected;
    report
}
