//! Suite output classification
//!
//! Suites write structured records (single-line JSON objects with an
//! `action` field) and free text to the same stdout. Anything that fails to
//! decode is text; decoding never fails the suite.

use serde_json::{Map, Value};

/// A classified line of suite output
#[derive(Debug, Clone, PartialEq)]
pub enum OutputRecord<'a> {
    /// Structured record: the line as received, plus the decoded object
    Structured {
        raw: &'a str,
        record: Map<String, Value>,
    },
    /// Anything else
    Text(&'a str),
}

impl<'a> OutputRecord<'a> {
    /// The `action` field, when it is a string
    pub fn action(&self) -> Option<&str> {
        match self {
            OutputRecord::Structured { record, .. } => record.get("action").and_then(Value::as_str),
            OutputRecord::Text(_) => None,
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, OutputRecord::Structured { .. })
    }
}

/// Classify one line of output (without its line terminator)
pub fn classify(line: &str) -> OutputRecord<'_> {
    if !line.starts_with('{') {
        return OutputRecord::Text(line);
    }

    let raw = line.trim_end();
    match serde_json::from_str::<Map<String, Value>>(raw) {
        Ok(record) if record.contains_key("action") => OutputRecord::Structured { raw, record },
        _ => OutputRecord::Text(line),
    }
}

/// One-line console rendering of a structured record
pub fn describe(record: &Map<String, Value>) -> String {
    let field = |name: &str| record.get(name).and_then(Value::as_str);
    let action = field("action").unwrap_or("?");

    match action {
        "test_start" => format!("TEST-START | {}", field("test").unwrap_or("")),
        "test_status" => format!(
            "TEST-{} | {} | {}",
            field("status").unwrap_or("UNKNOWN"),
            field("test").unwrap_or(""),
            field("subtest").unwrap_or("")
        ),
        "test_end" => format!(
            "TEST-{} | {}",
            field("status").unwrap_or("UNKNOWN"),
            field("test").unwrap_or("")
        ),
        "log" => format!(
            "{} {}",
            field("level").unwrap_or("INFO"),
            field("message").unwrap_or("")
        ),
        other => other.to_uppercase(),
    }
}
