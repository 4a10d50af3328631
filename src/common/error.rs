//! Error types for the certification harness
//!
//! Variants are grouped by the component that raises them. Whether an error
//! ends the whole run or only the current suite is decided by the caller
//! (see `suite::orchestrator` and `run`), not by the variant itself.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration file not found: {0}. Pass --config <path> to use another file")]
    ConfigNotFound(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    #[error("Cannot resolve argument template '{template}': {reason}")]
    Template { template: String, reason: String },

    // === Device Errors ===
    #[error("adb executable not found. Install the Android platform tools or set device.adb_path")]
    AdbNotFound,

    #[error("Device command '{command}' failed: {message}")]
    Device { command: String, message: String },

    #[error("The device must allow adb to run as root")]
    DeviceNotRoot,

    #[error("Failed to back up '{path}': {reason}")]
    Backup { path: String, reason: String },

    #[error("Failed to restore '{path}': {reason}")]
    Restore { path: String, reason: String },

    #[error("Cannot {action} while device scope is {state}")]
    InvalidScopeState { action: String, state: String },

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    // === Automation Errors ===
    #[error("Automation connection to {addr} failed: {reason}")]
    AutomationConnect { addr: String, reason: String },

    #[error("Automation protocol error: {0}")]
    AutomationProtocol(String),

    #[error("Automation command '{command}' failed: {message}")]
    AutomationCommand { command: String, message: String },

    #[error("Automation extension is already installed")]
    ExtensionAlreadyInstalled,

    #[error("Failed to install automation extension: {0}")]
    ExtensionInstall(String),

    // === Suite Errors ===
    #[error("Suite '{0}' is not defined in the configuration")]
    UnknownSuite(String),

    #[error("Failed to start suite '{suite}': {reason}")]
    SuiteSpawn { suite: String, reason: String },

    #[error("Suite '{suite}' exited with {status}")]
    SuiteFailed { suite: String, status: String },

    #[error("Failed to list groups of suite '{suite}': {reason}")]
    GroupListing { suite: String, reason: String },

    #[error("Expected artifact '{}' was not produced", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Run interrupted")]
    Interrupted,

    // === Archive Errors ===
    #[error("Results archive error: {0}")]
    Archive(String),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a device command error
    pub fn device(command: &str, message: impl Into<String>) -> Self {
        Self::Device {
            command: command.to_string(),
            message: message.into(),
        }
    }

    /// Create a backup error for a remote path
    pub fn backup(path: &str, reason: impl std::fmt::Display) -> Self {
        Self::Backup {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a restore error for a remote path
    pub fn restore(path: &str, reason: impl std::fmt::Display) -> Self {
        Self::Restore {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid scope state error
    pub fn invalid_state(action: &str, state: impl std::fmt::Display) -> Self {
        Self::InvalidScopeState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create a template resolution error
    pub fn template(template: &str, reason: impl Into<String>) -> Self {
        Self::Template {
            template: template.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an automation command error
    pub fn automation_command(command: &str, message: impl Into<String>) -> Self {
        Self::AutomationCommand {
            command: command.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error is the user cancelling the run
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}
