//! Device scope: backup, test settings, restore and reboot
//!
//! A scope is entered once per run. Entering backs up the configured remote
//! paths into a local staging area and applies the test settings. Restoring
//! and rebooting are separate calls made after every suite; closing only
//! removes the staging area.
//!
//! ```text
//! Unopened -> BackedUp -> SettingsApplied -> (restore, reboot)* -> Closed
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tracing::Span;

use super::DeviceControl;
use crate::automation::Automation;
use crate::common::config::Config;
use crate::common::paths::staging_path;
use crate::common::{Error, Result};

/// Settings applied to the device for the duration of the run
pub fn test_settings() -> Vec<(&'static str, Value)> {
    vec![
        ("screen.automatic-brightness", json!(false)),
        ("screen.brightness", json!(1.0)),
        ("screen.timeout", json!(0.0)),
        ("lockscreen.enabled", json!(false)),
    ]
}

/// What the scope backs up and how it talks to the device
#[derive(Debug, Clone)]
pub struct ScopeOptions {
    /// Remote directories to back up
    pub backup_dirs: Vec<String>,
    /// Remote files to back up
    pub backup_files: Vec<String>,
    /// Port forwarded for the automation session
    pub automation_port: u16,
    /// Delay after the device reports ready following a reboot
    pub settle_delay: Duration,
}

impl ScopeOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            backup_dirs: config.device.backup_dirs.clone(),
            backup_files: config.device.backup_files.clone(),
            automation_port: config.automation.port,
            settle_delay: config.device.settle_delay(),
        }
    }
}

/// Lifecycle state of a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Unopened,
    BackedUp,
    SettingsApplied,
    Closed,
}

impl ScopeState {
    fn is_entered(self) -> bool {
        matches!(self, ScopeState::BackedUp | ScopeState::SettingsApplied)
    }
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeState::Unopened => write!(f, "unopened"),
            ScopeState::BackedUp => write!(f, "backed up"),
            ScopeState::SettingsApplied => write!(f, "ready for testing"),
            ScopeState::Closed => write!(f, "closed"),
        }
    }
}

/// A remote path and where its copy lives locally
#[derive(Debug, Clone)]
struct BackedUpPath {
    remote: String,
    local: PathBuf,
}

/// Everything captured at scope entry
///
/// The staging directory is deleted when the set is dropped.
struct DeviceBackupSet {
    staging: TempDir,
    dirs: Vec<BackedUpPath>,
    files: Vec<BackedUpPath>,
}

/// Exclusive owner of the device for the duration of a run
pub struct DeviceScope<D: DeviceControl + ?Sized> {
    device: Arc<D>,
    options: ScopeOptions,
    state: ScopeState,
    backup: Option<DeviceBackupSet>,
    span: Span,
}

impl<D: DeviceControl + ?Sized> DeviceScope<D> {
    pub fn new(device: Arc<D>, options: ScopeOptions, parent: &Span) -> Self {
        Self {
            device,
            options,
            state: ScopeState::Unopened,
            backup: None,
            span: tracing::info_span!(parent: parent, "device"),
        }
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    /// Back up the device and apply the test settings
    ///
    /// A backup failure leaves the scope `Unopened`; a settings failure leaves
    /// it `BackedUp` so the caller can still close it.
    pub async fn enter(&mut self, automation: &mut dyn Automation) -> Result<()> {
        if self.state != ScopeState::Unopened {
            return Err(Error::invalid_state("enter", self.state));
        }

        self.backup = Some(self.capture().await?);
        self.state = ScopeState::BackedUp;

        tracing::info!(parent: &self.span, "Setting up device for testing");
        self.apply_settings(automation).await?;
        self.state = ScopeState::SettingsApplied;

        Ok(())
    }

    async fn capture(&self) -> Result<DeviceBackupSet> {
        tracing::info!(parent: &self.span, "Backing up device state");

        let staging = tempfile::Builder::new()
            .prefix("certsuite-backup-")
            .tempdir()?;

        let mut dirs = Vec::new();
        for remote in &self.options.backup_dirs {
            let local = staging_path(staging.path(), remote);
            self.device
                .pull_dir(remote, &local)
                .await
                .map_err(|e| Error::backup(remote, e))?;
            tracing::debug!(parent: &self.span, "Backed up directory {}", remote);
            dirs.push(BackedUpPath {
                remote: remote.clone(),
                local,
            });
        }

        let mut files = Vec::new();
        for remote in &self.options.backup_files {
            let local = staging_path(staging.path(), remote);
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::backup(remote, e))?;
            }
            self.device
                .pull_file(remote, &local)
                .await
                .map_err(|e| Error::backup(remote, e))?;
            tracing::debug!(parent: &self.span, "Backed up file {}", remote);
            files.push(BackedUpPath {
                remote: remote.clone(),
                local,
            });
        }

        Ok(DeviceBackupSet {
            staging,
            dirs,
            files,
        })
    }

    async fn apply_settings(&self, automation: &mut dyn Automation) -> Result<()> {
        let port = format!("tcp:{}", self.options.automation_port);
        self.device.forward(&port, &port).await?;

        automation.start_session().await?;

        let mut result = Ok(());
        for (name, value) in test_settings() {
            tracing::debug!(parent: &self.span, "Setting {} = {}", name, value);
            if let Err(e) = automation.set_setting(name, &value).await {
                result = Err(e);
                break;
            }
        }

        // The session is ended even when a setting failed
        let ended = automation.end_session().await;
        result.and(ended)
    }

    /// Put every backed-up path back on the device
    ///
    /// Files are restored before directories. Directory restore replaces the
    /// whole tree, so a file inside a backed-up directory ends up with the
    /// directory's copy either way.
    pub async fn restore(&self) -> Result<()> {
        if !self.state.is_entered() {
            return Err(Error::invalid_state("restore", self.state));
        }
        let backup = self
            .backup
            .as_ref()
            .ok_or_else(|| Error::Internal("entered scope without a backup".to_string()))?;

        tracing::info!(parent: &self.span, "Restoring device state");
        self.device
            .remount()
            .await
            .map_err(|e| Error::restore("/system", e))?;

        for path in &backup.files {
            self.device
                .remove_file(&path.remote)
                .await
                .map_err(|e| Error::restore(&path.remote, e))?;
            self.device
                .push_file(&path.local, &path.remote)
                .await
                .map_err(|e| Error::restore(&path.remote, e))?;
        }

        for path in &backup.dirs {
            self.device
                .remove_dir(&path.remote)
                .await
                .map_err(|e| Error::restore(&path.remote, e))?;
            self.device
                .push_dir(&path.local, &path.remote)
                .await
                .map_err(|e| Error::restore(&path.remote, e))?;
        }

        Ok(())
    }

    /// Reboot, wait for the device, then wait the settle delay
    pub async fn reboot(&self) -> Result<()> {
        if !self.state.is_entered() {
            return Err(Error::invalid_state("reboot", self.state));
        }

        tracing::info!(parent: &self.span, "Rebooting device");
        self.device.reboot().await?;

        // The ready signal can arrive before the device is actually usable
        if !self.options.settle_delay.is_zero() {
            tracing::debug!(
                parent: &self.span,
                "Waiting {}s for the device to settle",
                self.options.settle_delay.as_secs()
            );
            tokio::time::sleep(self.options.settle_delay).await;
        }
        Ok(())
    }

    /// Remove the staging area. Does not restore the device.
    pub fn close(&mut self) -> Result<()> {
        if self.state == ScopeState::Closed {
            return Err(Error::invalid_state("close", self.state));
        }

        tracing::info!(parent: &self.span, "Tearing down device after testing");
        self.state = ScopeState::Closed;
        if let Some(backup) = self.backup.take() {
            backup.staging.close()?;
        }
        Ok(())
    }

    /// Local staging root, while the scope holds a backup
    pub fn staging_dir(&self) -> Option<&std::path::Path> {
        self.backup.as_ref().map(|b| b.staging.path())
    }
}
