//! Device control
//!
//! `DeviceControl` is the seam between the harness and the transport that
//! actually talks to the device. The harness only ever mutates the device
//! through a `DeviceScope`, which owns the single `DeviceControl` handle for
//! the whole run.

pub mod adb;
pub mod scope;

use async_trait::async_trait;
use std::path::Path;

use crate::common::Result;

pub use adb::Adb;
pub use scope::{DeviceScope, ScopeOptions, ScopeState};

/// Operations the harness needs from the device transport
///
/// Remote paths are absolute device paths. Failures surface as
/// `Error::Device` so callers can tell transport problems apart from local
/// I/O.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Copy a remote directory tree to `local` (which must not exist yet)
    async fn pull_dir(&self, remote: &str, local: &Path) -> Result<()>;

    /// Copy a single remote file to `local`
    async fn pull_file(&self, remote: &str, local: &Path) -> Result<()>;

    /// Copy a local directory tree to `remote` (which must not exist yet)
    async fn push_dir(&self, local: &Path, remote: &str) -> Result<()>;

    /// Copy a single local file to `remote`
    async fn push_file(&self, local: &Path, remote: &str) -> Result<()>;

    /// Remove a remote file; removing a missing file is not an error
    async fn remove_file(&self, remote: &str) -> Result<()>;

    /// Remove a remote directory recursively; a missing directory is not an error
    async fn remove_dir(&self, remote: &str) -> Result<()>;

    /// Whether a remote path exists
    async fn exists(&self, remote: &str) -> Result<bool>;

    /// Run a shell command on the device and return its stdout
    async fn shell(&self, command: &str) -> Result<String>;

    /// Make the system partition writable
    async fn remount(&self) -> Result<()>;

    /// Forward a local socket spec (e.g. `tcp:2828`) to the device
    async fn forward(&self, local: &str, remote: &str) -> Result<()>;

    /// Block until the device reports it has finished booting
    async fn wait_ready(&self) -> Result<()>;

    /// Reboot the device and block until it reports ready
    async fn reboot(&self) -> Result<()>;
}
