//! `DeviceControl` over the `adb` command line tool
//!
//! Every operation is one `adb` invocation. adb's own exit status is trusted
//! for transfers; shell commands append an exit-status marker because older
//! adbd versions do not propagate the remote status.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;

use super::DeviceControl;
use crate::common::config::DeviceConfig;
use crate::common::{Error, Result};

/// Marker appended to shell commands to recover the remote exit status
const STATUS_MARKER: &str = "__certsuite_status=";

/// How often to poll the boot-completed property while waiting
const READY_POLL: Duration = Duration::from_secs(1);

/// adb-backed device handle
#[derive(Debug, Clone)]
pub struct Adb {
    /// Path to the adb executable
    path: PathBuf,
    /// Device serial (`-s`), when more than one device is attached
    serial: Option<String>,
    /// How long `wait_ready` may block
    ready_timeout: Duration,
}

impl Adb {
    /// Create a handle without touching the device
    pub fn new(path: PathBuf, serial: Option<String>, ready_timeout: Duration) -> Self {
        Self {
            path,
            serial,
            ready_timeout,
        }
    }

    /// Locate adb, restart adbd as root and check the device is usable
    pub async fn connect(config: &DeviceConfig) -> Result<Self> {
        let path = match &config.adb_path {
            Some(p) => p.clone(),
            None => which::which("adb").map_err(|_| Error::AdbNotFound)?,
        };
        let adb = Self::new(path, config.serial.clone(), config.ready_timeout());

        tracing::info!("Testing adb connection");
        adb.wait_ready().await?;

        if config.require_root {
            // adbd restarts when switching to root, so wait for it again
            if let Err(e) = adb.run("root", &["root"]).await {
                tracing::debug!("adb root failed: {}", e);
            }
            adb.wait_ready().await?;

            let uid = adb.shell("id -u").await?;
            if uid.trim() != "0" {
                return Err(Error::DeviceNotRoot);
            }
        }

        Ok(adb)
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.path);
        if let Some(serial) = &self.serial {
            cmd.args(["-s", serial]);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run adb with `args`, returning stdout on success
    async fn run(&self, label: &str, args: &[&str]) -> Result<String> {
        tracing::trace!("adb {}", args.join(" "));

        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| Error::device(label, format!("failed to run adb: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::device(
                label,
                format!("adb exited with {}: {}", output.status, detail),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn boot_completed(&self) -> bool {
        match self.shell("getprop sys.boot_completed").await {
            Ok(out) => out.trim() == "1",
            Err(_) => false,
        }
    }
}

/// Split the exit-status marker off shell output
fn split_status(output: &str) -> (String, Option<i32>) {
    match output.rfind(STATUS_MARKER) {
        Some(idx) => {
            let status = output[idx + STATUS_MARKER.len()..].trim().parse().ok();
            (output[..idx].to_string(), status)
        }
        None => (output.to_string(), None),
    }
}

/// Quote a remote path for the device shell
fn quote(path: &str) -> String {
    format!("'{}'", path.replace('\'', r"'\''"))
}

fn local_str<'a>(label: &str, path: &'a Path) -> Result<&'a str> {
    path.to_str()
        .ok_or_else(|| Error::device(label, format!("non UTF-8 local path {}", path.display())))
}

#[async_trait]
impl DeviceControl for Adb {
    async fn pull_dir(&self, remote: &str, local: &Path) -> Result<()> {
        // adb nests the tree under `local` when it already exists
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if local.exists() {
            std::fs::remove_dir_all(local)?;
        }
        self.run("pull", &["pull", remote, local_str("pull", local)?])
            .await
            .map(|_| ())
    }

    async fn pull_file(&self, remote: &str, local: &Path) -> Result<()> {
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.run("pull", &["pull", remote, local_str("pull", local)?])
            .await
            .map(|_| ())
    }

    async fn push_dir(&self, local: &Path, remote: &str) -> Result<()> {
        self.run("push", &["push", local_str("push", local)?, remote])
            .await
            .map(|_| ())
    }

    async fn push_file(&self, local: &Path, remote: &str) -> Result<()> {
        self.run("push", &["push", local_str("push", local)?, remote])
            .await
            .map(|_| ())
    }

    async fn remove_file(&self, remote: &str) -> Result<()> {
        self.shell(&format!("rm -f {}", quote(remote))).await.map(|_| ())
    }

    async fn remove_dir(&self, remote: &str) -> Result<()> {
        self.shell(&format!("rm -rf {}", quote(remote))).await.map(|_| ())
    }

    async fn exists(&self, remote: &str) -> Result<bool> {
        let out = self
            .shell(&format!("if [ -e {} ]; then echo yes; else echo no; fi", quote(remote)))
            .await?;
        Ok(out.trim() == "yes")
    }

    async fn shell(&self, command: &str) -> Result<String> {
        let wrapped = format!("{}; echo {}$?", command, STATUS_MARKER);
        let output = self.run("shell", &["shell", &wrapped]).await?;
        let (stdout, status) = split_status(&output);
        match status {
            Some(0) | None => Ok(stdout),
            Some(code) => Err(Error::device(
                "shell",
                format!("'{}' exited with status {}: {}", command, code, stdout.trim()),
            )),
        }
    }

    async fn remount(&self) -> Result<()> {
        self.run("remount", &["remount"]).await.map(|_| ())
    }

    async fn forward(&self, local: &str, remote: &str) -> Result<()> {
        self.run("forward", &["forward", local, remote])
            .await
            .map(|_| ())
    }

    async fn wait_ready(&self) -> Result<()> {
        let deadline = Instant::now() + self.ready_timeout;

        let wait = self.run("wait-for-device", &["wait-for-device"]);
        tokio::time::timeout(self.ready_timeout, wait)
            .await
            .map_err(|_| Error::Timeout(self.ready_timeout.as_secs()))??;

        loop {
            if self.boot_completed().await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(self.ready_timeout.as_secs()));
            }
            tokio::time::sleep(READY_POLL).await;
        }
    }

    async fn reboot(&self) -> Result<()> {
        self.run("reboot", &["reboot"]).await?;
        // Give adbd a moment to drop before polling, or the old instance answers
        tokio::time::sleep(READY_POLL).await;
        self.wait_ready().await
    }
}
