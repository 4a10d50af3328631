//! Configuration and results locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/certsuite/`
//! - macOS: `~/Library/Application Support/certsuite/`
//! - Windows: `%APPDATA%\certsuite\`

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Name used for the configuration directory and archive prefix
const APP_NAME: &str = "certsuite";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the default configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Name of the results archive for a run started at `started`
///
/// Falls back to second zero if the clock is before the epoch.
pub fn archive_name(started: SystemTime) -> String {
    let secs = started
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{}-results-{}.zip", APP_NAME, secs)
}

/// Full path of the results archive inside `results_dir`
pub fn archive_path(results_dir: &Path, started: SystemTime) -> PathBuf {
    results_dir.join(archive_name(started))
}

/// Local staging location for a remote path
///
/// `/data/local` under `/tmp/stage` becomes `/tmp/stage/data/local`.
pub fn staging_path(staging_root: &Path, remote: &str) -> PathBuf {
    staging_root.join(remote.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }

    #[test]
    fn test_archive_name_uses_epoch_seconds() {
        let t = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(archive_name(t), "certsuite-results-1700000000.zip");
    }

    #[test]
    fn test_staging_path_strips_root() {
        let root = Path::new("/tmp/stage");
        assert_eq!(
            staging_path(root, "/system/etc/hosts"),
            PathBuf::from("/tmp/stage/system/etc/hosts")
        );
    }
}
