//! Automation extension installation
//!
//! The extension is a directory pushed to a fixed remote location. An
//! existing remote directory means it is already installed, which callers
//! treat as success.

use crate::common::config::ExtensionConfig;
use crate::common::{Error, Result};
use crate::device::DeviceControl;

/// Name of the marker file recording the installed version
const VERSION_FILE: &str = "version.txt";

/// Install the extension onto the device
///
/// Returns `Error::ExtensionAlreadyInstalled` when the remote path exists.
/// Any other error means the device may not be automatable.
pub async fn install<D: DeviceControl + ?Sized>(
    device: &D,
    config: &ExtensionConfig,
    version: &str,
) -> Result<()> {
    if device.exists(&config.remote_path).await? {
        return Err(Error::ExtensionAlreadyInstalled);
    }

    if !config.source.is_dir() {
        return Err(Error::ExtensionInstall(format!(
            "extension source '{}' is not a directory",
            config.source.display()
        )));
    }

    let staging = tempfile::tempdir()?;
    let tree = staging.path().join("extension");
    copy_tree(&config.source, &tree)?;
    std::fs::write(tree.join(VERSION_FILE), version)?;

    device.remount().await?;
    device
        .push_dir(&tree, &config.remote_path)
        .await
        .map_err(|e| Error::ExtensionInstall(e.to_string()))?;

    device
        .shell(&config.restart_command)
        .await
        .map_err(|e| Error::ExtensionInstall(e.to_string()))?;
    device.wait_ready().await?;

    Ok(())
}

/// Recursively copy a local directory
fn copy_tree(from: &std::path::Path, to: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(to)?;
    for entry in std::fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_tree() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("a/b")).unwrap();
        std::fs::write(src.path().join("a/b/c.js"), "x").unwrap();
        std::fs::write(src.path().join("top.json"), "{}").unwrap();

        let dst = tempfile::tempdir().unwrap();
        let out = dst.path().join("copy");
        copy_tree(src.path(), &out).unwrap();

        assert_eq!(std::fs::read_to_string(out.join("a/b/c.js")).unwrap(), "x");
        assert_eq!(std::fs::read_to_string(out.join("top.json")).unwrap(), "{}");
    }
}
