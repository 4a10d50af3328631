//! Test group listing
//!
//! Asks each configured suite for its groups with `--list-test-groups`.

use std::process::Stdio;

use tokio::process::Command;

use super::template::{self, TemplateContext};
use crate::common::config::{Config, SuiteSpec};
use crate::common::{Error, Result};

/// Flag asking a suite to print its groups, one per line
pub const LIST_GROUPS_FLAG: &str = "--list-test-groups";

/// Every `(suite, group)` pair in configuration order
///
/// Stops at the first suite that cannot be listed.
pub async fn list_groups(config: &Config) -> Result<Vec<(String, String)>> {
    let ctx = TemplateContext::from_config(config);
    let mut pairs = Vec::new();

    for spec in &config.suites {
        for group in suite_groups(spec, &ctx).await? {
            pairs.push((spec.name.clone(), group));
        }
    }

    Ok(pairs)
}

async fn suite_groups(spec: &SuiteSpec, ctx: &TemplateContext) -> Result<Vec<String>> {
    let failed = |reason: String| Error::GroupListing {
        suite: spec.name.clone(),
        reason,
    };

    let mut args = vec![LIST_GROUPS_FLAG.to_string()];
    args.extend(template::resolve_all(&spec.common_args, ctx)?);
    tracing::debug!("{} {}", spec.cmd.display(), args.join(" "));

    let output = Command::new(&spec.cmd)
        .args(&args)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .await
        .map_err(|e| failed(format!("{}: {}", spec.cmd.display(), e)))?;

    if !output.status.success() {
        return Err(failed(format!("exited with {}", output.status)));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_lists_groups_in_config_order() {
        let dir = tempfile::tempdir().unwrap();
        let ui = script(dir.path(), "ui.sh", "echo home\necho\necho settings");
        let sec = script(
            dir.path(),
            "sec.sh",
            r#"[ "$1" = "--list-test-groups" ] && [ "$2" = "--version=2.0" ] && echo ssl"#,
        );
        let config = Config::parse(&format!(
            r#"
[[suites]]
name = "ui"
cmd = "{ui}"

[[suites]]
name = "security"
cmd = "{sec}"
common_args = ["--version={{version}}"]
"#
        ))
        .unwrap();

        let pairs = list_groups(&config).await.unwrap();
        assert_eq!(
            pairs,
            vec![
                ("ui".to_string(), "home".to_string()),
                ("ui".to_string(), "settings".to_string()),
                ("security".to_string(), "ssl".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_listing_failure_names_suite() {
        let dir = tempfile::tempdir().unwrap();
        let bad = script(dir.path(), "bad.sh", "exit 2");
        let config = Config::parse(&format!(
            "[[suites]]\nname = \"bad\"\ncmd = \"{bad}\"\n"
        ))
        .unwrap();

        match list_groups(&config).await {
            Err(Error::GroupListing { suite, .. }) => assert_eq!(suite, "bad"),
            other => panic!("expected listing error, got {:?}", other),
        }
    }
}
