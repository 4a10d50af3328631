//! Configuration file handling

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Certification version, passed to suites and the extension installer
    #[serde(default = "default_version")]
    pub version: String,

    /// Directory the results archive is written to
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Device connection and backup settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// Automation (Marionette) connection settings
    #[serde(default)]
    pub automation: AutomationConfig,

    /// Automation extension to install before testing
    #[serde(default)]
    pub extension: Option<ExtensionConfig>,

    /// Test suites, in the order they run by default
    #[serde(default)]
    pub suites: Vec<SuiteSpec>,
}

fn default_version() -> String {
    "2.0".to_string()
}

fn default_results_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            results_dir: default_results_dir(),
            device: DeviceConfig::default(),
            automation: AutomationConfig::default(),
            extension: None,
            suites: Vec::new(),
        }
    }
}

/// Device settings
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    /// Path to the adb executable (searched in PATH when unset)
    #[serde(default)]
    pub adb_path: Option<PathBuf>,

    /// Device serial, for hosts with more than one device attached
    #[serde(default)]
    pub serial: Option<String>,

    /// Seconds to wait after the device reports ready following a reboot
    #[serde(default = "default_settle")]
    pub settle_secs: u64,

    /// Seconds to wait for the device to report ready
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Remote directories backed up before testing
    #[serde(default = "default_backup_dirs")]
    pub backup_dirs: Vec<String>,

    /// Remote files backed up before testing
    #[serde(default = "default_backup_files")]
    pub backup_files: Vec<String>,

    /// Refuse to run unless adb runs as root on the device
    #[serde(default = "default_require_root")]
    pub require_root: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            adb_path: None,
            serial: None,
            settle_secs: default_settle(),
            ready_timeout_secs: default_ready_timeout(),
            backup_dirs: default_backup_dirs(),
            backup_files: default_backup_files(),
            require_root: default_require_root(),
        }
    }
}

// Device ready-signaling is unreliable right after a reboot, hence the settle.
fn default_settle() -> u64 {
    30
}
fn default_ready_timeout() -> u64 {
    120
}
fn default_backup_dirs() -> Vec<String> {
    vec!["/data/local".to_string(), "/data/b2g/mozilla".to_string()]
}
fn default_backup_files() -> Vec<String> {
    vec!["/system/etc/hosts".to_string()]
}
fn default_require_root() -> bool {
    true
}

impl DeviceConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

/// Automation connection settings
#[derive(Debug, Deserialize, Clone)]
pub struct AutomationConfig {
    /// Local host the forwarded port listens on
    #[serde(default = "default_host")]
    pub host: String,

    /// Port forwarded to the device (same number on both ends)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds to keep retrying the initial connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    2828
}
fn default_connect_timeout() -> u64 {
    60
}

/// Automation extension install settings
#[derive(Debug, Deserialize, Clone)]
pub struct ExtensionConfig {
    /// Local directory holding the extension files
    pub source: PathBuf,

    /// Remote directory the extension is installed to
    pub remote_path: String,

    /// Shell command that restarts the device runtime to load the extension
    #[serde(default = "default_restart_command")]
    pub restart_command: String,
}

fn default_restart_command() -> String {
    "stop b2g; start b2g".to_string()
}

/// One runnable test suite
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SuiteSpec {
    /// Unique suite name, used in `suite[:group]` selectors
    pub name: String,

    /// Executable to run
    pub cmd: PathBuf,

    /// Arguments passed both when listing groups and when running
    #[serde(default)]
    pub common_args: Vec<String>,

    /// Argument templates passed only when running
    #[serde(default)]
    pub run_args: Vec<String>,

    /// Templates of extra artifact paths the suite produces
    #[serde(default)]
    pub extra_files: Vec<String>,
}

impl Config {
    /// Load configuration from `path`, or from the default config file
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => config_path()
                .ok_or_else(|| Error::Config("No configuration directory available".to_string()))?,
        };

        if !path.exists() {
            return Err(Error::ConfigNotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for suite in &self.suites {
            if suite.name.is_empty() || suite.name.contains(':') {
                return Err(Error::Config(format!(
                    "Invalid suite name '{}': names must be non-empty and must not contain ':'",
                    suite.name
                )));
            }
            if !seen.insert(suite.name.as_str()) {
                return Err(Error::Config(format!(
                    "Suite '{}' is defined more than once",
                    suite.name
                )));
            }
        }
        Ok(())
    }

    /// Get suite configuration by name
    pub fn suite(&self, name: &str) -> Option<&SuiteSpec> {
        self.suites.iter().find(|s| s.name == name)
    }

    /// Names of all configured suites, in configuration order
    pub fn suite_names(&self) -> impl Iterator<Item = &str> {
        self.suites.iter().map(|s| s.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = "2.2"

[device]
settle_secs = 0
backup_files = ["/system/etc/hosts", "/data/local/prefs.js"]

[[suites]]
name = "webapi"
cmd = "webapi-tests"
run_args = ["--version={version}", "--out={temp_dir}/webapi.json"]
extra_files = ["{temp_dir}/webapi.json"]

[[suites]]
name = "security"
cmd = "securitysuite"
common_args = ["--mode=phone"]
"#;

    #[test]
    fn test_parse_preserves_suite_order() {
        let config = Config::parse(SAMPLE).unwrap();
        let names: Vec<&str> = config.suite_names().collect();
        assert_eq!(names, vec!["webapi", "security"]);
        assert_eq!(config.version, "2.2");
        assert_eq!(config.device.settle_secs, 0);
        assert_eq!(config.device.backup_dirs, default_backup_dirs());
        assert_eq!(config.device.backup_files.len(), 2);
    }

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.automation.port, 2828);
        assert_eq!(config.device.settle_secs, 30);
        assert!(config.device.require_root);
        assert!(config.extension.is_none());
        assert!(config.suites.is_empty());
    }

    #[test]
    fn test_duplicate_suite_rejected() {
        let text = r#"
[[suites]]
name = "a"
cmd = "x"

[[suites]]
name = "a"
cmd = "y"
"#;
        assert!(matches!(Config::parse(text), Err(Error::Config(_))));
    }

    #[test]
    fn test_suite_name_with_colon_rejected() {
        let text = r#"
[[suites]]
name = "a:b"
cmd = "x"
"#;
        assert!(Config::parse(text).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(Error::ConfigNotFound(_))
        ));
    }

    #[test]
    fn test_suite_lookup() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.suite("security").unwrap().common_args, vec!["--mode=phone"]);
        assert!(config.suite("ui").is_none());
    }
}
