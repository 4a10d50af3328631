//! Results archive
//!
//! One zip per run, named after the run's start time. Suite artifacts are
//! added as soon as each suite finishes, so their scratch directories can be
//! deleted right away. The harness log is staged next to the archive while
//! the run is in progress and added last.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::common::paths::archive_path;
use crate::common::{Error, Result};

/// Archive entry holding the harness log
pub const HARNESS_LOG_ENTRY: &str = "harness.log";

/// Zip archive collecting everything a run produced
pub struct ResultsArchive {
    path: PathBuf,
    zip: ZipWriter<File>,
    entries: HashSet<String>,
    staging: TempDir,
    log_path: PathBuf,
}

impl ResultsArchive {
    /// Create the archive in `results_dir`, creating the directory if needed
    pub fn create(results_dir: &Path) -> Result<Self> {
        Self::create_at(results_dir, SystemTime::now())
    }

    /// Create the archive for a run started at `started`
    pub fn create_at(results_dir: &Path, started: SystemTime) -> Result<Self> {
        std::fs::create_dir_all(results_dir).map_err(|e| {
            Error::Archive(format!(
                "cannot create results directory '{}': {}",
                results_dir.display(),
                e
            ))
        })?;

        let path = archive_path(results_dir, started);
        let file = File::create(&path).map_err(|e| {
            Error::Archive(format!("cannot create '{}': {}", path.display(), e))
        })?;

        let staging = tempfile::Builder::new().prefix("certsuite-log-").tempdir()?;
        let log_path = staging.path().join(HARNESS_LOG_ENTRY);
        File::create(&log_path)?;

        Ok(Self {
            path,
            zip: ZipWriter::new(file),
            entries: HashSet::new(),
            staging,
            log_path,
        })
    }

    /// Where the archive is being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the staged harness log for appending
    pub fn log_file(&self) -> Result<File> {
        Ok(OpenOptions::new().append(true).open(&self.log_path)?)
    }

    fn options() -> SimpleFileOptions {
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
    }

    fn claim(&mut self, name: &str) -> Result<()> {
        if !self.entries.insert(name.to_string()) {
            return Err(Error::Archive(format!("duplicate entry '{}'", name)));
        }
        Ok(())
    }

    /// Copy a local file into the archive as `name`
    pub fn add_file(&mut self, source: &Path, name: &str) -> Result<()> {
        if !source.is_file() {
            return Err(Error::ArtifactMissing(source.to_path_buf()));
        }
        let mut input = File::open(source).map_err(|e| Error::FileRead {
            path: source.display().to_string(),
            error: e.to_string(),
        })?;

        self.claim(name)?;
        self.zip.start_file(name, Self::options())?;
        std::io::copy(&mut input, &mut self.zip)?;
        tracing::debug!("Archived {} as {}", source.display(), name);
        Ok(())
    }

    /// Write an in-memory entry
    pub fn add_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.claim(name)?;
        self.zip.start_file(name, Self::options())?;
        self.zip.write_all(bytes)?;
        Ok(())
    }

    /// Add the harness log and write the zip directory
    ///
    /// Anything logged after this point does not reach the archive.
    pub fn finish(mut self) -> Result<PathBuf> {
        let log_path = self.log_path.clone();
        self.add_file(&log_path, HARNESS_LOG_ENTRY)?;
        self.zip.finish()?;
        if let Err(e) = self.staging.close() {
            tracing::debug!("Failed to remove log staging directory: {}", e);
        }
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::time::{Duration, UNIX_EPOCH};

    fn read_entry(path: &Path, name: &str) -> String {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut entry = archive.by_name(name).unwrap();
        let mut out = String::new();
        entry.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_archive_contents() {
        let results = tempfile::tempdir().unwrap();
        let artifacts = tempfile::tempdir().unwrap();
        let started = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        let mut archive = ResultsArchive::create_at(results.path(), started).unwrap();
        let artifact = artifacts.path().join("ui_structured_.log");
        std::fs::write(&artifact, "{\"action\":\"suite_end\"}\n").unwrap();

        archive.add_file(&artifact, "ui/ui_structured_.log").unwrap();
        archive.add_bytes("report.json", b"{}").unwrap();
        writeln!(archive.log_file().unwrap(), "harness line").unwrap();

        let path = archive.finish().unwrap();
        assert_eq!(path, results.path().join("certsuite-results-1700000000.zip"));
        assert_eq!(
            read_entry(&path, "ui/ui_structured_.log"),
            "{\"action\":\"suite_end\"}\n"
        );
        assert_eq!(read_entry(&path, "report.json"), "{}");
        assert_eq!(read_entry(&path, HARNESS_LOG_ENTRY), "harness line\n");
    }

    #[test]
    fn test_missing_artifact() {
        let results = tempfile::tempdir().unwrap();
        let mut archive = ResultsArchive::create(results.path()).unwrap();

        let missing = results.path().join("nope.json");
        let err = archive.add_file(&missing, "ui/nope.json").unwrap_err();
        assert!(matches!(err, Error::ArtifactMissing(p) if p == missing));
        assert!(!archive.entries.contains("ui/nope.json"));
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let results = tempfile::tempdir().unwrap();
        let mut archive = ResultsArchive::create(results.path()).unwrap();

        archive.add_bytes("report.json", b"{}").unwrap();
        assert!(matches!(
            archive.add_bytes("report.json", b"{}"),
            Err(Error::Archive(_))
        ));
    }

    #[test]
    fn test_creates_results_dir() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a/b");
        let archive = ResultsArchive::create(&nested).unwrap();
        assert!(archive.path().starts_with(&nested));
        assert!(archive.finish().unwrap().exists());
    }
}
