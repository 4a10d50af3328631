//! Suite process runner
//!
//! Runs one suite executable to completion. Structured records on stdout go
//! verbatim to the suite's structured log; every other line (and all of
//! stderr) goes to the diagnostic sink tagged with the process id and command
//! line.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::Span;

use super::classify::{self, OutputRecord};
use super::template::{self, TemplateContext};
use crate::common::config::SuiteSpec;
use crate::common::logging::OUTPUT_TARGET;
use crate::common::{Error, Result};

/// Flag asking a suite to write structured records to stdout
pub const LOG_RAW_FLAG: &str = "--log-raw=-";

/// Environment variable that turns off output buffering in suite processes
const UNBUFFERED_ENV: &str = "PYTHONUNBUFFERED";

/// Receiver of free-text suite output
pub trait DiagnosticSink: Send {
    fn process_output(&mut self, pid: u32, command: &str, line: &str);
}

/// Sends free-text suite output to the tracing subscriber
pub struct TracingDiagnostics {
    span: Span,
}

impl TracingDiagnostics {
    pub fn new(parent: &Span) -> Self {
        Self {
            span: parent.clone(),
        }
    }
}

impl DiagnosticSink for TracingDiagnostics {
    fn process_output(&mut self, pid: u32, command: &str, line: &str) {
        tracing::info!(
            target: OUTPUT_TARGET,
            parent: &self.span,
            pid,
            command,
            "{}",
            line
        );
    }
}

/// Concrete command line and expected outputs of one suite invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Structured log first, then the suite's extra files
    pub artifacts: Vec<PathBuf>,
    pub structured_log: PathBuf,
}

impl SuiteInvocation {
    /// Build the command for `spec` restricted to `groups`
    ///
    /// `ctx` must carry the invocation's scratch directory; the structured
    /// log is placed there.
    pub fn build(spec: &SuiteSpec, groups: &[String], ctx: &TemplateContext) -> Result<Self> {
        let scratch = ctx.temp_dir.as_ref().ok_or_else(|| {
            Error::Internal(format!("no scratch directory for suite '{}'", spec.name))
        })?;

        let structured_log = scratch.join(structured_log_name(&spec.name, groups));

        let mut args = vec![LOG_RAW_FLAG.to_string()];
        args.extend(groups.iter().map(|g| format!("--include={}", g)));
        args.extend(template::resolve_all(&spec.run_args, ctx)?);
        args.extend(template::resolve_all(&spec.common_args, ctx)?);

        let mut artifacts = vec![structured_log.clone()];
        for extra in &spec.extra_files {
            artifacts.push(PathBuf::from(template::resolve(extra, ctx)?));
        }

        Ok(Self {
            program: spec.cmd.clone(),
            args,
            artifacts,
            structured_log,
        })
    }

    /// Command line as shown in logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// `<suite>_structured_<groups>.log`, with `/` in group names made path-safe
pub fn structured_log_name(suite: &str, groups: &[String]) -> String {
    let groups = groups
        .iter()
        .map(|g| g.replace('/', "-"))
        .collect::<Vec<_>>()
        .join("_");
    format!("{}_structured_{}.log", suite, groups)
}

/// Outcome of one suite process
#[derive(Debug, Clone)]
pub struct SuiteRunResult {
    pub suite: String,
    /// Files the suite is expected to have produced
    pub artifacts: Vec<PathBuf>,
    pub structured_log: PathBuf,
    /// Process exit code (`None` when killed by a signal)
    pub exit_code: Option<i32>,
    pub success: bool,
    /// Number of structured records written to the structured log
    pub records: usize,
}

/// Runs suites one at a time
pub struct SuiteRunner<S: DiagnosticSink> {
    context: TemplateContext,
    diagnostics: S,
    interrupt: watch::Receiver<bool>,
    span: Span,
}

impl<S: DiagnosticSink> SuiteRunner<S> {
    pub fn new(
        context: TemplateContext,
        diagnostics: S,
        interrupt: watch::Receiver<bool>,
        parent: &Span,
    ) -> Self {
        Self {
            context,
            diagnostics,
            interrupt,
            span: parent.clone(),
        }
    }

    /// Command line and artifact paths for `spec` in `scratch`
    pub fn invocation(
        &self,
        spec: &SuiteSpec,
        groups: &[String],
        scratch: &Path,
    ) -> Result<SuiteInvocation> {
        let ctx = self.context.with_temp_dir(scratch);
        SuiteInvocation::build(spec, groups, &ctx)
    }

    /// Run `spec` in `scratch` and wait for it to exit
    pub async fn run(
        &mut self,
        spec: &SuiteSpec,
        groups: &[String],
        scratch: &Path,
    ) -> Result<SuiteRunResult> {
        let invocation = self.invocation(spec, groups, scratch)?;
        self.execute(&spec.name, &invocation).await
    }

    /// Run a prepared invocation and wait for it to exit
    ///
    /// A non-zero exit is reported through `SuiteRunResult::success`, not as
    /// an error. Errors (spawn failure, I/O failure, interruption) kill the
    /// process before returning; whatever reached the structured log by then
    /// stays on disk.
    pub async fn execute(
        &mut self,
        suite: &str,
        invocation: &SuiteInvocation,
    ) -> Result<SuiteRunResult> {
        tracing::info!(parent: &self.span, "Running suite {}", suite);

        let command_line = invocation.command_line();
        tracing::debug!(parent: &self.span, "{}", command_line);
        tracing::debug!(parent: &self.span, "Expected artifacts: {:?}", invocation.artifacts);

        // Created before the process starts; artifact collection always expects it
        let log_file = tokio::fs::File::create(&invocation.structured_log).await?;
        let mut structured = BufWriter::new(log_file);

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .env(UNBUFFERED_ENV, "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::SuiteSpawn {
                suite: suite.to_string(),
                reason: format!("{}: {}", invocation.program.display(), e),
            })?;
        let pid = child.id().unwrap_or(0);
        tracing::debug!(parent: &self.span, "Process '{}' is running", command_line);

        let outcome = drive(
            &mut child,
            Output {
                pid,
                command: &command_line,
                suite,
                span: &self.span,
            },
            &mut structured,
            &mut self.diagnostics,
            &mut self.interrupt,
        )
        .await;
        let flushed = structured.flush().await;

        let (status, records) = match outcome {
            Ok(done) => done,
            Err(e) => {
                tracing::error!(parent: &self.span, "Error running suite {}: {}", suite, e);
                // Best effort: the attempt is being abandoned anyway
                if let Err(kill_err) = child.kill().await {
                    tracing::debug!(parent: &self.span, "Failed to kill suite process: {}", kill_err);
                }
                return Err(e);
            }
        };
        flushed?;
        tracing::debug!(parent: &self.span, "Process finished with {}", status);

        Ok(SuiteRunResult {
            suite: suite.to_string(),
            artifacts: invocation.artifacts.clone(),
            structured_log: invocation.structured_log.clone(),
            exit_code: status.code(),
            success: status.success(),
            records,
        })
    }
}

/// Identity of the process whose output is being routed
struct Output<'a> {
    pid: u32,
    command: &'a str,
    suite: &'a str,
    span: &'a Span,
}

/// Route output until both streams close, then wait for exit
async fn drive<W, S>(
    child: &mut Child,
    output: Output<'_>,
    structured: &mut W,
    diagnostics: &mut S,
    interrupt: &mut watch::Receiver<bool>,
) -> Result<(ExitStatus, usize)>
where
    W: AsyncWrite + Unpin,
    S: DiagnosticSink + ?Sized,
{
    if *interrupt.borrow() {
        return Err(Error::Interrupted);
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Internal("suite stdout not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Internal("suite stderr not captured".to_string()))?;
    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);

    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();
    let mut out_open = true;
    let mut err_open = true;
    let mut interrupt_live = true;
    let mut records = 0;

    while out_open || err_open {
        tokio::select! {
            line = next_line(&mut stdout, &mut out_buf), if out_open => match line? {
                Some(line) => {
                    if route(&line, &output, structured, diagnostics).await? {
                        records += 1;
                    }
                }
                None => out_open = false,
            },
            line = next_line(&mut stderr, &mut err_buf), if err_open => match line? {
                Some(line) => diagnostics.process_output(output.pid, output.command, &line),
                None => err_open = false,
            },
            changed = interrupt.changed(), if interrupt_live => match changed {
                Ok(()) if *interrupt.borrow() => return Err(Error::Interrupted),
                Ok(()) => {}
                Err(_) => interrupt_live = false,
            },
        }
    }

    loop {
        tokio::select! {
            status = child.wait() => return Ok((status?, records)),
            changed = interrupt.changed(), if interrupt_live => match changed {
                Ok(()) if *interrupt.borrow() => return Err(Error::Interrupted),
                Ok(()) => {}
                Err(_) => interrupt_live = false,
            },
        }
    }
}

/// Classify one stdout line and send it where it belongs
///
/// Returns whether the line was a structured record.
async fn route<W, S>(
    line: &str,
    output: &Output<'_>,
    structured: &mut W,
    diagnostics: &mut S,
) -> Result<bool>
where
    W: AsyncWrite + Unpin,
    S: DiagnosticSink + ?Sized,
{
    match classify::classify(line) {
        OutputRecord::Structured { raw, record } => {
            structured.write_all(raw.as_bytes()).await?;
            structured.write_all(b"\n").await?;
            tracing::debug!(
                parent: output.span,
                "{} | {}",
                output.suite,
                classify::describe(&record)
            );
            Ok(true)
        }
        OutputRecord::Text(text) => {
            diagnostics.process_output(output.pid, output.command, text);
            Ok(false)
        }
    }
}

/// Read one line, decoding invalid UTF-8 lossily
///
/// `buf` keeps partially read bytes if the future is dropped, so calling
/// again after a cancelled read continues the same line.
async fn next_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    let n = reader.read_until(b'\n', buf).await?;
    if n == 0 && buf.is_empty() {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    Ok(Some(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Default)]
    struct Collect(Vec<(u32, String, String)>);

    impl DiagnosticSink for Collect {
        fn process_output(&mut self, pid: u32, command: &str, line: &str) {
            self.0.push((pid, command.to_string(), line.to_string()));
        }
    }

    fn spec() -> SuiteSpec {
        SuiteSpec {
            name: "webapi".to_string(),
            cmd: PathBuf::from("webapi-tests"),
            common_args: vec!["--mode=phone".to_string()],
            run_args: vec!["--out={temp_dir}/results.json".to_string()],
            extra_files: vec!["{temp_dir}/results.json".to_string()],
        }
    }

    fn ctx(dir: &Path) -> TemplateContext {
        TemplateContext::from_config(&crate::common::config::Config::default()).with_temp_dir(dir)
    }

    #[test]
    fn test_build_with_groups() {
        let groups = vec!["wifi".to_string(), "apps/calendar".to_string()];
        let inv = SuiteInvocation::build(&spec(), &groups, &ctx(Path::new("/scratch"))).unwrap();

        assert_eq!(
            inv.args,
            vec![
                "--log-raw=-",
                "--include=wifi",
                "--include=apps/calendar",
                "--out=/scratch/results.json",
                "--mode=phone",
            ]
        );
        assert_eq!(
            inv.structured_log,
            PathBuf::from("/scratch/webapi_structured_wifi_apps-calendar.log")
        );
        assert_eq!(
            inv.artifacts,
            vec![
                PathBuf::from("/scratch/webapi_structured_wifi_apps-calendar.log"),
                PathBuf::from("/scratch/results.json"),
            ]
        );
    }

    #[test]
    fn test_build_without_groups_omits_include() {
        let inv = SuiteInvocation::build(&spec(), &[], &ctx(Path::new("/scratch"))).unwrap();
        assert!(!inv.args.iter().any(|a| a.starts_with("--include")));
        assert_eq!(
            inv.structured_log,
            PathBuf::from("/scratch/webapi_structured_.log")
        );
        assert_eq!(
            inv.command_line(),
            "webapi-tests --log-raw=- --out=/scratch/results.json --mode=phone"
        );
    }

    #[tokio::test]
    async fn test_next_line_handles_missing_newline_and_bad_utf8() {
        let mut reader = BufReader::new(Cursor::new(b"one\r\ntw\xffo\nlast".to_vec()));
        let mut buf = Vec::new();

        assert_eq!(next_line(&mut reader, &mut buf).await.unwrap().unwrap(), "one\r");
        assert_eq!(
            next_line(&mut reader, &mut buf).await.unwrap().unwrap(),
            "tw\u{fffd}o"
        );
        assert_eq!(next_line(&mut reader, &mut buf).await.unwrap().unwrap(), "last");
        assert!(next_line(&mut reader, &mut buf).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_route_splits_streams() {
        let span = Span::none();
        let output = Output {
            pid: 42,
            command: "suite --log-raw=-",
            suite: "webapi",
            span: &span,
        };
        let mut structured = Vec::new();
        let mut diag = Collect::default();

        for line in [
            r#"{"action":"suite_start","tests":[]}"#,
            "plain text",
            r#"{"broken"#,
            r#"{"no_action":1}"#,
            r#"{"action":"suite_end"}"#,
        ] {
            route(line, &output, &mut structured, &mut diag).await.unwrap();
        }

        assert_eq!(
            String::from_utf8(structured).unwrap(),
            "{\"action\":\"suite_start\",\"tests\":[]}\n{\"action\":\"suite_end\"}\n"
        );
        let texts: Vec<&str> = diag.0.iter().map(|(_, _, l)| l.as_str()).collect();
        assert_eq!(texts, vec!["plain text", r#"{"broken"#, r#"{"no_action":1}"#]);
        assert!(diag.0.iter().all(|(pid, cmd, _)| *pid == 42 && cmd == "suite --log-raw=-"));
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("suite.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_collects_structured_output() {
        let bin = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let cmd = script(
            bin.path(),
            r#"echo '{"action":"suite_start"}'
echo "hello from $PYTHONUNBUFFERED"
echo oops >&2
echo '{"action":"suite_end"}'"#,
        );
        let spec = SuiteSpec {
            name: "ui".to_string(),
            cmd,
            common_args: vec![],
            run_args: vec![],
            extra_files: vec![],
        };

        let (_tx, rx) = watch::channel(false);
        let mut runner = SuiteRunner::new(ctx(scratch.path()), Collect::default(), rx, &Span::none());
        let result = runner.run(&spec, &[], scratch.path()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.records, 2);
        assert_eq!(
            std::fs::read_to_string(&result.structured_log).unwrap(),
            "{\"action\":\"suite_start\"}\n{\"action\":\"suite_end\"}\n"
        );
        let mut texts: Vec<String> = runner.diagnostics.0.iter().map(|(_, _, l)| l.clone()).collect();
        texts.sort();
        assert_eq!(texts, vec!["hello from 1", "oops"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_nonzero_exit() {
        let bin = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let cmd = script(bin.path(), "exit 3");
        let spec = SuiteSpec {
            name: "ui".to_string(),
            cmd,
            common_args: vec![],
            run_args: vec![],
            extra_files: vec![],
        };

        let (_tx, rx) = watch::channel(false);
        let mut runner = SuiteRunner::new(ctx(scratch.path()), Collect::default(), rx, &Span::none());
        let result = runner.run(&spec, &[], scratch.path()).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        // Empty but present
        assert_eq!(std::fs::read_to_string(&result.structured_log).unwrap(), "");
    }

    #[tokio::test]
    async fn test_spawn_failure_still_creates_structured_log() {
        let scratch = tempfile::tempdir().unwrap();
        let spec = SuiteSpec {
            name: "ghost".to_string(),
            cmd: scratch.path().join("does-not-exist"),
            common_args: vec![],
            run_args: vec![],
            extra_files: vec![],
        };

        let (_tx, rx) = watch::channel(false);
        let mut runner = SuiteRunner::new(ctx(scratch.path()), Collect::default(), rx, &Span::none());
        let err = runner.run(&spec, &[], scratch.path()).await.unwrap_err();

        assert!(matches!(err, Error::SuiteSpawn { .. }));
        assert!(scratch.path().join("ghost_structured_.log").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_interrupt_kills_process() {
        let bin = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let cmd = script(bin.path(), "echo started\nsleep 30");
        let spec = SuiteSpec {
            name: "slow".to_string(),
            cmd,
            common_args: vec![],
            run_args: vec![],
            extra_files: vec![],
        };

        let (tx, rx) = watch::channel(false);
        let mut runner = SuiteRunner::new(ctx(scratch.path()), Collect::default(), rx, &Span::none());
        let cancel = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            tx.send(true).unwrap();
            tx
        });

        let started = std::time::Instant::now();
        let err = runner.run(&spec, &[], scratch.path()).await.unwrap_err();
        assert!(err.is_interrupt());
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
        let _tx = cancel.await.unwrap();
    }
}
