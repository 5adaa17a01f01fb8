//! Throwaway execution sandbox for measuring generated suites.
//!
//! Layout is one temp directory holding `{module}.py` (the code under
//! test) and `test_main.py` (the generated suite with its placeholder
//! imports rewritten to the real module name). Measurement is two
//! subprocess runs:
//!
//! 1. `python -m coverage run --source={module} -m pytest test_main.py -q`
//! 2. `python -m coverage json -o coverage.json`
//!
//! then the JSON totals and the module's missing lines are lifted out.
//! Failing tests are expected and fine; only a missing report is an
//! error. The directory is removed when the handle drops.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::compose::SOURCE_MODULE_PLACEHOLDER;
use crate::pyenv::PythonEnv;
use crate::refine::{CoverageProbe, CoverageReport};

/// Wall-clock budget for one subprocess run.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(20);

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("failed to stage sandbox files: {0}")]
    Io(#[from] std::io::Error),

    #[error("{command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("coverage run produced no report: {reason}")]
    NoReport { reason: String },

    #[error("coverage report unreadable: {0}")]
    BadReport(#[from] serde_json::Error),
}

pub type SandboxResult<T> = Result<T, SandboxError>;

// ============================================================================
// Module naming and import rewriting
// ============================================================================

/// Sanitize a source file name into an importable module name: strip
/// the extension, map separators to underscores, drop anything that is
/// not ASCII alphanumeric, and guard against a leading digit.
pub fn derive_module_name(file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let mut name = String::with_capacity(stem.len());
    for ch in stem.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            name.push(ch);
        } else if ch == '-' || ch == '.' || ch == ' ' {
            name.push('_');
        }
    }
    if name.is_empty() {
        return SOURCE_MODULE_PLACEHOLDER.to_string();
    }
    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

/// Point the suite's placeholder imports at the real module, and
/// star-import the module up front so references still resolve when an
/// externally drafted suite forgot its imports.
pub fn rewrite_imports(tests: &str, module: &str) -> String {
    let mut rewritten = tests
        .replace(
            &format!("from {SOURCE_MODULE_PLACEHOLDER} import"),
            &format!("from {module} import"),
        )
        .replace(
            &format!("import {SOURCE_MODULE_PLACEHOLDER}\n"),
            &format!("import {module}\n"),
        );
    let star = format!("from {module} import *");
    if !rewritten.contains(&star) {
        rewritten = format!("{star}  # noqa: F401,F403\n{rewritten}");
    }
    rewritten
}

// ============================================================================
// Coverage JSON shape (what `coverage json` emits)
// ============================================================================

#[derive(Debug, Deserialize)]
struct CoverageJson {
    totals: CoverageTotals,
    #[serde(default)]
    files: BTreeMap<String, FileCoverage>,
}

#[derive(Debug, Deserialize)]
struct CoverageTotals {
    percent_covered: f64,
}

#[derive(Debug, Deserialize)]
struct FileCoverage {
    #[serde(default)]
    missing_lines: Vec<u32>,
}

// ============================================================================
// Run outcome
// ============================================================================

/// Captured result of one sandboxed subprocess run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(serialize_with = "duration_secs")]
    pub duration: Duration,
    pub timed_out: bool,
}

fn duration_secs<S: serde::Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(duration.as_secs_f64())
}

fn read_pipe<R: Read>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Sandbox
// ============================================================================

pub struct CoverageSandbox {
    python: PythonEnv,
    timeout: Duration,
    module: String,
}

impl CoverageSandbox {
    pub fn new(python: PythonEnv) -> CoverageSandbox {
        CoverageSandbox {
            python,
            timeout: DEFAULT_RUN_TIMEOUT,
            module: SOURCE_MODULE_PLACEHOLDER.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Name the staged module after the original file so pytest
    /// tracebacks read naturally.
    pub fn for_file(mut self, file_name: &str) -> Self {
        self.module = derive_module_name(file_name);
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Stage source and tests, run them under coverage, and parse the
    /// resulting report.
    pub fn measure_coverage(&self, source: &str, tests: &str) -> SandboxResult<CoverageReport> {
        let dir = TempDir::with_prefix("covsmith_sandbox_")?;
        let module_file = format!("{}.py", self.module);
        fs::write(dir.path().join(&module_file), source)?;
        fs::write(
            dir.path().join("test_main.py"),
            rewrite_imports(tests, &self.module),
        )?;

        let source_flag = format!("--source={}", self.module);
        let run = self.run(
            dir.path(),
            &[
                "-m",
                "coverage",
                "run",
                &source_flag,
                "-m",
                "pytest",
                "test_main.py",
                "-q",
            ],
        )?;
        if run.timed_out {
            return Err(SandboxError::Timeout {
                command: "coverage run -m pytest".to_string(),
                timeout: self.timeout,
            });
        }
        debug!(exit = ?run.exit_code, "pytest run finished");

        let export = self.run(
            dir.path(),
            &["-m", "coverage", "json", "-o", "coverage.json"],
        )?;
        if export.timed_out {
            return Err(SandboxError::Timeout {
                command: "coverage json".to_string(),
                timeout: self.timeout,
            });
        }

        let report_path = dir.path().join("coverage.json");
        if !report_path.exists() {
            // Usually the test file failed to even import (broken
            // drafted code, missing pytest), so nothing was measured.
            let reason = last_line(&run.stderr)
                .or_else(|| last_line(&run.stdout))
                .or_else(|| last_line(&export.stderr))
                .unwrap_or_else(|| "no coverage data produced".to_string());
            return Err(SandboxError::NoReport { reason });
        }

        let raw = fs::read_to_string(&report_path)?;
        let parsed: CoverageJson = serde_json::from_str(&raw)?;
        let missing_lines = parsed
            .files
            .get(&module_file)
            .map(|f| f.missing_lines.clone())
            .unwrap_or_default();
        Ok(CoverageReport {
            percent: parsed.totals.percent_covered,
            missing_lines,
            raw_report: serde_json::from_str(&raw).ok(),
            error: None,
        })
    }

    fn run(&self, cwd: &Path, args: &[&str]) -> SandboxResult<RunOutcome> {
        let start = Instant::now();
        let mut child = Command::new(self.python.interpreter())
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        match child.wait_timeout(self.timeout)? {
            Some(status) => Ok(RunOutcome {
                success: status.success(),
                exit_code: status.code(),
                stdout: read_pipe(child.stdout.take()),
                stderr: read_pipe(child.stderr.take()),
                duration: start.elapsed(),
                timed_out: false,
            }),
            None => {
                let _ = child.kill();
                let _ = child.wait(); // reap
                warn!(args = ?args, timeout = ?self.timeout, "sandboxed run timed out");
                Ok(RunOutcome {
                    success: false,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("command timed out after {:?}", self.timeout),
                    duration: start.elapsed(),
                    timed_out: true,
                })
            }
        }
    }
}

impl CoverageProbe for CoverageSandbox {
    /// Infallible by contract: measurement failures degrade to a report
    /// carrying the error, so refinement stops cleanly instead of
    /// taking generation down with it.
    fn measure(&self, source: &str, tests: &str) -> CoverageReport {
        match self.measure_coverage(source, tests) {
            Ok(report) => report,
            Err(error) => {
                warn!(%error, "coverage measurement failed");
                CoverageReport::failed(error.to_string())
            }
        }
    }
}
