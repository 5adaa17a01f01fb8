//! Python interpreter discovery.
//!
//! Resolution order:
//!
//! 1. Explicit `--python` flag
//! 2. `$COVSMITH_PYTHON`
//! 3. `$VIRTUAL_ENV` (the user's active venv)
//! 4. `python3`, then `python`, from `$PATH`
//!
//! A candidate counts only if it answers `--version` and reports
//! Python 3. Whether pytest and coverage are importable is probed
//! separately, so callers can degrade to generation-only mode instead
//! of failing outright.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Environment variable naming an interpreter to prefer.
pub const PYTHON_ENV_VAR: &str = "COVSMITH_PYTHON";

/// Modules the coverage sandbox needs to import.
pub const REQUIRED_MODULES: &[&str] = &["pytest", "coverage"];

#[cfg(windows)]
const VENV_BIN_DIR: &str = "Scripts";

#[cfg(not(windows))]
const VENV_BIN_DIR: &str = "bin";

#[cfg(windows)]
const PATH_CANDIDATES: &[&str] = &["python.exe", "python3.exe"];

#[cfg(not(windows))]
const PATH_CANDIDATES: &[&str] = &["python3", "python"];

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum PythonEnvError {
    #[error("{}", format_not_found(.searched))]
    NotFound { searched: Vec<String> },

    #[error("python at {path} is unusable: {reason}")]
    Unusable { path: PathBuf, reason: String },

    #[error("{}", format_tooling_missing(.path, .missing))]
    ToolingMissing { path: PathBuf, missing: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PythonEnvResult<T> = Result<T, PythonEnvError>;

fn format_not_found(searched: &[String]) -> String {
    let mut msg = String::from("no Python interpreter found\n\n");
    msg.push_str("Coverage measurement needs Python 3 with pytest and coverage installed.\n\n");
    if !searched.is_empty() {
        msg.push_str("Resolution attempted:\n");
        for (i, step) in searched.iter().enumerate() {
            msg.push_str(&format!("  {}. {}\n", i + 1, step));
        }
        msg.push('\n');
    }
    msg.push_str("Remediation:\n");
    msg.push_str("  a) Install Python 3 and put it on $PATH\n");
    msg.push_str(&format!(
        "  b) Point at one directly: export {PYTHON_ENV_VAR}=$(which python3)\n"
    ));
    msg.push_str("  c) Or pass --python /path/to/python3\n");
    msg
}

fn format_tooling_missing(path: &Path, missing: &[String]) -> String {
    let mut msg = format!(
        "{} not importable in Python at {}\n\n",
        missing.join(" and "),
        path.display()
    );
    msg.push_str("Remediation:\n");
    msg.push_str(&format!(
        "  {} -m pip install {}\n",
        path.display(),
        missing.join(" ")
    ));
    msg
}

// ============================================================================
// Resolved environment
// ============================================================================

/// Where the interpreter was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    CliFlag,
    EnvVar,
    VirtualEnv,
    Path,
}

impl std::fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionSource::CliFlag => write!(f, "--python flag"),
            ResolutionSource::EnvVar => write!(f, "${PYTHON_ENV_VAR}"),
            ResolutionSource::VirtualEnv => write!(f, "$VIRTUAL_ENV"),
            ResolutionSource::Path => write!(f, "$PATH"),
        }
    }
}

/// A validated interpreter.
#[derive(Debug, Clone, Serialize)]
pub struct PythonEnv {
    pub interpreter: PathBuf,
    /// Raw `--version` output, e.g. `Python 3.11.4`.
    pub version: String,
    pub source: ResolutionSource,
}

impl PythonEnv {
    pub fn interpreter(&self) -> &Path {
        &self.interpreter
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Walk the resolution order and return the first usable interpreter.
pub fn resolve_python(explicit: Option<&Path>) -> PythonEnvResult<PythonEnv> {
    let mut searched = Vec::new();

    // An explicit flag is authoritative: failure is an error, not a
    // fallthrough to weaker sources.
    if let Some(path) = explicit {
        return validate(path, ResolutionSource::CliFlag);
    }
    searched.push("--python flag: not given".to_string());

    if let Ok(raw) = std::env::var(PYTHON_ENV_VAR) {
        let path = PathBuf::from(&raw);
        if path.exists() {
            return validate(&path, ResolutionSource::EnvVar);
        }
        searched.push(format!("${PYTHON_ENV_VAR}: {raw} does not exist"));
    } else {
        searched.push(format!("${PYTHON_ENV_VAR}: not set"));
    }

    if let Ok(venv) = std::env::var("VIRTUAL_ENV") {
        let mut found_any = false;
        for name in PATH_CANDIDATES {
            let candidate = Path::new(&venv).join(VENV_BIN_DIR).join(name);
            if candidate.exists() {
                found_any = true;
                if let Ok(env) = validate(&candidate, ResolutionSource::VirtualEnv) {
                    return Ok(env);
                }
            }
        }
        if found_any {
            searched.push("$VIRTUAL_ENV: interpreter did not answer --version".to_string());
        } else {
            searched.push("$VIRTUAL_ENV: no interpreter inside".to_string());
        }
    } else {
        searched.push("$VIRTUAL_ENV: not set".to_string());
    }

    for name in PATH_CANDIDATES {
        match which::which(name) {
            Ok(path) => {
                if let Ok(env) = validate(&path, ResolutionSource::Path) {
                    return Ok(env);
                }
                searched.push(format!(
                    "$PATH: {} did not answer --version",
                    path.display()
                ));
            }
            Err(_) => searched.push(format!("$PATH: {name} not found")),
        }
    }

    Err(PythonEnvError::NotFound { searched })
}

fn validate(path: &Path, source: ResolutionSource) -> PythonEnvResult<PythonEnv> {
    let output = Command::new(path)
        .arg("--version")
        .output()
        .map_err(|e| PythonEnvError::Unusable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if !output.status.success() {
        return Err(PythonEnvError::Unusable {
            path: path.to_path_buf(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    // `--version` lands on stdout for 3.4+, stderr for anything older.
    let raw = if output.stdout.is_empty() {
        &output.stderr
    } else {
        &output.stdout
    };
    let version = String::from_utf8_lossy(raw).trim().to_string();
    if !version_is_python3(&version) {
        return Err(PythonEnvError::Unusable {
            path: path.to_path_buf(),
            reason: format!("{version} is too old (need Python 3)"),
        });
    }
    Ok(PythonEnv {
        interpreter: path.to_path_buf(),
        version,
        source,
    })
}

fn version_is_python3(version: &str) -> bool {
    version
        .strip_prefix("Python ")
        .unwrap_or(version)
        .split('.')
        .next()
        .and_then(|major| major.trim().parse::<u32>().ok())
        .is_some_and(|major| major >= 3)
}

// ============================================================================
// Tooling probe
// ============================================================================

/// Names of required modules the interpreter cannot import. Empty means
/// the sandbox can run.
pub fn probe_tooling(env: &PythonEnv) -> PythonEnvResult<Vec<String>> {
    let mut missing = Vec::new();
    for module in REQUIRED_MODULES {
        let output = Command::new(env.interpreter())
            .args(["-c", &format!("import {module}")])
            .output()
            .map_err(|e| PythonEnvError::Unusable {
                path: env.interpreter().to_path_buf(),
                reason: e.to_string(),
            })?;
        if !output.status.success() {
            missing.push(module.to_string());
        }
    }
    Ok(missing)
}

/// Like [`probe_tooling`], but missing modules are an error.
pub fn require_tooling(env: &PythonEnv) -> PythonEnvResult<()> {
    let missing = probe_tooling(env)?;
    if missing.is_empty() {
        Ok(())
    } else {
        Err(PythonEnvError::ToolingMissing {
            path: env.interpreter().to_path_buf(),
            missing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python3_versions_are_accepted() {
        assert!(version_is_python3("Python 3.11.4"));
        assert!(version_is_python3("Python 3.9.0"));
        assert!(version_is_python3("3.12.0rc1"));
    }

    #[test]
    fn python2_and_garbage_are_rejected() {
        assert!(!version_is_python3("Python 2.7.18"));
        assert!(!version_is_python3(""));
        assert!(!version_is_python3("not a version"));
    }

    #[test]
    fn not_found_error_includes_trace_and_remediation() {
        let error = PythonEnvError::NotFound {
            searched: vec![
                "--python flag: not given".to_string(),
                "$PATH: python3 not found".to_string(),
            ],
        };
        let msg = error.to_string();
        assert!(msg.contains("no Python interpreter found"));
        assert!(msg.contains("1. --python flag: not given"));
        assert!(msg.contains("2. $PATH: python3 not found"));
        assert!(msg.contains("Remediation:"));
        assert!(msg.contains("COVSMITH_PYTHON"));
    }

    #[test]
    fn tooling_missing_error_names_the_pip_command() {
        let error = PythonEnvError::ToolingMissing {
            path: PathBuf::from("/usr/bin/python3"),
            missing: vec!["pytest".to_string(), "coverage".to_string()],
        };
        let msg = error.to_string();
        assert!(msg.contains("pytest and coverage not importable"));
        assert!(msg.contains("/usr/bin/python3 -m pip install pytest coverage"));
    }

    #[test]
    fn resolution_source_display() {
        assert_eq!(ResolutionSource::CliFlag.to_string(), "--python flag");
        assert_eq!(ResolutionSource::EnvVar.to_string(), "$COVSMITH_PYTHON");
        assert_eq!(ResolutionSource::VirtualEnv.to_string(), "$VIRTUAL_ENV");
        assert_eq!(ResolutionSource::Path.to_string(), "$PATH");
    }

    // Integration tests below actually run an interpreter; they are
    // no-ops on machines without one.

    #[test]
    fn explicit_path_resolves_when_python_exists() {
        if let Ok(python) = which::which("python3") {
            let env = resolve_python(Some(&python)).unwrap();
            assert_eq!(env.source, ResolutionSource::CliFlag);
            assert!(env.version.contains('3'));
        }
    }

    #[test]
    fn explicit_path_failure_does_not_fall_through() {
        let bogus = Path::new("/definitely/not/a/python");
        let result = resolve_python(Some(bogus));
        assert!(matches!(result, Err(PythonEnvError::Unusable { .. })));
    }

    #[test]
    fn tooling_probe_reports_importability() {
        if let Ok(python) = which::which("python3") {
            if let Ok(env) = resolve_python(Some(&python)) {
                // Either answer is fine; the probe itself must not error.
                let missing = probe_tooling(&env).unwrap();
                for name in &missing {
                    assert!(REQUIRED_MODULES.contains(&name.as_str()));
                }
            }
        }
    }
}
