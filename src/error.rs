//! Error types and error code constants for covsmith.
//!
//! `CovsmithError` is the single error type rendered to callers: every
//! subsystem error (interpreter discovery, the coverage sandbox, the advisory
//! client) bridges into it via `From`, and `OutputErrorCode` gives each class
//! a stable integer that doubles as the CLI exit code.
//!
//! Exit code mapping:
//! - `2`: invalid arguments (bad input from the caller)
//! - `3`: Python environment errors (no usable interpreter, missing tooling)
//! - `4`: sandbox errors (coverage run failed to stage or timed out)
//! - `5`: advisor errors (unconfigured or failed advisory round trip)
//! - `10`: internal errors (bugs, unexpected state)

use std::fmt;

use thiserror::Error;

use crate::advisor::AdvisorError;
use crate::pyenv::PythonEnvError;
use crate::sandbox::SandboxError;

// ============================================================================
// Output Error Codes
// ============================================================================

/// Error codes for JSON output.
///
/// These codes map to CLI exit codes and appear in JSON error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputErrorCode {
    /// Invalid arguments from caller (bad input, malformed request).
    InvalidArguments = 2,
    /// Python environment errors (interpreter discovery, missing tooling).
    PythonEnv = 3,
    /// Sandbox errors (coverage run could not be staged or completed).
    Sandbox = 4,
    /// Advisor errors (unconfigured, network failure, unusable response).
    Advisor = 5,
    /// Internal errors (bugs, unexpected state).
    Internal = 10,
}

impl OutputErrorCode {
    /// Get the numeric code value.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Stable machine-readable name used in the JSON error envelope.
    pub fn name(&self) -> &'static str {
        match self {
            OutputErrorCode::InvalidArguments => "invalid_arguments",
            OutputErrorCode::PythonEnv => "python_env",
            OutputErrorCode::Sandbox => "sandbox",
            OutputErrorCode::Advisor => "advisor",
            OutputErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for OutputErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Unified error type for CLI and HTTP output.
///
/// Subsystem errors are converted into this before being rendered as a JSON
/// envelope, so every caller-visible failure carries a code, a name, and a
/// message with enough context to act on.
#[derive(Debug, Error)]
pub enum CovsmithError {
    /// Invalid arguments from caller.
    #[error("invalid arguments: {message}")]
    InvalidArguments {
        message: String,
        details: Option<serde_json::Value>,
    },

    /// Python interpreter discovery or tooling validation failed.
    #[error("python environment error: {0}")]
    PythonEnv(#[from] PythonEnvError),

    /// The coverage sandbox failed to stage, run, or report.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// The advisory round trip failed.
    #[error("advisor error: {0}")]
    Advisor(#[from] AdvisorError),

    /// IO failure outside any subsystem (reading the input file, stdout).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failure while rendering output.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error (bug or unexpected state).
    #[error("internal error: {message}")]
    Internal { message: String },
}

pub type CovsmithResult<T> = Result<T, CovsmithError>;

// ============================================================================
// Error Code Mapping
// ============================================================================

impl From<&CovsmithError> for OutputErrorCode {
    fn from(err: &CovsmithError) -> Self {
        match err {
            CovsmithError::InvalidArguments { .. } => OutputErrorCode::InvalidArguments,
            CovsmithError::PythonEnv(_) => OutputErrorCode::PythonEnv,
            CovsmithError::Sandbox(_) => OutputErrorCode::Sandbox,
            CovsmithError::Advisor(_) => OutputErrorCode::Advisor,
            CovsmithError::Io(_) => OutputErrorCode::Internal,
            CovsmithError::Json(_) => OutputErrorCode::Internal,
            CovsmithError::Internal { .. } => OutputErrorCode::Internal,
        }
    }
}

impl From<CovsmithError> for OutputErrorCode {
    fn from(err: CovsmithError) -> Self {
        OutputErrorCode::from(&err)
    }
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl CovsmithError {
    /// Create an invalid arguments error.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        CovsmithError::InvalidArguments {
            message: message.into(),
            details: None,
        }
    }

    /// Create an invalid arguments error with JSON details.
    pub fn invalid_args_with_details(
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        CovsmithError::InvalidArguments {
            message: message.into(),
            details: Some(details),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        CovsmithError::Internal {
            message: message.into(),
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> OutputErrorCode {
        OutputErrorCode::from(self)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    mod error_code_mapping {
        use super::*;

        #[test]
        fn invalid_arguments_maps_to_code_2() {
            let err = CovsmithError::invalid_args("missing required field");
            assert_eq!(
                OutputErrorCode::from(&err),
                OutputErrorCode::InvalidArguments
            );
            assert_eq!(err.error_code().code(), 2);
        }

        #[test]
        fn python_env_maps_to_code_3() {
            let err = CovsmithError::from(PythonEnvError::Unusable {
                path: PathBuf::from("/usr/bin/python3"),
                reason: "permission denied".to_string(),
            });
            assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::PythonEnv);
            assert_eq!(err.error_code().code(), 3);
        }

        #[test]
        fn sandbox_maps_to_code_4() {
            let err = CovsmithError::from(SandboxError::Timeout {
                command: "coverage run".to_string(),
                timeout: Duration::from_secs(20),
            });
            assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::Sandbox);
            assert_eq!(err.error_code().code(), 4);
        }

        #[test]
        fn advisor_maps_to_code_5() {
            let err = CovsmithError::from(AdvisorError::NotConfigured);
            assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::Advisor);
            assert_eq!(err.error_code().code(), 5);
        }

        #[test]
        fn io_maps_to_internal() {
            let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
            let err = CovsmithError::from(io_err);
            assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::Internal);
            assert_eq!(err.error_code().code(), 10);
        }

        #[test]
        fn json_maps_to_internal() {
            let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
            let err = CovsmithError::from(json_err);
            assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::Internal);
        }

        #[test]
        fn internal_maps_to_code_10() {
            let err = CovsmithError::internal("unexpected state");
            assert_eq!(OutputErrorCode::from(&err), OutputErrorCode::Internal);
            assert_eq!(err.error_code().code(), 10);
        }
    }

    mod bridge_conversion {
        use super::*;

        #[test]
        fn python_env_error_converts_with_question_mark() {
            fn resolve() -> CovsmithResult<()> {
                let discovery: Result<(), PythonEnvError> = Err(PythonEnvError::NotFound {
                    searched: vec!["$PATH: python3 not found".to_string()],
                });
                discovery?;
                Ok(())
            }
            let err = resolve().unwrap_err();
            assert!(matches!(err, CovsmithError::PythonEnv(_)));
        }

        #[test]
        fn sandbox_error_keeps_its_message() {
            let err = CovsmithError::from(SandboxError::NoReport {
                reason: "No data to report.".to_string(),
            });
            let rendered = err.to_string();
            assert!(rendered.starts_with("sandbox error:"));
            assert!(rendered.contains("No data to report."));
        }

        #[test]
        fn advisor_error_keeps_its_message() {
            let err = CovsmithError::from(AdvisorError::Malformed {
                reason: "no JSON object in code review".to_string(),
            });
            let rendered = err.to_string();
            assert!(rendered.starts_with("advisor error:"));
            assert!(rendered.contains("no JSON object"));
        }
    }

    mod error_display {
        use super::*;

        #[test]
        fn invalid_arguments_display() {
            let err = CovsmithError::invalid_args("missing field");
            assert_eq!(err.to_string(), "invalid arguments: missing field");
        }

        #[test]
        fn internal_display() {
            let err = CovsmithError::internal("state machine desync");
            assert_eq!(err.to_string(), "internal error: state machine desync");
        }

        #[test]
        fn details_do_not_change_the_message() {
            let err = CovsmithError::invalid_args_with_details(
                "bad field",
                serde_json::json!({"field": "rounds"}),
            );
            assert_eq!(err.to_string(), "invalid arguments: bad field");
        }
    }

    mod output_error_code {
        use super::*;

        #[test]
        fn code_values_are_stable() {
            assert_eq!(OutputErrorCode::InvalidArguments.code(), 2);
            assert_eq!(OutputErrorCode::PythonEnv.code(), 3);
            assert_eq!(OutputErrorCode::Sandbox.code(), 4);
            assert_eq!(OutputErrorCode::Advisor.code(), 5);
            assert_eq!(OutputErrorCode::Internal.code(), 10);
        }

        #[test]
        fn names_are_stable() {
            assert_eq!(OutputErrorCode::InvalidArguments.name(), "invalid_arguments");
            assert_eq!(OutputErrorCode::PythonEnv.name(), "python_env");
            assert_eq!(OutputErrorCode::Sandbox.name(), "sandbox");
            assert_eq!(OutputErrorCode::Advisor.name(), "advisor");
            assert_eq!(OutputErrorCode::Internal.name(), "internal");
        }

        #[test]
        fn display_shows_code() {
            assert_eq!(format!("{}", OutputErrorCode::InvalidArguments), "2");
            assert_eq!(format!("{}", OutputErrorCode::PythonEnv), "3");
            assert_eq!(format!("{}", OutputErrorCode::Internal), "10");
        }
    }
}
