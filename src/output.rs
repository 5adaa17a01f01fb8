//! JSON output types and serialization for CLI and HTTP responses.
//!
//! Every caller-visible payload goes through this module, so the CLI and the
//! HTTP service emit byte-identical envelopes for the same result.
//!
//! Design principles:
//! 1. **Always JSON:** all output is valid JSON (no mixed text/JSON)
//! 2. **Status first:** every response has `status` as its first field
//! 3. **Deterministic:** same input -> same output (field order, array ordering)
//! 4. **Absent over null:** optional fields are skipped when empty, not nulled
//! 5. **Versioned:** `schema_version` in every response enables forward
//!    compatibility

use std::io::{self, Write};

use serde::Serialize;

use crate::advisor::{AdvisorStatus, CodeReview, CoverageReview};
use crate::analyzer::AnalysisResult;
use crate::error::{CovsmithError, OutputErrorCode};
use crate::pyenv::PythonEnv;
use crate::refine::{CoverageReport, RefineOutcome, RoundReport};

/// Current schema version for all responses.
pub const SCHEMA_VERSION: &str = "1";

// ============================================================================
// Generate Response
// ============================================================================

/// Response for test generation: the suite, its explanation trail, and the
/// coverage the refinement loop ended on.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    /// Status: "ok".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    /// Content digest of the analyzed source (`src_` + 16 hex chars).
    pub source_digest: String,
    /// The generated pytest source.
    pub test_code: String,
    /// Explanation trail, one clause per refinement round.
    pub explanation: String,
    /// Number of test functions in the suite.
    pub test_count: usize,
    /// Refinement rounds performed (0 when the first measurement sufficed).
    pub rounds: u32,
    /// Per-round targets and coverage movement.
    pub round_reports: Vec<RoundReport>,
    /// Final measured coverage; absent when measurement was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_estimate: Option<f64>,
    /// Line numbers the final measurement left unexecuted.
    pub missing_lines: Vec<u32>,
    /// Set when coverage measurement failed and the loop degraded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_error: Option<String>,
}

impl GenerateResponse {
    /// Build from a finished refinement outcome.
    pub fn from_outcome(source_digest: impl Into<String>, outcome: &RefineOutcome) -> Self {
        GenerateResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            source_digest: source_digest.into(),
            test_code: outcome.suite.code.clone(),
            explanation: outcome.suite.explanation.clone(),
            test_count: outcome.suite.test_count,
            rounds: outcome.rounds.len() as u32,
            round_reports: outcome.rounds.clone(),
            coverage_estimate: outcome.suite.coverage_percent,
            missing_lines: outcome.suite.missing_lines.clone(),
            coverage_error: outcome.coverage_error.clone(),
        }
    }
}

// ============================================================================
// Coverage Run Response
// ============================================================================

/// Response for a standalone coverage measurement of caller-provided tests.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageRunResponse {
    /// Status: "ok".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    /// Line coverage percentage, 0.0 on a degraded run.
    pub coverage_percent: f64,
    /// Line numbers left unexecuted, ascending.
    pub missing_lines: Vec<u32>,
    /// Set when the run degraded instead of producing a report.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The coverage.py JSON report, when one was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_report: Option<serde_json::Value>,
    /// Advisory commentary on the measurement; absent when the advisor
    /// is off, the run degraded, or the review call failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<CoverageReview>,
}

impl CoverageRunResponse {
    /// Build from a coverage report, degraded or not.
    pub fn from_report(report: &CoverageReport) -> Self {
        CoverageRunResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            coverage_percent: report.percent,
            missing_lines: report.missing_lines.clone(),
            error: report.error.clone(),
            raw_report: report.raw_report.clone(),
            review: None,
        }
    }

    /// Attach advisory commentary to the measurement.
    pub fn with_review(mut self, review: Option<CoverageReview>) -> Self {
        self.review = review;
        self
    }
}

// ============================================================================
// Analyze Response
// ============================================================================

/// Response for structural analysis, with optional advisory commentary.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    /// Status: "ok".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    /// Content digest of the analyzed source.
    pub source_digest: String,
    pub function_count: usize,
    pub class_count: usize,
    /// The structural model the generator works from.
    pub analysis: AnalysisResult,
    /// Advisory quality review; absent when the advisor is off or failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<CodeReview>,
}

impl AnalyzeResponse {
    pub fn new(
        source_digest: impl Into<String>,
        analysis: AnalysisResult,
        review: Option<CodeReview>,
    ) -> Self {
        AnalyzeResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            source_digest: source_digest.into(),
            function_count: analysis.functions.len(),
            class_count: analysis.classes.len(),
            analysis,
            review,
        }
    }
}

// ============================================================================
// Health Response
// ============================================================================

/// Response for `GET /health` and `covsmith advisor-status`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Status: "ok".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    pub service: String,
    /// Advisor configuration state (never the key).
    pub advisor: AdvisorStatus,
    /// The resolved Python interpreter, when one was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python: Option<PythonEnv>,
}

impl HealthResponse {
    pub fn new(advisor: AdvisorStatus, python: Option<PythonEnv>) -> Self {
        HealthResponse {
            status: "ok".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            service: "covsmith".to_string(),
            advisor,
            python,
        }
    }
}

// ============================================================================
// Error Response
// ============================================================================

/// Error information for error responses.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorInfo {
    /// Numeric error code, also the CLI exit code.
    pub code: u8,
    /// Stable machine-readable name for the code.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Error-specific structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorInfo {
    /// Create from a CovsmithError.
    pub fn from_error(err: &CovsmithError) -> Self {
        let code = err.error_code();
        let details = match err {
            CovsmithError::InvalidArguments { details, .. } => details.clone(),
            _ => None,
        };
        ErrorInfo {
            code: code.code(),
            name: code.name().to_string(),
            message: err.to_string(),
            details,
        }
    }
}

/// Error response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Status: "error".
    pub status: String,
    /// Schema version for compatibility.
    pub schema_version: String,
    /// Error information.
    pub error: ErrorInfo,
}

impl ErrorResponse {
    /// Create an error response from a CovsmithError.
    pub fn from_error(err: &CovsmithError) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            error: ErrorInfo::from_error(err),
        }
    }

    /// Create an error response with just a code and message.
    pub fn new(code: OutputErrorCode, message: impl Into<String>) -> Self {
        ErrorResponse {
            status: "error".to_string(),
            schema_version: SCHEMA_VERSION.to_string(),
            error: ErrorInfo {
                code: code.code(),
                name: code.name().to_string(),
                message: message.into(),
                details: None,
            },
        }
    }
}

// ============================================================================
// Response Emission
// ============================================================================

/// Emit a response as pretty-printed JSON to a writer.
///
/// This is the single output path for both CLI and HTTP, ensuring consistency.
/// The output is deterministic: same input produces identical bytes.
pub fn emit_response<T: Serialize>(response: &T, writer: &mut impl Write) -> io::Result<()> {
    let json = serde_json::to_string_pretty(response)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}

/// Emit a response as compact JSON (single line) to a writer.
pub fn emit_response_compact<T: Serialize>(
    response: &T,
    writer: &mut impl Write,
) -> io::Result<()> {
    let json =
        serde_json::to_string(response).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{}", json)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::compose::compose_suite;
    use crate::digest::source_digest;
    use crate::refine::{generate_with_coverage, RefineConfig};

    const SOURCE: &str = "def add(a, b):\n    return a + b\n";

    fn sample_outcome() -> RefineOutcome {
        let (_, outcome) = generate_with_coverage(SOURCE, None, None, &RefineConfig::default());
        outcome
    }

    mod generate_response_tests {
        use super::*;

        #[test]
        fn status_and_version_lead_the_envelope() {
            let response = GenerateResponse::from_outcome(source_digest(SOURCE), &sample_outcome());
            let json = serde_json::to_string(&response).unwrap();
            assert!(json.starts_with("{\"status\":\"ok\",\"schema_version\":\"1\""));
        }

        #[test]
        fn unmeasured_outcome_omits_coverage_fields() {
            let response = GenerateResponse::from_outcome(source_digest(SOURCE), &sample_outcome());
            let json = serde_json::to_string(&response).unwrap();
            assert!(!json.contains("coverage_estimate"));
            assert!(!json.contains("coverage_error"));
            assert_eq!(response.rounds, 0);
        }

        #[test]
        fn digest_and_suite_carry_through() {
            let digest = source_digest(SOURCE);
            let response = GenerateResponse::from_outcome(digest.clone(), &sample_outcome());
            assert_eq!(response.source_digest, digest);
            assert!(response.test_code.contains("def test_add"));
            assert!(response.test_count >= 1);
        }
    }

    mod coverage_response_tests {
        use super::*;

        #[test]
        fn degraded_report_keeps_its_error() {
            let report = CoverageReport::failed("python interpreter not found".to_string());
            let response = CoverageRunResponse::from_report(&report);
            assert_eq!(response.coverage_percent, 0.0);
            assert!(response.missing_lines.is_empty());
            assert_eq!(
                response.error.as_deref(),
                Some("python interpreter not found")
            );
        }

        #[test]
        fn clean_report_omits_error_field() {
            let report = CoverageReport {
                percent: 87.5,
                missing_lines: vec![4, 9],
                raw_report: None,
                error: None,
            };
            let json = serde_json::to_string(&CoverageRunResponse::from_report(&report)).unwrap();
            assert!(!json.contains("\"error\""));
            assert!(!json.contains("raw_report"));
            assert!(!json.contains("\"review\""));
            assert!(json.contains("\"coverage_percent\":87.5"));
            assert!(json.contains("\"missing_lines\":[4,9]"));
        }

        #[test]
        fn attached_review_is_serialized() {
            let report = CoverageReport {
                percent: 62.0,
                missing_lines: vec![7],
                raw_report: None,
                error: None,
            };
            let review = CoverageReview {
                coverage_assessment: "thin on error paths".to_string(),
                missing_scenarios: vec!["empty input".to_string()],
                improvement_suggestions: Vec::new(),
                priority_areas: Vec::new(),
            };
            let response = CoverageRunResponse::from_report(&report).with_review(Some(review));
            let json = serde_json::to_string(&response).unwrap();
            assert!(json.contains("\"coverage_assessment\":\"thin on error paths\""));
            assert!(json.contains("\"missing_scenarios\":[\"empty input\"]"));
        }
    }

    mod analyze_response_tests {
        use super::*;

        #[test]
        fn counts_mirror_the_model() {
            let analysis = analyze(
                "class Cart:\n    def add(self, price):\n        return price\n\ndef free(x):\n    return x\n",
            );
            let response = AnalyzeResponse::new(source_digest(SOURCE), analysis, None);
            assert_eq!(response.function_count, 2);
            assert_eq!(response.class_count, 1);
            let json = serde_json::to_string(&response).unwrap();
            assert!(!json.contains("\"review\""));
        }

        #[test]
        fn review_is_embedded_when_present() {
            let review = CodeReview {
                complexity_score: 4,
                testability_score: 8,
                issues: vec![],
                strengths: vec!["small functions".to_string()],
                test_recommendations: vec![],
            };
            let response =
                AnalyzeResponse::new(source_digest(SOURCE), analyze(SOURCE), Some(review));
            let json = serde_json::to_string(&response).unwrap();
            assert!(json.contains("\"testability_score\":8"));
        }
    }

    mod error_response_tests {
        use super::*;

        #[test]
        fn envelope_carries_code_name_and_message() {
            let err = CovsmithError::invalid_args("unknown flag");
            let response = ErrorResponse::from_error(&err);
            let json = serde_json::to_string(&response).unwrap();
            let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed["status"], "error");
            assert_eq!(parsed["error"]["code"], 2);
            assert_eq!(parsed["error"]["name"], "invalid_arguments");
            assert!(parsed["error"]["message"]
                .as_str()
                .unwrap()
                .contains("unknown flag"));
        }

        #[test]
        fn details_pass_through_for_invalid_arguments() {
            let err = CovsmithError::invalid_args_with_details(
                "bad rounds value",
                serde_json::json!({"field": "rounds", "given": -1}),
            );
            let response = ErrorResponse::from_error(&err);
            let parsed = serde_json::to_value(&response).unwrap();
            assert_eq!(parsed["error"]["details"]["field"], "rounds");
        }

        #[test]
        fn bare_constructor_matches_from_error_shape() {
            let response = ErrorResponse::new(OutputErrorCode::Internal, "boom");
            let parsed = serde_json::to_value(&response).unwrap();
            assert_eq!(parsed["error"]["code"], 10);
            assert_eq!(parsed["error"]["name"], "internal");
            assert!(parsed["error"].get("details").is_none());
        }
    }

    mod health_response_tests {
        use super::*;
        use crate::advisor::AdvisorStatus;

        #[test]
        fn unconfigured_health_omits_python() {
            let response = HealthResponse::new(AdvisorStatus::from_config(None), None);
            let json = serde_json::to_string(&response).unwrap();
            assert!(json.contains("\"service\":\"covsmith\""));
            assert!(json.contains("\"configured\":false"));
            assert!(!json.contains("\"python\""));
        }
    }

    mod emit_tests {
        use super::*;

        #[test]
        fn emit_response_produces_valid_json() {
            let suite = compose_suite(&analyze(SOURCE));
            let mut output = Vec::new();
            emit_response(&suite, &mut output).unwrap();
            let json_str = String::from_utf8(output).unwrap();
            let _parsed: serde_json::Value = serde_json::from_str(&json_str).unwrap();
        }

        #[test]
        fn emit_response_is_deterministic() {
            let response = GenerateResponse::from_outcome(source_digest(SOURCE), &sample_outcome());
            let mut output1 = Vec::new();
            let mut output2 = Vec::new();
            emit_response(&response, &mut output1).unwrap();
            emit_response(&response, &mut output2).unwrap();
            assert_eq!(output1, output2, "emit_response must be deterministic");
        }

        #[test]
        fn compact_emission_is_a_single_line() {
            let response = HealthResponse::new(AdvisorStatus::from_config(None), None);
            let mut output = Vec::new();
            emit_response_compact(&response, &mut output).unwrap();
            let text = String::from_utf8(output).unwrap();
            assert_eq!(text.trim_end().lines().count(), 1);
        }
    }
}
