//! Coverage-guided refinement loop.
//!
//! Suite generation is a feedback cycle, not a single shot. After the
//! first composition the suite is measured, and every function whose
//! lines the coverage report leaves unexecuted gets one targeted test
//! appended. The cycle is a small state machine:
//!
//! ```text
//! Generated -> Measured -> Targeted -> Measured -> ... -> Done
//! ```
//!
//! and stops at the coverage target, at an empty missing-line set, or
//! after a fixed number of targeted rounds. Measurement failures stop
//! the loop immediately; the suite composed so far is still returned.

use serde::Serialize;

use crate::analyzer::{AnalysisResult, ClassModel, FunctionModel};
use crate::compose::{self, GeneratedSuite};
use crate::heuristics::PyValue;
use crate::values;

/// Line-coverage percentage at which refinement stops.
pub const DEFAULT_COVERAGE_TARGET: f64 = 90.0;

/// Upper bound on targeted rounds after the initial measurement.
pub const DEFAULT_MAX_ROUNDS: u32 = 3;

/// Exceptions a type-violation probe is allowed to provoke. Anything
/// else escaping the call is a real failure and fails the test.
pub const VIOLATION_EXCEPTIONS: &str = "(TypeError, ValueError)";

// ============================================================================
// Measurement seam
// ============================================================================

/// One measurement of a test suite against its source module.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    /// Overall line coverage, `0.0..=100.0`.
    pub percent: f64,
    /// 1-based source lines no test executed.
    pub missing_lines: Vec<u32>,
    /// Tool-native report, passed through for API consumers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_report: Option<serde_json::Value>,
    /// Set when measurement itself failed (interpreter missing, run
    /// timed out). `percent` and `missing_lines` are meaningless then.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CoverageReport {
    pub fn failed(error: String) -> CoverageReport {
        CoverageReport {
            percent: 0.0,
            missing_lines: Vec::new(),
            raw_report: None,
            error: Some(error),
        }
    }
}

/// Anything that can run a suite and report line coverage. The sandbox
/// implements this; tests substitute scripted reports.
pub trait CoverageProbe {
    fn measure(&self, source: &str, tests: &str) -> CoverageReport;
}

// ============================================================================
// Loop state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefineState {
    /// Initial suite composed, not yet measured.
    Generated,
    /// A coverage report is in hand.
    Measured,
    /// Targeted tests were appended; the next measurement decides.
    Targeted,
    /// Terminal: target reached, nothing left to target, rounds
    /// exhausted, or measurement failed.
    Done,
}

#[derive(Debug, Clone, Copy)]
pub struct RefineConfig {
    pub coverage_target: f64,
    pub max_rounds: u32,
}

impl Default for RefineConfig {
    fn default() -> Self {
        RefineConfig {
            coverage_target: DEFAULT_COVERAGE_TARGET,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

/// What one targeted round did.
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    /// 1-based round number.
    pub round: u32,
    /// Functions the round targeted.
    pub targets: Vec<String>,
    pub tests_added: usize,
    pub coverage_before: f64,
    /// Coverage after the round's tests ran. Equals `coverage_before`
    /// when the follow-up measurement failed.
    pub coverage_after: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefineOutcome {
    pub suite: GeneratedSuite,
    pub rounds: Vec<RoundReport>,
    /// Every state the loop passed through, in order.
    pub state_trace: Vec<RefineState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_error: Option<String>,
}

// ============================================================================
// The loop
// ============================================================================

/// Measure `suite` and append targeted tests until the configured
/// coverage target is met, the report stops naming missing lines, or
/// `max_rounds` targeted rounds have run.
pub fn refine_suite(
    source: &str,
    analysis: &AnalysisResult,
    mut suite: GeneratedSuite,
    probe: &dyn CoverageProbe,
    config: &RefineConfig,
) -> RefineOutcome {
    let mut trace = vec![RefineState::Generated];
    let mut rounds: Vec<RoundReport> = Vec::new();
    let mut coverage_error = None;
    let mut round = 0u32;

    loop {
        let report = probe.measure(source, &suite.code);
        trace.push(RefineState::Measured);

        if let Some(error) = report.error {
            coverage_error = Some(error);
            trace.push(RefineState::Done);
            break;
        }

        suite.coverage_percent = Some(report.percent);
        suite.missing_lines = report.missing_lines.clone();
        if let Some(last) = rounds.last_mut() {
            last.coverage_after = report.percent;
        }

        if report.percent >= config.coverage_target
            || report.missing_lines.is_empty()
            || round >= config.max_rounds
        {
            trace.push(RefineState::Done);
            break;
        }

        let targets = select_targets(analysis, &report.missing_lines);
        if targets.is_empty() {
            // Missing lines fall outside every known function (module
            // top level, class bodies); nothing we can aim at.
            trace.push(RefineState::Done);
            break;
        }

        round += 1;
        let added = push_targeted_block(&mut suite, &targets, &analysis.classes, round);
        suite.explanation.push_str(&format!(
            " | round {round}: {added} targeted test(s) for {} uncovered function(s)",
            targets.len()
        ));
        rounds.push(RoundReport {
            round,
            targets: targets.iter().map(|f| f.name.clone()).collect(),
            tests_added: added,
            coverage_before: report.percent,
            coverage_after: report.percent,
        });
        trace.push(RefineState::Targeted);
    }

    RefineOutcome {
        suite,
        rounds,
        state_trace: trace,
        coverage_error,
    }
}

/// Compose a suite for `source` (or take a pre-drafted one) and refine
/// it when a probe is available. Without a probe the suite is returned
/// unmeasured.
pub fn generate_with_coverage(
    source: &str,
    seed: Option<GeneratedSuite>,
    probe: Option<&dyn CoverageProbe>,
    config: &RefineConfig,
) -> (AnalysisResult, RefineOutcome) {
    let analysis = crate::analyzer::analyze(source);
    let suite = seed.unwrap_or_else(|| compose::compose_suite(&analysis));
    match probe {
        Some(probe) => {
            let outcome = refine_suite(source, &analysis, suite, probe, config);
            (analysis, outcome)
        }
        None => (
            analysis,
            RefineOutcome {
                suite,
                rounds: Vec::new(),
                state_trace: vec![RefineState::Generated, RefineState::Done],
                coverage_error: None,
            },
        ),
    }
}

/// Functions whose source span overlaps any reported missing line.
pub fn select_targets<'a>(
    analysis: &'a AnalysisResult,
    missing: &[u32],
) -> Vec<&'a FunctionModel> {
    analysis
        .functions
        .iter()
        .filter(|func| func.overlaps_lines(missing))
        .collect()
}

// ============================================================================
// Target classification
// ============================================================================

/// What kind of environment an uncovered function needs before its
/// deeper branches can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Wants a real directory on disk.
    Directory,
    /// Wants a real file on disk.
    File,
    /// Consumes structured records; a populated literal reaches the
    /// key lookups.
    Dict,
    /// Plain computation, probed with samples and type violations.
    Generic,
}

pub fn classify_target(func: &FunctionModel) -> TargetKind {
    let lower: Vec<String> = func.args.iter().map(|a| a.to_lowercase()).collect();
    let dirish = lower.iter().any(|a| a.contains("dir") || a.contains("path"));
    let fileish = lower.iter().any(|a| a.contains("file"));
    if func.touches_dirs || (dirish && !fileish) || func.name.to_lowercase().contains("search") {
        TargetKind::Directory
    } else if func.touches_files || lower.iter().any(|a| a.contains("file") || a.contains("path"))
    {
        TargetKind::File
    } else if !func.dict_keys.is_empty() {
        TargetKind::Dict
    } else {
        TargetKind::Generic
    }
}

// ============================================================================
// Targeted test emission
// ============================================================================

fn push_targeted_block(
    suite: &mut GeneratedSuite,
    targets: &[&FunctionModel],
    classes: &[ClassModel],
    round: u32,
) -> usize {
    suite.code.push_str(&format!(
        "\n# Refinement round {round}: probe lines the previous run left unexecuted.\n"
    ));
    for func in targets {
        suite.code.push_str(&targeted_test(func, classes, round));
    }
    suite.test_count += targets.len();
    targets.len()
}

/// One targeted test for an uncovered function. The shape depends on
/// what the function appears to need; every shape tolerates failures in
/// the call itself so a stubborn target cannot break the whole suite.
pub fn targeted_test(func: &FunctionModel, classes: &[ClassModel], round: u32) -> String {
    let name = format!("test_{}_r{round}_targeted", compose::test_stem(func));
    let mut body = format!("\ndef {name}():\n");
    body.push_str(&compose::import_line(func));
    // A resource probe with no parameter to inject into degrades to a
    // plain call.
    let kind = if func.args.is_empty() {
        TargetKind::Generic
    } else {
        classify_target(func)
    };
    match kind {
        TargetKind::Directory => push_directory_probe(&mut body, func, classes),
        TargetKind::File => push_file_probe(&mut body, func, classes),
        TargetKind::Dict | TargetKind::Generic => push_call_probes(&mut body, func, classes),
    }
    body
}

fn push_directory_probe(body: &mut String, func: &FunctionModel, classes: &[ClassModel]) {
    body.push_str("    import tempfile, shutil\n");
    if let Some(class) = compose::owning_class_model(func, classes) {
        body.push_str(&compose::construction_block(class, classes, "    "));
    }
    body.push_str("    tmp_dir = tempfile.mkdtemp()\n");
    let args = substituted_args(
        func,
        classes,
        dir_arg_position(func),
        PyValue::Raw("tmp_dir".to_string()),
    );
    let call = compose::call_expr(func, &args);
    body.push_str("    try:\n");
    body.push_str(&format!("        {call}\n"));
    body.push_str("    except Exception:\n");
    body.push_str("        pass\n");
    body.push_str("    finally:\n");
    body.push_str("        shutil.rmtree(tmp_dir, ignore_errors=True)\n");
}

fn push_file_probe(body: &mut String, func: &FunctionModel, classes: &[ClassModel]) {
    body.push_str("    import os, tempfile\n");
    if let Some(class) = compose::owning_class_model(func, classes) {
        body.push_str(&compose::construction_block(class, classes, "    "));
    }
    body.push_str("    fd, tmp_path = tempfile.mkstemp(suffix='.json')\n");
    body.push_str("    os.close(fd)\n");
    body.push_str("    with open(tmp_path, 'w') as handle:\n");
    body.push_str("        handle.write('{\"key\": \"value\"}')\n");
    let args = substituted_args(
        func,
        classes,
        file_arg_position(func),
        PyValue::Raw("tmp_path".to_string()),
    );
    let call = compose::call_expr(func, &args);
    body.push_str("    try:\n");
    body.push_str(&format!("        {call}\n"));
    body.push_str("    except Exception:\n");
    body.push_str("        pass\n");
    body.push_str("    finally:\n");
    body.push_str("        os.unlink(tmp_path)\n");
}

fn push_call_probes(body: &mut String, func: &FunctionModel, classes: &[ClassModel]) {
    if let Some(class) = compose::owning_class_model(func, classes) {
        body.push_str(&compose::construction_block(class, classes, "    "));
    }
    let samples = values::sample_args(func, classes);
    body.push_str(&compose::swallowing_call(
        "    ",
        &compose::call_expr(func, &samples),
    ));
    if let Some(position) = numeric_arg_position(func) {
        for violation in values::violation_values() {
            let mut args = samples.clone();
            args[position] = violation;
            body.push_str(&compose::expecting_call(
                "    ",
                &compose::call_expr(func, &args),
                VIOLATION_EXCEPTIONS,
            ));
        }
    }
}

fn substituted_args(
    func: &FunctionModel,
    classes: &[ClassModel],
    position: usize,
    replacement: PyValue,
) -> Vec<PyValue> {
    let mut args = values::sample_args(func, classes);
    if position < args.len() {
        args[position] = replacement;
    }
    args
}

fn dir_arg_position(func: &FunctionModel) -> usize {
    func.args
        .iter()
        .position(|a| {
            let lower = a.to_lowercase();
            lower.contains("dir") || lower.contains("path")
        })
        .unwrap_or(0)
}

fn file_arg_position(func: &FunctionModel) -> usize {
    func.args
        .iter()
        .position(|a| {
            let lower = a.to_lowercase();
            lower.contains("file") || lower.contains("path")
        })
        .unwrap_or(0)
}

fn numeric_arg_position(func: &FunctionModel) -> Option<usize> {
    func.args
        .iter()
        .position(|a| func.param_type(a).is_numeric())
}
