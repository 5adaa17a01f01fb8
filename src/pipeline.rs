//! End-to-end generation shared by the CLI and the HTTP service.
//!
//! Both front ends collect the same inputs (source text, an optional
//! file name, maybe a pre-drafted suite) and want the same output: an
//! analysis plus a refined suite. This module owns that wiring so the
//! two stay in lockstep.

use std::time::Duration;

use crate::analyzer::AnalysisResult;
use crate::compose::GeneratedSuite;
use crate::pyenv::PythonEnv;
use crate::refine::{self, CoverageProbe, RefineConfig, RefineOutcome};
use crate::sandbox::{CoverageSandbox, DEFAULT_RUN_TIMEOUT};

/// Knobs shared by `covsmith generate` and `POST /generate-tests`.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Stop refining once line coverage reaches this percentage.
    pub coverage_target: f64,
    /// Upper bound on targeted refinement rounds.
    pub max_rounds: u32,
    /// Measure coverage at all; off means compose-only output.
    pub measure: bool,
    /// Wall-clock budget for each sandboxed pytest run.
    pub timeout: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        let refine = RefineConfig::default();
        GenerateOptions {
            coverage_target: refine.coverage_target,
            max_rounds: refine.max_rounds,
            measure: true,
            timeout: DEFAULT_RUN_TIMEOUT,
        }
    }
}

impl GenerateOptions {
    pub fn refine_config(&self) -> RefineConfig {
        RefineConfig {
            coverage_target: self.coverage_target,
            max_rounds: self.max_rounds,
        }
    }
}

/// Wrap an externally drafted test file so the refinement loop can
/// treat it as the starting suite.
pub fn seed_from_draft(code: String) -> GeneratedSuite {
    let test_count = code.matches("def test").count();
    GeneratedSuite {
        explanation: format!("advisor draft: {test_count} test(s)"),
        code,
        test_count,
        coverage_percent: None,
        missing_lines: Vec::new(),
    }
}

/// Run the whole pipeline over one Python source file.
///
/// `python` gates measurement: with no interpreter, or with `measure`
/// off, the suite ships straight after composition, unmeasured. A
/// non-Python `language` tag is accepted and noted in the explanation
/// rather than rejected.
pub fn run_generation(
    source: &str,
    file_name: Option<&str>,
    language: Option<&str>,
    seed: Option<GeneratedSuite>,
    python: Option<&PythonEnv>,
    options: &GenerateOptions,
) -> (AnalysisResult, RefineOutcome) {
    let sandbox = match python {
        Some(python) if options.measure => {
            let mut sandbox = CoverageSandbox::new(python.clone()).with_timeout(options.timeout);
            if let Some(name) = file_name {
                sandbox = sandbox.for_file(name);
            }
            Some(sandbox)
        }
        _ => None,
    };
    let probe = sandbox.as_ref().map(|s| s as &dyn CoverageProbe);
    let (analysis, mut outcome) =
        refine::generate_with_coverage(source, seed, probe, &options.refine_config());
    if let Some(tag) = language {
        if !tag.eq_ignore_ascii_case("python") {
            outcome.suite.explanation.push_str(&format!(
                " | language '{tag}' requested; tests are python/pytest"
            ));
        }
    }
    (analysis, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "def add(a, b):\n    return a + b\n";

    mod option_tests {
        use super::*;

        #[test]
        fn defaults_mirror_the_refine_defaults() {
            let options = GenerateOptions::default();
            let config = RefineConfig::default();
            assert_eq!(options.coverage_target, config.coverage_target);
            assert_eq!(options.max_rounds, config.max_rounds);
            assert!(options.measure);
            assert_eq!(options.timeout, DEFAULT_RUN_TIMEOUT);
        }

        #[test]
        fn refine_config_carries_the_tuned_values() {
            let options = GenerateOptions {
                coverage_target: 75.0,
                max_rounds: 1,
                ..GenerateOptions::default()
            };
            let config = options.refine_config();
            assert_eq!(config.coverage_target, 75.0);
            assert_eq!(config.max_rounds, 1);
        }
    }

    mod seed_tests {
        use super::*;

        #[test]
        fn draft_seed_counts_its_tests() {
            let draft = "import pytest\n\ndef test_a():\n    pass\n\ndef test_b():\n    pass\n";
            let seed = seed_from_draft(draft.to_string());
            assert_eq!(seed.test_count, 2);
            assert!(seed.explanation.contains("advisor draft"));
            assert!(seed.coverage_percent.is_none());
        }
    }

    mod run_tests {
        use super::*;
        use crate::refine::RefineState;

        #[test]
        fn no_interpreter_means_an_unmeasured_suite() {
            let options = GenerateOptions::default();
            let (analysis, outcome) =
                run_generation(SOURCE, Some("calc.py"), None, None, None, &options);
            assert_eq!(analysis.functions.len(), 1);
            assert!(outcome.suite.code.contains("def test_add"));
            assert!(outcome.suite.coverage_percent.is_none());
            assert_eq!(
                outcome.state_trace,
                vec![RefineState::Generated, RefineState::Done]
            );
            assert!(outcome.rounds.is_empty());
        }

        #[test]
        fn foreign_language_tag_lands_in_the_explanation() {
            let options = GenerateOptions::default();
            let (_, outcome) = run_generation(
                SOURCE,
                None,
                Some("javascript"),
                None,
                None,
                &options,
            );
            assert!(outcome.suite.explanation.contains("language 'javascript'"));
        }

        #[test]
        fn python_tag_is_not_worth_a_note() {
            let options = GenerateOptions::default();
            let (_, outcome) = run_generation(SOURCE, None, Some("Python"), None, None, &options);
            assert!(!outcome.suite.explanation.contains("language"));
        }

        #[test]
        fn seed_survives_an_unmeasured_run() {
            let options = GenerateOptions::default();
            let draft = "def test_add_drafted():\n    from source import add\n    assert add(1, 2) == 3\n";
            let seed = seed_from_draft(draft.to_string());
            let (_, outcome) = run_generation(SOURCE, None, None, Some(seed), None, &options);
            assert!(outcome.suite.code.starts_with("def test_add_drafted"));
            assert_eq!(outcome.suite.test_count, 1);
        }
    }
}
