//! CLI front door.
//!
//! Every command prints exactly one JSON envelope to stdout and logs to
//! stderr, so output is parseable by both humans and agents. Errors are
//! emitted as the same [`ErrorResponse`] envelope the HTTP service
//! returns, and the process exit code is the envelope's error code.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::warn;

use crate::advisor::{Advisor, AdvisorError, AdvisorStatus, CodeReview};
use crate::analyzer;
use crate::compose::GeneratedSuite;
use crate::digest::source_digest;
use crate::error::{CovsmithError, CovsmithResult, OutputErrorCode};
use crate::output::{
    emit_response, emit_response_compact, AnalyzeResponse, CoverageRunResponse, ErrorResponse,
    GenerateResponse, HealthResponse,
};
use crate::pipeline::{self, GenerateOptions};
use crate::pyenv::{self, PythonEnv};
use crate::refine::{DEFAULT_COVERAGE_TARGET, DEFAULT_MAX_ROUNDS};
use crate::sandbox::{CoverageSandbox, DEFAULT_RUN_TIMEOUT};
use crate::server::{self, AppState};

/// Log filter override, e.g. `COVSMITH_LOG=covsmith=debug`.
pub const LOG_ENV_VAR: &str = "COVSMITH_LOG";

// ============================================================================
// CLI Structure
// ============================================================================

/// Coverage-guided pytest suite synthesis for Python sources.
///
/// All output is JSON for easy parsing by humans, scripts, and agents.
#[derive(Parser, Debug)]
#[command(name = "covsmith", version, about = "Coverage-guided pytest suite synthesis")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

/// Global arguments shared by all subcommands.
#[derive(Parser, Debug)]
struct GlobalArgs {
    /// Log level for tracing output.
    #[arg(long, global = true, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Emit single-line JSON instead of pretty-printed.
    #[arg(long, global = true)]
    compact: bool,
}

/// Log level for tracing output.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn to_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a pytest suite for a Python source file.
    Generate(GenerateArgs),
    /// Measure line coverage of an existing test file.
    Coverage(CoverageArgs),
    /// Print the structural model of a Python source file.
    Analyze(AnalyzeArgs),
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Report advisor configuration state.
    AdvisorStatus,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    /// Python source file to generate tests for.
    #[arg(long)]
    file: PathBuf,

    /// Skip coverage measurement; emit the composed suite as-is.
    #[arg(long)]
    no_measure: bool,

    /// Draft the initial suite with the configured advisor.
    #[arg(long)]
    advisor: bool,

    /// Coverage percentage that stops refinement.
    #[arg(long, default_value_t = DEFAULT_COVERAGE_TARGET)]
    target: f64,

    /// Maximum refinement rounds after the initial measurement.
    #[arg(long, default_value_t = DEFAULT_MAX_ROUNDS)]
    rounds: u32,

    /// Per-run sandbox timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_RUN_TIMEOUT.as_secs())]
    timeout: u64,

    /// Explicit Python interpreter for measurement.
    #[arg(long, conflicts_with = "no_measure")]
    python: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CoverageArgs {
    /// Python source file under test.
    #[arg(long)]
    source: PathBuf,

    /// Pytest file to run against it.
    #[arg(long)]
    tests: PathBuf,

    /// Per-run sandbox timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_RUN_TIMEOUT.as_secs())]
    timeout: u64,

    /// Explicit Python interpreter.
    #[arg(long)]
    python: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Python source file to analyze.
    #[arg(long)]
    file: PathBuf,

    /// Ask the configured advisor for a quality review.
    #[arg(long)]
    advisor: bool,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1:8000")]
    addr: SocketAddr,
}

// ============================================================================
// Entry Point
// ============================================================================

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.log_level);
    let compact = cli.global.compact;

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = OutputErrorCode::from(&err);
            // Errors are still JSON on stdout; stderr is for logs only.
            let _ = emit_stdout(&ErrorResponse::from_error(&err), compact);
            ExitCode::from(code.code())
        }
    }
}

fn init_tracing(level: LogLevel) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(level.to_tracing_level().to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn execute(cli: Cli) -> CovsmithResult<()> {
    let compact = cli.global.compact;
    match cli.command {
        Command::Generate(args) => execute_generate(args, compact),
        Command::Coverage(args) => execute_coverage(args, compact),
        Command::Analyze(args) => execute_analyze(args, compact),
        Command::Serve(args) => execute_serve(args),
        Command::AdvisorStatus => execute_advisor_status(compact),
    }
}

// ============================================================================
// Command Executors
// ============================================================================

fn execute_generate(args: GenerateArgs, compact: bool) -> CovsmithResult<()> {
    let options = build_options(&args)?;
    let source = read_source(&args.file)?;

    let python = if options.measure {
        resolve_measurement_python(args.python.as_deref())?
    } else {
        None
    };

    let seed = if args.advisor {
        draft_with_advisor(&source)?
    } else {
        None
    };

    let digest = source_digest(&source);
    let file_name = file_name_of(&args.file);
    let (_, outcome) = pipeline::run_generation(
        &source,
        file_name.as_deref(),
        None,
        seed,
        python.as_ref(),
        &options,
    );

    emit_stdout(&GenerateResponse::from_outcome(digest, &outcome), compact)
}

fn execute_coverage(args: CoverageArgs, compact: bool) -> CovsmithResult<()> {
    if args.timeout == 0 {
        return Err(CovsmithError::invalid_args("--timeout must be at least 1 second"));
    }
    let source = read_source(&args.source)?;
    let tests = read_source(&args.tests)?;

    // Measuring is the whole point here, so a missing interpreter is a
    // hard error rather than a degraded report.
    let python = pyenv::resolve_python(args.python.as_deref())?;
    pyenv::require_tooling(&python)?;

    let mut sandbox =
        CoverageSandbox::new(python).with_timeout(Duration::from_secs(args.timeout));
    if let Some(name) = file_name_of(&args.source) {
        sandbox = sandbox.for_file(&name);
    }
    let report = sandbox.measure_coverage(&source, &tests)?;

    emit_stdout(&CoverageRunResponse::from_report(&report), compact)
}

fn execute_analyze(args: AnalyzeArgs, compact: bool) -> CovsmithResult<()> {
    let source = read_source(&args.file)?;
    let analysis = analyzer::analyze(&source);

    let review = if args.advisor {
        review_with_advisor(&source)?
    } else {
        None
    };

    emit_stdout(
        &AnalyzeResponse::new(source_digest(&source), analysis, review),
        compact,
    )
}

fn execute_serve(args: ServeArgs) -> CovsmithResult<()> {
    let python = match pyenv::resolve_python(None) {
        Ok(env) => Some(env),
        Err(error) => {
            warn!("serving without coverage measurement: {error}");
            None
        }
    };
    let advisor = Advisor::from_env();
    let state = AppState::new(GenerateOptions::default(), python, advisor);
    runtime()?.block_on(server::serve(args.addr, state))
}

fn execute_advisor_status(compact: bool) -> CovsmithResult<()> {
    let status = match Advisor::from_env() {
        Some(advisor) => advisor.status(),
        None => AdvisorStatus::from_config(None),
    };
    // Configuration state only; no network round trip.
    emit_stdout(&HealthResponse::new(status, None), compact)
}

// ============================================================================
// Helpers
// ============================================================================

fn build_options(args: &GenerateArgs) -> CovsmithResult<GenerateOptions> {
    if !(0.0..=100.0).contains(&args.target) {
        return Err(CovsmithError::invalid_args(format!(
            "--target must be between 0 and 100, got {}",
            args.target
        )));
    }
    if args.timeout == 0 {
        return Err(CovsmithError::invalid_args("--timeout must be at least 1 second"));
    }
    Ok(GenerateOptions {
        coverage_target: args.target,
        max_rounds: args.rounds,
        measure: !args.no_measure,
        timeout: Duration::from_secs(args.timeout),
    })
}

/// Resolve an interpreter for `generate`. An explicit `--python` that
/// fails is an error; a failed ambient search degrades to an unmeasured
/// suite.
fn resolve_measurement_python(explicit: Option<&Path>) -> CovsmithResult<Option<PythonEnv>> {
    match pyenv::resolve_python(explicit) {
        Ok(env) => match pyenv::require_tooling(&env) {
            Ok(()) => Ok(Some(env)),
            Err(err) if explicit.is_some() => Err(err.into()),
            Err(err) => {
                warn!("proceeding without coverage measurement: {err}");
                Ok(None)
            }
        },
        Err(err) if explicit.is_some() => Err(err.into()),
        Err(err) => {
            warn!("proceeding without coverage measurement: {err}");
            Ok(None)
        }
    }
}

/// Draft the starting suite with the advisor. Asking for an advisor
/// that is not configured is an error; a configured advisor that fails
/// at runtime degrades to heuristic composition.
fn draft_with_advisor(source: &str) -> CovsmithResult<Option<GeneratedSuite>> {
    let advisor = Advisor::from_env().ok_or(AdvisorError::NotConfigured)?;
    match runtime()?.block_on(advisor.draft_suite(source)) {
        Ok(draft) => Ok(Some(pipeline::seed_from_draft(draft))),
        Err(error) => {
            warn!(%error, "advisor draft failed; composing heuristically");
            Ok(None)
        }
    }
}

fn review_with_advisor(source: &str) -> CovsmithResult<Option<CodeReview>> {
    let advisor = Advisor::from_env().ok_or(AdvisorError::NotConfigured)?;
    match runtime()?.block_on(advisor.review_code(source)) {
        Ok(review) => Ok(Some(review)),
        Err(error) => {
            warn!(%error, "advisor review failed; reporting structure only");
            Ok(None)
        }
    }
}

fn read_source(path: &Path) -> CovsmithResult<String> {
    std::fs::read_to_string(path).map_err(|err| {
        CovsmithError::invalid_args(format!("cannot read {}: {err}", path.display()))
    })
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

fn runtime() -> CovsmithResult<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Runtime::new()?)
}

fn emit_stdout<T: Serialize>(response: &T, compact: bool) -> CovsmithResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if compact {
        emit_response_compact(response, &mut handle)?;
    } else {
        emit_response(response, &mut handle)?;
    }
    handle.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(args)
    }

    mod parsing_tests {
        use super::*;

        #[test]
        fn generate_uses_documented_defaults() {
            let cli = parse(&["covsmith", "generate", "--file", "calc.py"]).unwrap();
            let Command::Generate(args) = cli.command else {
                panic!("expected generate");
            };
            assert_eq!(args.target, DEFAULT_COVERAGE_TARGET);
            assert_eq!(args.rounds, DEFAULT_MAX_ROUNDS);
            assert_eq!(args.timeout, DEFAULT_RUN_TIMEOUT.as_secs());
            assert!(!args.no_measure);
            assert!(!args.advisor);
            assert!(args.python.is_none());
        }

        #[test]
        fn generate_accepts_every_knob() {
            let cli = parse(&[
                "covsmith", "generate", "--file", "calc.py", "--advisor", "--target", "75.5",
                "--rounds", "1", "--timeout", "5", "--python", "/usr/bin/python3",
            ])
            .unwrap();
            let Command::Generate(args) = cli.command else {
                panic!("expected generate");
            };
            assert!(args.advisor);
            assert_eq!(args.target, 75.5);
            assert_eq!(args.rounds, 1);
            assert_eq!(args.timeout, 5);
            assert_eq!(args.python, Some(PathBuf::from("/usr/bin/python3")));
        }

        #[test]
        fn no_measure_conflicts_with_an_explicit_interpreter() {
            let result = parse(&[
                "covsmith",
                "generate",
                "--file",
                "calc.py",
                "--no-measure",
                "--python",
                "/usr/bin/python3",
            ]);
            assert!(result.is_err());
        }

        #[test]
        fn coverage_requires_both_files() {
            assert!(parse(&["covsmith", "coverage", "--source", "calc.py"]).is_err());
            assert!(parse(&["covsmith", "coverage", "--tests", "test_calc.py"]).is_err());
            assert!(parse(&[
                "covsmith",
                "coverage",
                "--source",
                "calc.py",
                "--tests",
                "test_calc.py"
            ])
            .is_ok());
        }

        #[test]
        fn serve_binds_localhost_by_default() {
            let cli = parse(&["covsmith", "serve"]).unwrap();
            let Command::Serve(args) = cli.command else {
                panic!("expected serve");
            };
            assert_eq!(args.addr, "127.0.0.1:8000".parse().unwrap());
        }

        #[test]
        fn compact_is_a_global_flag() {
            let cli = parse(&["covsmith", "analyze", "--file", "x.py", "--compact"]).unwrap();
            assert!(cli.global.compact);
        }

        #[test]
        fn advisor_status_takes_no_arguments() {
            let cli = parse(&["covsmith", "advisor-status"]).unwrap();
            assert!(matches!(cli.command, Command::AdvisorStatus));
        }
    }

    mod option_tests {
        use super::*;

        fn generate_args(argv: &[&str]) -> GenerateArgs {
            let mut full = vec!["covsmith", "generate", "--file", "calc.py"];
            full.extend_from_slice(argv);
            match parse(&full).unwrap().command {
                Command::Generate(args) => args,
                other => panic!("expected generate, got {other:?}"),
            }
        }

        #[test]
        fn flags_map_onto_options() {
            let args = generate_args(&["--target", "80", "--rounds", "2", "--no-measure"]);
            let options = build_options(&args).unwrap();
            assert_eq!(options.coverage_target, 80.0);
            assert_eq!(options.max_rounds, 2);
            assert!(!options.measure);
        }

        #[test]
        fn out_of_range_target_is_invalid_arguments() {
            let args = generate_args(&["--target", "150"]);
            let err = build_options(&args).unwrap_err();
            assert_eq!(err.error_code(), OutputErrorCode::InvalidArguments);
        }

        #[test]
        fn zero_timeout_is_invalid_arguments() {
            let args = generate_args(&["--timeout", "0"]);
            let err = build_options(&args).unwrap_err();
            assert_eq!(err.error_code(), OutputErrorCode::InvalidArguments);
        }
    }

    mod file_tests {
        use super::*;

        #[test]
        fn missing_file_is_invalid_arguments() {
            let err = read_source(Path::new("/nonexistent/calc.py")).unwrap_err();
            assert_eq!(err.error_code(), OutputErrorCode::InvalidArguments);
            assert!(err.to_string().contains("/nonexistent/calc.py"));
        }

        #[test]
        fn read_source_returns_file_contents() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("calc.py");
            std::fs::write(&path, "def add(a, b):\n    return a + b\n").unwrap();
            let source = read_source(&path).unwrap();
            assert!(source.contains("def add"));
        }

        #[test]
        fn file_name_strips_directories() {
            assert_eq!(
                file_name_of(Path::new("pkg/nested/calc.py")),
                Some("calc.py".to_string())
            );
            assert_eq!(file_name_of(Path::new("/")), None);
        }
    }
}
