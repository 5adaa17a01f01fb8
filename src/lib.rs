//! covsmith: coverage-guided pytest suite synthesis
//!
//! Parses Python sources into a structural model, fabricates arguments
//! from parameter semantics, emits a runnable pytest suite with a
//! plain-text explanation, and (when an interpreter with pytest and
//! coverage is available) measures the suite in a sandbox and
//! strengthens it with targeted tests until line coverage reaches the
//! target or the round budget runs out.

// Structural analysis and suite synthesis
pub mod analyzer;
pub mod compose;
pub mod digest;
pub mod heuristics;
pub mod literals;
pub mod values;

// Measurement and refinement
pub mod pyenv;
pub mod refine;
pub mod sandbox;

// Output contract shared by every front door
pub mod error;
pub mod output;

// Optional LLM advisory layer
pub mod advisor;

// Front doors and the pipeline they share
pub mod cli;
pub mod pipeline;
pub mod server;

pub use analyzer::{analyze, AnalysisResult, ClassModel, FunctionModel};
pub use compose::{compose_suite, GeneratedSuite};
pub use error::{CovsmithError, CovsmithResult};
pub use pipeline::{run_generation, GenerateOptions};
pub use refine::{
    generate_with_coverage, CoverageProbe, CoverageReport, RefineConfig, RefineOutcome,
};
