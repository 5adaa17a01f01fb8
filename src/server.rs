//! HTTP surface over the generation pipeline.
//!
//! Four routes: `GET /health` for liveness and configuration state,
//! `POST /generate-tests` for the full pipeline, `POST /coverage` for a
//! one-off measurement, and `POST /analyze-code` for the structural
//! model alone. Every response body is one of the envelopes in
//! [`crate::output`], so CLI and HTTP consumers parse the same shapes.
//!
//! CORS is wide open: the service speaks JSON to browser-based editors
//! and carries no credentials or per-user state.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::advisor::{Advisor, AdvisorStatus};
use crate::analyzer;
use crate::digest::source_digest;
use crate::error::{CovsmithError, CovsmithResult, OutputErrorCode};
use crate::output::{
    AnalyzeResponse, CoverageRunResponse, ErrorResponse, GenerateResponse, HealthResponse,
};
use crate::pipeline::{self, GenerateOptions};
use crate::pyenv::{PythonEnv, PythonEnvError};
use crate::refine::CoverageProbe;
use crate::sandbox::CoverageSandbox;

// ============================================================================
// State
// ============================================================================

/// Everything a handler needs, cloned per request. The interpreter and
/// advisor are resolved once at startup; a request never re-probes the
/// environment.
#[derive(Clone)]
pub struct AppState {
    pub options: GenerateOptions,
    pub python: Option<Arc<PythonEnv>>,
    pub advisor: Option<Arc<Advisor>>,
}

impl AppState {
    pub fn new(
        options: GenerateOptions,
        python: Option<PythonEnv>,
        advisor: Option<Advisor>,
    ) -> Self {
        AppState {
            options,
            python: python.map(Arc::new),
            advisor: advisor.map(Arc::new),
        }
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Body for `POST /generate-tests` and `POST /analyze-code`.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub code_content: String,
    /// Used to name the staged module; defaults to `source.py`.
    #[serde(default)]
    pub file_name: Option<String>,
    /// Informational; a non-Python tag is noted, not rejected.
    #[serde(default)]
    pub language: Option<String>,
}

/// Body for `POST /coverage`.
#[derive(Debug, Deserialize)]
pub struct CoverageRequest {
    pub source_code: String,
    pub test_code: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

// ============================================================================
// Error mapping
// ============================================================================

/// Bridges pipeline errors onto HTTP. Bad input is the caller's fault;
/// everything else is ours. The body is the same [`ErrorResponse`]
/// envelope the CLI prints.
#[derive(Debug)]
struct ApiError(CovsmithError);

impl From<CovsmithError> for ApiError {
    fn from(err: CovsmithError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match OutputErrorCode::from(&self.0) {
            OutputErrorCode::InvalidArguments => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorResponse::from_error(&self.0))).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let advisor = match &state.advisor {
        Some(advisor) => advisor.status(),
        None => AdvisorStatus::from_config(None),
    };
    let python = state.python.as_deref().cloned();
    Json(HealthResponse::new(advisor, python))
}

async fn generate_tests(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    if request.code_content.trim().is_empty() {
        return Err(CovsmithError::invalid_args("code_content must not be empty").into());
    }

    // The advisor draft is best-effort: a failed or unconfigured
    // advisor falls back to heuristic composition.
    let seed = match &state.advisor {
        Some(advisor) => match advisor.draft_suite(&request.code_content).await {
            Ok(draft) => Some(pipeline::seed_from_draft(draft)),
            Err(error) => {
                warn!(%error, "advisor draft failed; composing heuristically");
                None
            }
        },
        None => None,
    };

    let response = tokio::task::spawn_blocking(move || {
        let digest = source_digest(&request.code_content);
        let (_, outcome) = pipeline::run_generation(
            &request.code_content,
            request.file_name.as_deref(),
            request.language.as_deref(),
            seed,
            state.python.as_deref(),
            &state.options,
        );
        GenerateResponse::from_outcome(digest, &outcome)
    })
    .await
    .map_err(|err| CovsmithError::internal(format!("generation task failed: {err}")))?;

    Ok(Json(response))
}

async fn run_coverage(
    State(state): State<AppState>,
    Json(request): Json<CoverageRequest>,
) -> Result<Json<CoverageRunResponse>, ApiError> {
    if request.source_code.trim().is_empty() {
        return Err(CovsmithError::invalid_args("source_code must not be empty").into());
    }
    if request.test_code.trim().is_empty() {
        return Err(CovsmithError::invalid_args("test_code must not be empty").into());
    }
    let Some(python) = state.python.clone() else {
        return Err(CovsmithError::PythonEnv(PythonEnvError::NotFound {
            searched: vec!["server startup: no usable interpreter resolved".to_string()],
        })
        .into());
    };

    let source = request.source_code.clone();
    let tests = request.test_code.clone();
    let timeout = state.options.timeout;
    let report = tokio::task::spawn_blocking(move || {
        let mut sandbox = CoverageSandbox::new((*python).clone()).with_timeout(timeout);
        if let Some(name) = &request.file_name {
            sandbox = sandbox.for_file(name);
        }
        // Probe semantics: failures degrade to an error-carrying report.
        sandbox.measure(&request.source_code, &request.test_code)
    })
    .await
    .map_err(|err| CovsmithError::internal(format!("coverage task failed: {err}")))?;

    // Commentary is best-effort and only worth requesting for a run
    // that actually produced numbers.
    let review = match &state.advisor {
        Some(advisor) if report.error.is_none() => {
            match advisor
                .review_coverage(&source, &tests, report.percent, &report.missing_lines)
                .await
            {
                Ok(review) => Some(review),
                Err(error) => {
                    warn!(%error, "advisor coverage review failed; returning measurement only");
                    None
                }
            }
        }
        _ => None,
    };

    Ok(Json(
        CoverageRunResponse::from_report(&report).with_review(review),
    ))
}

async fn analyze_code(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    if request.code_content.trim().is_empty() {
        return Err(CovsmithError::invalid_args("code_content must not be empty").into());
    }

    let source = request.code_content.clone();
    let analysis = tokio::task::spawn_blocking(move || analyzer::analyze(&source))
        .await
        .map_err(|err| CovsmithError::internal(format!("analysis task failed: {err}")))?;

    let review = match &state.advisor {
        Some(advisor) => match advisor.review_code(&request.code_content).await {
            Ok(review) => Some(review),
            Err(error) => {
                warn!(%error, "advisor review failed; returning structure only");
                None
            }
        },
        None => None,
    };

    Ok(Json(AnalyzeResponse::new(
        source_digest(&request.code_content),
        analysis,
        review,
    )))
}

// ============================================================================
// App assembly
// ============================================================================

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    info!("{} {} -> {}", method, path, response.status());
    response
}

/// Building the router separately from binding it keeps handler tests
/// free of TCP.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/generate-tests", post(generate_tests))
        .route("/coverage", post(run_coverage))
        .route("/analyze-code", post(analyze_code))
        .layer(middleware::from_fn(log_request))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is killed.
pub async fn serve(addr: SocketAddr, state: AppState) -> CovsmithResult<()> {
    let app = build_app(state);
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "covsmith listening");
    axum::serve(listener, app).await?;
    Ok(())
}
