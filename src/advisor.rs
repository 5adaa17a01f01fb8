//! Optional LLM advisory layer.
//!
//! Talks to an OpenAI-compatible chat-completions endpoint and produces
//! quality commentary (`review_code`), coverage commentary (`review_coverage`),
//! and an alternative test draft (`draft_suite`) that can seed the refinement
//! loop. Every call here is best-effort: callers degrade to heuristic-only
//! output when the advisor is unconfigured, rate-limited past its retry
//! budget, or returns something unusable.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Environment variable holding the API key. Unset means the advisor is off.
pub const API_KEY_VAR: &str = "COVSMITH_API_KEY";

/// Environment variable overriding the chat-completions endpoint.
pub const API_URL_VAR: &str = "COVSMITH_API_URL";

/// Environment variable overriding the model identifier.
pub const MODEL_VAR: &str = "COVSMITH_MODEL";

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Rate-limit retry budget: one retry, exponential backoff with jitter.
const MAX_RETRIES: u32 = 1;
const BASE_DELAY_MS: u64 = 2_000;

/// Code reviews look at a bounded prefix of the source so the round trip
/// stays cheap on large files.
const REVIEW_SNIPPET_CHARS: usize = 800;

const REVIEW_MAX_TOKENS: u32 = 512;
const COVERAGE_REVIEW_MAX_TOKENS: u32 = 1_024;
const DRAFT_MAX_TOKENS: u32 = 3_000;

const REVIEW_TIMEOUT: Duration = Duration::from_secs(20);
const COVERAGE_REVIEW_TIMEOUT: Duration = Duration::from_secs(30);
const DRAFT_TIMEOUT: Duration = Duration::from_secs(45);

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("advisor is not configured; set {API_KEY_VAR} to enable it")]
    NotConfigured,

    #[error("advisor request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("advisor endpoint returned HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("advisor returned an unusable response: {reason}")]
    Malformed { reason: String },
}

// ============================================================================
// Configuration
// ============================================================================

/// Advisory endpoint settings, read from the environment exactly once at
/// startup and injected into everything that needs them.
#[derive(Clone)]
pub struct AdvisorConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
}

// The key must never reach logs, so Debug is hand-written.
impl fmt::Debug for AdvisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisorConfig")
            .field("api_key", &"<redacted>")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

impl AdvisorConfig {
    /// Build from `COVSMITH_API_KEY` / `COVSMITH_API_URL` / `COVSMITH_MODEL`.
    /// Returns `None` when no key is set, which callers treat as "advisor off".
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var(API_KEY_VAR)
            .ok()
            .filter(|key| !key.trim().is_empty())?;
        let api_url = std::env::var(API_URL_VAR)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let model = std::env::var(MODEL_VAR)
            .ok()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Some(Self {
            api_key,
            api_url,
            model,
        })
    }
}

/// Configuration state surfaced by `/health` and `covsmith advisor-status`.
/// Never carries the key itself.
#[derive(Debug, Clone, Serialize)]
pub struct AdvisorStatus {
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl AdvisorStatus {
    pub fn from_config(config: Option<&AdvisorConfig>) -> Self {
        match config {
            Some(config) => Self {
                configured: true,
                model: Some(config.model.clone()),
                api_url: Some(config.api_url.clone()),
            },
            None => Self {
                configured: false,
                model: None,
                api_url: None,
            },
        }
    }
}

// ============================================================================
// Analysis payloads
// ============================================================================

/// Structured quality commentary for a source file. Scores are on a 1-10
/// scale; missing fields in the model's JSON default to empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeReview {
    #[serde(default)]
    pub complexity_score: u8,
    #[serde(default)]
    pub testability_score: u8,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub test_recommendations: Vec<String>,
}

/// Commentary on a measured coverage result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverageReview {
    #[serde(default)]
    pub coverage_assessment: String,
    #[serde(default)]
    pub missing_scenarios: Vec<String>,
    #[serde(default)]
    pub improvement_suggestions: Vec<String>,
    #[serde(default)]
    pub priority_areas: Vec<String>,
}

// ============================================================================
// Wire types (OpenAI-compatible chat completions)
// ============================================================================

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

// ============================================================================
// Client
// ============================================================================

/// Advisory client over an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct Advisor {
    config: AdvisorConfig,
    client: reqwest::Client,
}

impl Advisor {
    pub fn new(config: AdvisorConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Build from the environment; `None` when no API key is configured.
    pub fn from_env() -> Option<Self> {
        AdvisorConfig::from_env().map(Self::new)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn status(&self) -> AdvisorStatus {
        AdvisorStatus::from_config(Some(&self.config))
    }

    /// Quality commentary on a source file: complexity and testability scores,
    /// issues, strengths, and test recommendations.
    pub async fn review_code(&self, source: &str) -> Result<CodeReview, AdvisorError> {
        let snippet = truncate_chars(source, REVIEW_SNIPPET_CHARS);
        let prompt = format!(
            "Analyze this Python code and return ONLY a valid JSON object (no markdown, no code blocks):\n\n\
             {snippet}\n\n\
             Return this exact JSON structure:\n\
             {{\"complexity_score\": 5, \"testability_score\": 7, \"issues\": [\"issue1\"], \
             \"strengths\": [\"strength1\"], \"test_recommendations\": [\"rec1\"]}}\n\n\
             IMPORTANT: Return ONLY the JSON object, nothing else."
        );
        let content = self
            .complete(&prompt, REVIEW_MAX_TOKENS, 0.2, REVIEW_TIMEOUT)
            .await?;
        parse_code_review(&content)
    }

    /// Improvement commentary on a measured coverage result.
    pub async fn review_coverage(
        &self,
        source: &str,
        tests: &str,
        coverage_percent: f64,
        missing_lines: &[u32],
    ) -> Result<CoverageReview, AdvisorError> {
        let prompt = format!(
            "Analyze this test coverage situation:\n\n\
             Source code:\n```python\n{source}\n```\n\n\
             Current tests:\n```python\n{tests}\n```\n\n\
             Coverage: {coverage_percent:.1}%\n\
             Missing lines: {missing_lines:?}\n\n\
             Provide a JSON object with:\n\
             1. \"coverage_assessment\": overall quality assessment\n\
             2. \"missing_scenarios\": list of untested scenarios\n\
             3. \"improvement_suggestions\": specific suggestions to increase coverage\n\
             4. \"priority_areas\": which parts need testing most urgently\n\n\
             Return ONLY valid JSON, no markdown formatting."
        );
        let content = self
            .complete(
                &prompt,
                COVERAGE_REVIEW_MAX_TOKENS,
                0.2,
                COVERAGE_REVIEW_TIMEOUT,
            )
            .await?;
        parse_coverage_review(&content)
    }

    /// Draft a complete pytest file for the source. The draft is validated
    /// before it is allowed to seed the refinement loop.
    pub async fn draft_suite(&self, source: &str) -> Result<String, AdvisorError> {
        let prompt = format!(
            "Generate comprehensive pytest tests for this Python code to achieve 90%+ coverage.\n\n\
             CODE:\n{source}\n\n\
             REQUIREMENTS:\n\
             - Use pytest\n\
             - Test all functions thoroughly\n\
             - Include edge cases, boundary conditions, error handling\n\
             - Test all branches and conditions\n\
             - Return ONLY the Python test code, no explanations\n\n\
             Generate the complete test file now:"
        );
        let content = self
            .complete(&prompt, DRAFT_MAX_TOKENS, 0.4, DRAFT_TIMEOUT)
            .await?;
        let draft = extract_python_code(&content);
        validate_draft(&draft)?;
        Ok(draft)
    }

    /// One chat-completion round trip with the bounded rate-limit retry.
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
        timeout: Duration,
    ) -> Result<String, AdvisorError> {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens,
            temperature,
            stream: false,
        };

        let mut attempt = 0u32;
        loop {
            let response = self
                .client
                .post(&self.config.api_url)
                .bearer_auth(&self.config.api_key)
                .timeout(timeout)
                .json(&request)
                .send()
                .await?;

            if response.status().is_success() {
                let chat: ChatResponse = response.json().await?;
                let content = chat
                    .choices
                    .into_iter()
                    .next()
                    .map(|choice| choice.message.content)
                    .ok_or_else(|| AdvisorError::Malformed {
                        reason: "response carried no choices".to_string(),
                    })?;
                return Ok(content);
            }

            let status = response.status().as_u16();
            let detail = response.text().await.unwrap_or_default();
            if attempt < MAX_RETRIES && rate_limited(status, &detail) {
                attempt += 1;
                let delay = retry_delay(attempt);
                debug!(
                    status,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "advisor rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            return Err(AdvisorError::Status {
                status,
                detail: truncate_chars(&detail, 200).to_string(),
            });
        }
    }
}

/// Retry only rate-limit-class failures: HTTP 429 or a quota-flavored body.
fn rate_limited(status: u16, body: &str) -> bool {
    status == 429 || body.to_lowercase().contains("quota")
}

fn retry_delay(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..1_000u64);
    Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt.saturating_sub(1)) + jitter)
}

// ============================================================================
// Response parsing
// ============================================================================

fn parse_code_review(content: &str) -> Result<CodeReview, AdvisorError> {
    let json = extract_json_object(content).ok_or_else(|| AdvisorError::Malformed {
        reason: "no JSON object in code review".to_string(),
    })?;
    serde_json::from_str(json).map_err(|err| AdvisorError::Malformed {
        reason: err.to_string(),
    })
}

fn parse_coverage_review(content: &str) -> Result<CoverageReview, AdvisorError> {
    let json = extract_json_object(content).ok_or_else(|| AdvisorError::Malformed {
        reason: "no JSON object in coverage review".to_string(),
    })?;
    serde_json::from_str(json).map_err(|err| AdvisorError::Malformed {
        reason: err.to_string(),
    })
}

/// Pull the JSON object out of a model response, tolerating markdown fences
/// and prose around the braces.
fn extract_json_object(response: &str) -> Option<&str> {
    let trimmed = response.trim();

    let clean = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    let clean = clean.strip_suffix("```").unwrap_or(clean).trim();

    let start = clean.find('{')?;
    let end = clean.rfind('}')?;
    if start <= end {
        Some(&clean[start..=end])
    } else {
        None
    }
}

/// Strip markdown fences and any leading prose from a drafted test file.
fn extract_python_code(response: &str) -> String {
    let trimmed = response.trim();

    let body = if let Some(after_fence) = split_fenced(trimmed, "```python") {
        after_fence
    } else if let Some(after_fence) = split_fenced(trimmed, "```") {
        after_fence
    } else {
        trimmed.to_string()
    };

    strip_leading_prose(&body)
}

/// Return the contents of the first fenced block opened by `fence`, if any.
fn split_fenced(text: &str, fence: &str) -> Option<String> {
    let (_, rest) = text.split_once(fence)?;
    let block = match rest.split_once("```") {
        Some((block, _)) => block,
        None => rest,
    };
    Some(block.trim().to_string())
}

/// Models sometimes preface the code with a sentence despite instructions.
/// Cut everything before the first line that looks like Python test code.
fn strip_leading_prose(code: &str) -> String {
    let trimmed = code.trim();
    if trimmed.starts_with("import") || trimmed.starts_with("from ") {
        return trimmed.to_string();
    }
    let mut offset = 0;
    for line in trimmed.split('\n') {
        let lead = line.trim_start();
        if lead.starts_with("import ") || lead.starts_with("from ") || lead.starts_with("def test_")
        {
            return trimmed[offset..].trim().to_string();
        }
        offset += line.len() + 1;
    }
    trimmed.to_string()
}

/// A usable draft must define at least one test and import something.
fn validate_draft(code: &str) -> Result<(), AdvisorError> {
    if !code.contains("def test") {
        return Err(AdvisorError::Malformed {
            reason: "draft defines no test functions".to_string(),
        });
    }
    if !code.contains("import") {
        return Err(AdvisorError::Malformed {
            reason: "draft imports nothing".to_string(),
        });
    }
    Ok(())
}

/// Char-boundary-safe prefix truncation.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod json_extraction_tests {
        use super::*;

        #[test]
        fn bare_object_passes_through() {
            let response = r#"{"complexity_score": 4}"#;
            assert_eq!(extract_json_object(response), Some(response));
        }

        #[test]
        fn json_fence_is_stripped() {
            let response = "```json\n{\"issues\": []}\n```";
            assert_eq!(extract_json_object(response), Some("{\"issues\": []}"));
        }

        #[test]
        fn anonymous_fence_is_stripped() {
            let response = "```\n{\"issues\": []}\n```";
            assert_eq!(extract_json_object(response), Some("{\"issues\": []}"));
        }

        #[test]
        fn surrounding_prose_is_dropped() {
            let response = "Here is the analysis you asked for:\n{\"strengths\": [\"clear\"]}\nHope that helps!";
            assert_eq!(
                extract_json_object(response),
                Some("{\"strengths\": [\"clear\"]}")
            );
        }

        #[test]
        fn response_without_braces_yields_none() {
            assert_eq!(extract_json_object("I could not analyze that."), None);
        }
    }

    mod review_parsing_tests {
        use super::*;

        #[test]
        fn full_payload_parses() {
            let content = r#"{
                "complexity_score": 6,
                "testability_score": 8,
                "issues": ["long function"],
                "strengths": ["clear naming"],
                "test_recommendations": ["test the empty-list case"]
            }"#;
            let review = parse_code_review(content).unwrap();
            assert_eq!(review.complexity_score, 6);
            assert_eq!(review.testability_score, 8);
            assert_eq!(review.issues, vec!["long function"]);
            assert_eq!(review.test_recommendations.len(), 1);
        }

        #[test]
        fn missing_fields_default_to_empty() {
            let review = parse_code_review(r#"{"complexity_score": 3}"#).unwrap();
            assert_eq!(review.complexity_score, 3);
            assert_eq!(review.testability_score, 0);
            assert!(review.issues.is_empty());
            assert!(review.strengths.is_empty());
        }

        #[test]
        fn fenced_coverage_review_parses() {
            let content = "```json\n{\"coverage_assessment\": \"decent\", \"missing_scenarios\": [\"error path\"]}\n```";
            let review = parse_coverage_review(content).unwrap();
            assert_eq!(review.coverage_assessment, "decent");
            assert_eq!(review.missing_scenarios, vec!["error path"]);
            assert!(review.priority_areas.is_empty());
        }

        #[test]
        fn prose_only_response_is_malformed() {
            let err = parse_code_review("The code looks fine to me.").unwrap_err();
            assert!(matches!(err, AdvisorError::Malformed { .. }));
        }
    }

    mod draft_extraction_tests {
        use super::*;

        #[test]
        fn python_fence_is_unwrapped() {
            let response =
                "Sure!\n```python\nimport pytest\n\ndef test_add():\n    assert True\n```\nDone.";
            let draft = extract_python_code(response);
            assert!(draft.starts_with("import pytest"));
            assert!(draft.contains("def test_add"));
            assert!(!draft.contains("```"));
            assert!(!draft.contains("Sure!"));
        }

        #[test]
        fn anonymous_fence_is_unwrapped() {
            let response = "```\nimport pytest\ndef test_x():\n    pass\n```";
            let draft = extract_python_code(response);
            assert!(draft.starts_with("import pytest"));
            assert!(!draft.contains("```"));
        }

        #[test]
        fn leading_prose_is_cut_at_first_import() {
            let response = "Here are the tests.\n\nimport pytest\n\ndef test_x():\n    pass";
            let draft = extract_python_code(response);
            assert!(draft.starts_with("import pytest"));
        }

        #[test]
        fn from_import_counts_as_code_start() {
            let response = "Tests below.\nfrom source import add\n\ndef test_add():\n    assert add(1, 2) == 3";
            let draft = extract_python_code(response);
            assert!(draft.starts_with("from source import add"));
        }

        #[test]
        fn draft_without_tests_is_rejected() {
            let err = validate_draft("import pytest\nx = 1\n").unwrap_err();
            assert!(matches!(err, AdvisorError::Malformed { .. }));
        }

        #[test]
        fn draft_without_imports_is_rejected() {
            let err = validate_draft("def test_x():\n    assert True\n").unwrap_err();
            assert!(matches!(err, AdvisorError::Malformed { .. }));
        }

        #[test]
        fn valid_draft_is_accepted() {
            assert!(validate_draft("import pytest\n\ndef test_x():\n    assert True\n").is_ok());
        }
    }

    mod retry_tests {
        use super::*;

        #[test]
        fn status_429_is_rate_limited() {
            assert!(rate_limited(429, ""));
        }

        #[test]
        fn quota_body_is_rate_limited_regardless_of_status() {
            assert!(rate_limited(403, "Quota exceeded for this project"));
        }

        #[test]
        fn server_errors_are_not_retried() {
            assert!(!rate_limited(500, "internal error"));
            assert!(!rate_limited(401, "bad key"));
        }

        #[test]
        fn first_retry_waits_two_seconds_plus_jitter() {
            for _ in 0..10 {
                let delay = retry_delay(1).as_millis() as u64;
                assert!((2_000..3_000).contains(&delay));
            }
        }
    }

    mod status_tests {
        use super::*;

        #[test]
        fn configured_status_carries_model_and_url() {
            let config = AdvisorConfig {
                api_key: "k".to_string(),
                api_url: "https://example.test/v1/chat/completions".to_string(),
                model: "test-model".to_string(),
            };
            let status = AdvisorStatus::from_config(Some(&config));
            assert!(status.configured);
            assert_eq!(status.model.as_deref(), Some("test-model"));
        }

        #[test]
        fn unconfigured_status_is_bare() {
            let status = AdvisorStatus::from_config(None);
            assert!(!status.configured);
            assert!(status.model.is_none());
            assert!(status.api_url.is_none());
        }

        #[test]
        fn status_never_serializes_the_key() {
            let config = AdvisorConfig {
                api_key: "super-secret".to_string(),
                api_url: DEFAULT_API_URL.to_string(),
                model: DEFAULT_MODEL.to_string(),
            };
            let status = AdvisorStatus::from_config(Some(&config));
            let json = serde_json::to_string(&status).unwrap();
            assert!(!json.contains("super-secret"));
        }

        #[test]
        fn config_debug_redacts_the_key() {
            let config = AdvisorConfig {
                api_key: "super-secret".to_string(),
                api_url: DEFAULT_API_URL.to_string(),
                model: DEFAULT_MODEL.to_string(),
            };
            let rendered = format!("{config:?}");
            assert!(!rendered.contains("super-secret"));
            assert!(rendered.contains("<redacted>"));
        }
    }

    mod truncation_tests {
        use super::*;

        #[test]
        fn short_text_is_untouched() {
            assert_eq!(truncate_chars("abc", 10), "abc");
        }

        #[test]
        fn long_text_is_cut_at_char_boundary() {
            let text = "héllo wörld";
            let cut = truncate_chars(text, 4);
            assert_eq!(cut, "héll");
        }
    }
}
