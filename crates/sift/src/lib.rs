//! Security-incident classification with iterative prompting techniques.
//!
//! `sift` runs a batch of incident descriptions through a language model
//! using one of four self-refinement strategies or a single-call baseline,
//! and writes one classification record per incident. Each refinement
//! strategy is a small state machine around a model call: send a prompt,
//! pull a `Category`/`Explanation` pair out of the free-text reply,
//! compare it with the previous answer, and decide whether to stop, hint,
//! or rectify.
//!
//! # Getting started
//!
//! ```ignore
//! use sift::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let config = ExperimentConfig::load_or_default("config/default_config.json")?;
//!     let metrics = std::sync::Arc::new(RunMetrics::new());
//!     let model = ModelClient::from_config("mock", config.model("mock")?, metrics.clone())?;
//!
//!     let incidents = load_incidents("data/")?;
//!     let runner = IncidentRunner::new(&model, Technique::ProgressiveHint)
//!         .with_columns(vec!["description".into()])
//!         .with_event_handler(&LoggingHandler);
//!
//!     let records = runner.run(&incidents).await;
//!     println!("{} records, {}", records.len(), metrics.snapshot().summary());
//!     Ok(())
//! }
//! ```
//!
//! # Where to find things
//!
//! - **Parse model replies:** [`classify::extract`]. JSON first, then the
//!   last `Category:`/`Explanation:` block, then `CAT<N>` canonicalisation,
//!   then the `unknown` sentinel.
//! - **Decide convergence:** [`ConvergenceScorer`](classify::ConvergenceScorer),
//!   ROUGE-L F1 by default with an exact-match fallback.
//! - **Prompting strategies:** [`Technique`](technique::Technique) and its
//!   per-variant modules under [`technique`].
//! - **Talk to a model:** the [`ModelInvoker`](model::ModelInvoker) trait and
//!   the production [`ModelClient`](model::ModelClient) (OpenAI-compatible
//!   HTTP, Ollama, or the keyword mock), with retry and rate limiting.
//! - **Batch runs:** [`IncidentRunner`](runner::IncidentRunner), with per-row
//!   failure isolation, plus [`io`] for CSV/JSON input and output.
//! - **Observe a run:** implement [`EventHandler`](technique::events::EventHandler)
//!   or use [`LoggingHandler`](technique::events::LoggingHandler). Tokens,
//!   cost and the interaction log live in [`api::metrics`].

pub mod api;
pub mod classify;
pub mod config;
pub mod io;
pub mod model;
pub mod prelude;
pub mod runner;
pub mod technique;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default Ollama server address.
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// OpenAI-compatible chat path served by Ollama.
pub const OLLAMA_CHAT_PATH: &str = "/v1/chat/completions";

/// Default sampling temperature for model calls.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default completion budget for model calls.
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Per-request HTTP timeout.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

// ── Schema generation ──────────────────────────────────────────────

/// Generate a JSON Schema `serde_json::Value` for a type that implements
/// `schemars::JsonSchema`.
///
/// ```
/// use sift::json_schema_for;
/// use schemars::JsonSchema;
/// use serde::Deserialize;
///
/// #[derive(Deserialize, JsonSchema)]
/// struct Columns {
///     names: Vec<String>,
/// }
///
/// let schema = json_schema_for::<Columns>();
/// assert_eq!(schema["type"], "object");
/// ```
pub fn json_schema_for<T: JsonSchema>() -> serde_json::Value {
    let schema = schemars::schema_for!(T);
    serde_json::to_value(schema)
        .unwrap_or_else(|_| serde_json::json!({"type": "object", "properties": {}}))
}

// ── Request types ──────────────────────────────────────────────────

/// OpenAI-format chat completion request body.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// A message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

// ── Response types ─────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Clean return type from [`ChatClient::chat`].
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
    pub finish_reason: Option<String>,
}

impl ChatCompletion {
    /// Whether the server stopped because it hit `max_tokens`.
    pub fn is_truncated(&self) -> bool {
        self.finish_reason.as_deref() == Some("length")
    }
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

#[derive(Deserialize, Debug)]
struct OllamaVersion {
    version: String,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for any OpenAI-compatible chat completions endpoint
/// (OpenRouter, OpenAI, a local Ollama server).
pub struct ChatClient {
    client: reqwest::Client,
    url: String,
    label: String,
    api_key: Option<String>,
    referer: Option<String>,
    title: Option<String>,
}

impl ChatClient {
    /// Create a client posting to `url`. `label` prefixes error messages
    /// (`"{label} API HTTP 503: ..."`).
    pub fn new(url: impl Into<String>, label: impl Into<String>) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sift/", env!("CARGO_PKG_VERSION")))
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            url: url.into(),
            label: label.into(),
            api_key: None,
            referer: None,
            title: None,
        })
    }

    /// Client for the OpenRouter endpoint with attribution headers.
    pub fn openrouter(api_key: impl Into<String>) -> Result<Self, String> {
        Ok(Self::new(OPENROUTER_URL, "OpenRouter")?
            .with_api_key(api_key)
            .with_headers("https://crates.io/crates/sift", "sift"))
    }

    /// Client for an Ollama server's OpenAI-compatible endpoint.
    pub fn ollama(base_url: &str) -> Result<Self, String> {
        Self::new(
            format!("{}{OLLAMA_CHAT_PATH}", base_url.trim_end_matches('/')),
            "Ollama",
        )
    }

    /// Send `Authorization: Bearer {key}` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Send OpenRouter `HTTP-Referer` / `X-Title` attribution headers.
    pub fn with_headers(mut self, referer: impl Into<String>, title: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self.title = Some(title.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, String> {
        debug!(
            "LLM request: endpoint={}, model={}, messages={}, max_tokens={:?}, temp={:?}",
            self.label,
            body.model,
            body.messages.len(),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();

        let mut req = self.client.post(&self.url).json(body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        if let Some(referer) = &self.referer {
            req = req.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.title {
            req = req.header("X-Title", title);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;

        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("{} API HTTP {status}: {text}", self.label));
        }

        parse_chat_response(&self.label, &text)
    }

    /// Query an Ollama server's `/api/version` endpoint.
    pub async fn health_check(&self, base_url: &str) -> Result<String, String> {
        let url = format!("{}/api/version", base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("{} health check HTTP {status}", self.label));
        }
        let version: OllamaVersion = resp
            .json()
            .await
            .map_err(|e| format!("failed to parse version response: {e}"))?;
        Ok(version.version)
    }
}

fn parse_chat_response(label: &str, text: &str) -> Result<ChatCompletion, String> {
    let parsed: RawChatResponse =
        serde_json::from_str(text).map_err(|e| format!("failed to parse response: {e}"))?;

    if let Some(err) = parsed.error {
        return Err(format!("{label} API error: {}", err.message));
    }

    if let Some(ref usage) = parsed.usage {
        debug!(
            "Token usage: prompt={}, completion={}, total={}",
            usage.prompt_tokens.unwrap_or(0),
            usage.completion_tokens.unwrap_or(0),
            usage.total_tokens.unwrap_or(0),
        );
    }

    let choice = parsed.choices.and_then(|c| c.into_iter().next());
    match choice {
        Some(c) => Ok(ChatCompletion {
            content: c.message.content,
            usage: parsed.usage,
            finish_reason: c.finish_reason,
        }),
        None => {
            debug!("LLM output: empty (no choices)");
            Ok(ChatCompletion {
                content: None,
                usage: parsed.usage,
                finish_reason: None,
            })
        }
    }
}
