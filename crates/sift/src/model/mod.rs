//! Model invocation: the [`ModelInvoker`] contract and the production
//! [`ModelClient`].
//!
//! Techniques only ever see `&dyn ModelInvoker`: send a prompt with some
//! [`SendOptions`], get text back or an error. Everything else a real
//! back-end needs happens inside [`ModelClient`]:
//!
//! 1. an advisory rate-limit pause before each call,
//! 2. retry with backoff for transient transport errors,
//! 3. token and cost accounting into the run's [`RunMetrics`],
//! 4. the [`FailurePolicy`] deciding whether a failed call turns into
//!    error text (which extracts as `unknown`) or a propagated error
//!    (which becomes an `ERROR` row).

pub mod mock;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::metrics::{
    Interaction, ModelPricing, RunMetrics, estimate_tokens, pricing_for_model,
};
use crate::api::retry::{RetryConfig, retry_call};
use crate::config::ModelConfig;
use crate::{
    ChatClient, ChatRequest, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, Message, OLLAMA_BASE_URL,
    OPENROUTER_URL,
};

pub use mock::MockModel;

/// Boxed future returned by [`ModelInvoker::send`].
pub type InvokeFuture<'a> = Pin<Box<dyn Future<Output = Result<String, String>> + Send + 'a>>;

/// Per-call options. `mode` and `incident_id` are correlation tags only;
/// `None` fields fall back to the back-end's configured defaults.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub mode: &'static str,
    pub incident_id: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub rate_limit: Option<Duration>,
}

/// Something that turns a prompt into response text.
///
/// Implementations must be usable from several incidents at once. The
/// method returns a boxed future so the trait stays object-safe:
///
/// ```ignore
/// struct Echo;
///
/// impl ModelInvoker for Echo {
///     fn name(&self) -> &str { "echo" }
///     fn send<'a>(&'a self, prompt: &'a str, _: &'a SendOptions) -> InvokeFuture<'a> {
///         Box::pin(async move { Ok(prompt.to_string()) })
///     }
/// }
/// ```
pub trait ModelInvoker: Send + Sync {
    /// Name used in logs, metrics and output file names.
    fn name(&self) -> &str;

    /// Send `prompt` and return the response text.
    fn send<'a>(&'a self, prompt: &'a str, options: &'a SendOptions) -> InvokeFuture<'a>;
}

/// Which kind of back-end a configured model talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Any OpenAI-compatible chat endpoint. Defaults to OpenRouter.
    Openai,
    /// A local Ollama server.
    Ollama,
    /// The deterministic keyword mock.
    Mock,
}

/// What to do when a model call still fails after retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Return `"Error calling model: {e}"` as the response text.
    #[default]
    Echo,
    /// Return the error to the technique, failing the row.
    Propagate,
}

/// Concrete transport behind a [`ModelClient`].
pub enum ModelBackend {
    Chat {
        client: ChatClient,
        model: String,
    },
    Ollama {
        client: ChatClient,
        model: String,
        base_url: String,
    },
    Mock(MockModel),
}

/// The production [`ModelInvoker`].
pub struct ModelClient {
    name: String,
    backend: ModelBackend,
    temperature: f32,
    max_tokens: u32,
    rate_limit: Duration,
    system_prompt: Option<String>,
    retry: RetryConfig,
    on_error: FailurePolicy,
    pricing: ModelPricing,
    metrics: Arc<RunMetrics>,
}

impl ModelClient {
    /// Wrap a back-end with default sampling settings and no pause.
    pub fn new(name: impl Into<String>, backend: ModelBackend, metrics: Arc<RunMetrics>) -> Self {
        let pricing = match &backend {
            ModelBackend::Chat { model, .. } => pricing_for_model(model),
            ModelBackend::Ollama { .. } | ModelBackend::Mock(_) => ModelPricing::free(),
        };
        Self {
            name: name.into(),
            backend,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            rate_limit: Duration::ZERO,
            system_prompt: None,
            retry: RetryConfig::default(),
            on_error: FailurePolicy::default(),
            pricing,
            metrics,
        }
    }

    /// Build a client from a named model entry of the experiment config.
    pub fn from_config(
        name: &str,
        config: &ModelConfig,
        metrics: Arc<RunMetrics>,
    ) -> Result<Self, String> {
        let model_id = config.model.clone().unwrap_or_else(|| name.to_string());
        let api_key = config.api_key.clone().filter(|k| !k.trim().is_empty());

        let (backend, default_pause) = match config.backend {
            BackendKind::Openai => {
                let url = config.base_url.as_deref().unwrap_or(OPENROUTER_URL);
                let client = if url == OPENROUTER_URL {
                    let key = match api_key {
                        Some(key) => key,
                        None => std::env::var("OPENROUTER_KEY").map_err(|_| {
                            format!("model '{name}': no api_key and OPENROUTER_KEY is not set")
                        })?,
                    };
                    ChatClient::openrouter(key)?
                } else {
                    let client = ChatClient::new(url, "chat")?;
                    match api_key {
                        Some(key) => client.with_api_key(key),
                        None => client,
                    }
                };
                (
                    ModelBackend::Chat {
                        client,
                        model: model_id,
                    },
                    Duration::ZERO,
                )
            }
            BackendKind::Ollama => {
                let base_url = config
                    .base_url
                    .clone()
                    .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());
                (
                    ModelBackend::Ollama {
                        client: ChatClient::ollama(&base_url)?,
                        model: model_id,
                        base_url,
                    },
                    Duration::from_millis(500),
                )
            }
            BackendKind::Mock => (ModelBackend::Mock(MockModel), Duration::ZERO),
        };

        let rate_limit = match config.rate_limit {
            Some(secs) => Duration::try_from_secs_f64(secs)
                .map_err(|e| format!("model '{name}': invalid rate_limit {secs}: {e}"))?,
            None => default_pause,
        };

        let mut client = Self::new(name, backend, metrics)
            .with_rate_limit(rate_limit)
            .with_failure_policy(config.on_error);
        if let Some(t) = config.temperature {
            client = client.with_temperature(t);
        }
        if let Some(n) = config.max_tokens {
            client = client.with_max_tokens(n);
        }
        if let Some(n) = config.max_retries {
            client = client.with_retry(RetryConfig::with_retries(n));
        }
        if let Some(prompt) = &config.system_prompt {
            client = client.with_system_prompt(prompt.clone());
        }
        Ok(client)
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Pause before every call unless the call overrides it.
    pub fn with_rate_limit(mut self, pause: Duration) -> Self {
        self.rate_limit = pause;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.on_error = policy;
        self
    }

    pub fn backend(&self) -> &ModelBackend {
        &self.backend
    }

    /// Check the back-end's health if it supports it. Only Ollama does;
    /// other back-ends return `None`.
    pub async fn health_check(&self) -> Option<Result<String, String>> {
        match &self.backend {
            ModelBackend::Ollama {
                client, base_url, ..
            } => Some(client.health_check(base_url).await),
            ModelBackend::Chat { .. } | ModelBackend::Mock(_) => None,
        }
    }

    async fn complete(&self, prompt: &str, options: &SendOptions) -> Result<String, String> {
        let (model, text, prompt_tokens, completion_tokens) = match &self.backend {
            ModelBackend::Chat { client, model } | ModelBackend::Ollama { client, model, .. } => {
                let mut messages = Vec::with_capacity(2);
                if let Some(system) = &self.system_prompt {
                    messages.push(Message::system(system.clone()));
                }
                messages.push(Message::user(prompt));
                let body = ChatRequest {
                    model: model.clone(),
                    messages,
                    max_tokens: Some(options.max_tokens.unwrap_or(self.max_tokens)),
                    temperature: Some(options.temperature.unwrap_or(self.temperature)),
                    ..Default::default()
                };

                let completion = retry_call(&self.retry, || client.chat(&body)).await?;
                if completion.is_truncated() {
                    warn!(
                        "[{}] {} reply for incident {} hit max_tokens ({}) and was cut off",
                        self.name,
                        options.mode,
                        options.incident_id,
                        body.max_tokens.unwrap_or(self.max_tokens)
                    );
                }
                let text = completion.content.unwrap_or_default();
                let usage = completion.usage.unwrap_or_default();
                let prompt_tokens = usage.prompt_tokens.unwrap_or_else(|| estimate_tokens(prompt));
                let completion_tokens = usage
                    .completion_tokens
                    .unwrap_or_else(|| estimate_tokens(&text));
                (model.as_str(), text, prompt_tokens, completion_tokens)
            }
            ModelBackend::Mock(mock) => {
                let text = mock.respond(prompt).to_string();
                let completion_tokens = estimate_tokens(&text);
                ("mock", text, estimate_tokens(prompt), completion_tokens)
            }
        };

        self.metrics.record(
            &Interaction {
                model,
                mode: options.mode,
                incident_id: &options.incident_id,
                prompt,
                response: &text,
                prompt_tokens,
                completion_tokens,
            },
            &self.pricing,
        );
        Ok(text)
    }
}

impl ModelInvoker for ModelClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(&'a self, prompt: &'a str, options: &'a SendOptions) -> InvokeFuture<'a> {
        Box::pin(async move {
            let pause = options.rate_limit.unwrap_or(self.rate_limit);
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }

            debug!(
                "[{}] {} call for incident {} ({} chars)",
                self.name,
                options.mode,
                options.incident_id,
                prompt.len()
            );

            match self.complete(prompt, options).await {
                Ok(text) => Ok(text),
                Err(e) => match self.on_error {
                    FailurePolicy::Echo => {
                        warn!(
                            "Model '{}' failed for incident {}: {e}",
                            self.name, options.incident_id
                        );
                        Ok(format!("Error calling model: {e}"))
                    }
                    FailurePolicy::Propagate => Err(e),
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;

    fn options(mode: &'static str) -> SendOptions {
        SendOptions {
            mode,
            incident_id: "INC-7".into(),
            ..Default::default()
        }
    }

    fn unreachable_client(policy: FailurePolicy, metrics: Arc<RunMetrics>) -> ModelClient {
        // Port 1 on loopback refuses connections immediately.
        let client = ChatClient::new("http://127.0.0.1:1/v1/chat/completions", "chat").unwrap();
        ModelClient::new(
            "broken",
            ModelBackend::Chat {
                client,
                model: "none".into(),
            },
            metrics,
        )
        .with_retry(RetryConfig::with_retries(0))
        .with_failure_policy(policy)
    }

    #[tokio::test]
    async fn mock_backend_answers_and_records_metrics() {
        let metrics = Arc::new(RunMetrics::new());
        let client = ModelClient::new("mock", ModelBackend::Mock(MockModel), metrics.clone());

        let reply = client
            .send("malware beaconing detected", &options("php"))
            .await
            .unwrap();
        assert!(reply.starts_with("Category: CAT2"));

        let snap = metrics.snapshot();
        assert_eq!(snap.calls_by_mode.get("php"), Some(&1));
        assert_eq!(snap.cost.total_prompt_tokens, 3);
        assert_eq!(snap.cost.estimated_cost_usd, 0.0);
    }

    #[tokio::test]
    async fn rate_limit_pauses_before_each_call_unless_overridden() {
        use std::time::Instant;

        let mock = |pause| {
            ModelClient::new("mock", ModelBackend::Mock(MockModel), Arc::new(RunMetrics::new()))
                .with_rate_limit(pause)
        };

        let client = mock(Duration::from_millis(60));
        let started = Instant::now();
        client.send("port scan", &options("php")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(60));

        // A per-call pause replaces the client's, in both directions.
        let client = mock(Duration::from_secs(5));
        let skip = SendOptions {
            rate_limit: Some(Duration::ZERO),
            ..options("php")
        };
        let started = Instant::now();
        client.send("port scan", &skip).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        let client = mock(Duration::ZERO);
        let slower = SendOptions {
            rate_limit: Some(Duration::from_millis(40)),
            ..options("php")
        };
        let started = Instant::now();
        client.send("port scan", &slower).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn echo_policy_turns_failures_into_text() {
        let metrics = Arc::new(RunMetrics::new());
        let client = unreachable_client(FailurePolicy::Echo, metrics.clone());
        let reply = client.send("anything", &options("shp")).await.unwrap();
        assert!(reply.starts_with("Error calling model:"), "{reply}");
        assert_eq!(crate::classify::extract(&reply).category, "unknown");
        assert_eq!(metrics.snapshot().total_calls(), 0);
    }

    #[tokio::test]
    async fn propagate_policy_returns_the_error() {
        let client = unreachable_client(FailurePolicy::Propagate, Arc::new(RunMetrics::new()));
        let err = client.send("anything", &options("prp")).await.unwrap_err();
        assert!(err.starts_with("request failed:"), "{err}");
    }

    #[tokio::test]
    async fn health_check_only_for_ollama() {
        let client = ModelClient::new(
            "mock",
            ModelBackend::Mock(MockModel),
            Arc::new(RunMetrics::new()),
        );
        assert!(client.health_check().await.is_none());
    }

    #[test]
    fn from_config_applies_backend_defaults() {
        let metrics = Arc::new(RunMetrics::new());
        let config: ModelConfig = serde_json::from_value(serde_json::json!({
            "backend": "ollama",
            "model": "llama3.1:8b"
        }))
        .unwrap();
        let client = ModelClient::from_config("local", &config, metrics.clone()).unwrap();
        assert_eq!(client.rate_limit, Duration::from_millis(500));
        assert_eq!(client.max_tokens, DEFAULT_MAX_TOKENS);
        match client.backend() {
            ModelBackend::Ollama { model, base_url, .. } => {
                assert_eq!(model, "llama3.1:8b");
                assert_eq!(base_url, OLLAMA_BASE_URL);
            }
            _ => panic!("expected ollama backend"),
        }

        let config: ModelConfig = serde_json::from_value(serde_json::json!({
            "backend": "openai",
            "base_url": "http://localhost:8000/v1/chat/completions",
            "api_key": "",
            "rate_limit": 0.25,
            "temperature": 0.1,
            "on_error": "propagate"
        }))
        .unwrap();
        let client = ModelClient::from_config("vllm", &config, metrics).unwrap();
        assert_eq!(client.rate_limit, Duration::from_millis(250));
        assert_eq!(client.on_error, FailurePolicy::Propagate);
        assert!((client.temperature - 0.1).abs() < f32::EPSILON);
        match client.backend() {
            ModelBackend::Chat { model, .. } => assert_eq!(model, "vllm"),
            _ => panic!("expected chat backend"),
        }
    }

    #[test]
    fn negative_rate_limit_is_rejected() {
        let config: ModelConfig = serde_json::from_value(serde_json::json!({
            "backend": "mock",
            "rate_limit": -1.0
        }))
        .unwrap();
        let err = ModelClient::from_config("m", &config, Arc::new(RunMetrics::new()))
            .err()
            .unwrap();
        assert!(err.contains("invalid rate_limit"));
    }
}
