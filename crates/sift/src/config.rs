//! Experiment configuration: models, techniques, and run-wide switches.
//!
//! The file is JSON. Before it is parsed into [`ExperimentConfig`], every
//! string value of the exact form `${VAR}` or `${VAR:-default}` is
//! replaced from the environment, and the result is validated against the
//! config's own JSON Schema so that mistakes are reported with a path:
//!
//! ```text
//! invalid config 'config/default_config.json':
//!   - /models/gpt/temperature: "hot" is not of types "null", "number"
//! ```
//!
//! A missing file is not an error: [`ExperimentConfig::load_or_default`]
//! warns and returns [`ExperimentConfig::default`], which has every
//! technique plus a `mock` and an `ollama` model.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::classify::ConvergenceScorer;
use crate::model::{BackendKind, FailurePolicy};
use crate::technique::{DEFAULT_THRESHOLD, Technique, TechniqueParams};

/// Default config location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default_config.json";

// ── Sections ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct FrameworkInfo {
    pub name: String,
    pub version: String,
}

impl Default for FrameworkInfo {
    fn default() -> Self {
        Self {
            name: "sift".into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

/// One named model entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModelConfig {
    /// Back-end kind: `openai` (any OpenAI-compatible endpoint), `ollama`,
    /// or `mock`.
    pub backend: BackendKind,
    /// Model id sent to the back-end. Defaults to the entry's name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Endpoint override. For `openai` this is the full chat completions
    /// URL (default: OpenRouter); for `ollama` the server base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Bearer key. For OpenRouter, `OPENROUTER_KEY` is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Default: 0.7.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Default: 2048.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Seconds to pause before each call. Default: 0.5 for `ollama`, 0
    /// otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<f64>,
    /// Retries for transient HTTP failures. Default: 2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// What a failed call turns into. Default: `echo`.
    #[serde(default)]
    pub on_error: FailurePolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ModelConfig {
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            model: None,
            base_url: None,
            api_key: None,
            temperature: None,
            max_tokens: None,
            rate_limit: None,
            max_retries: None,
            on_error: FailurePolicy::default(),
            system_prompt: None,
            description: None,
        }
    }
}

/// One named technique entry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TechniqueConfig {
    /// Which technique this entry configures. Defaults to the entry's name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technique: Option<Technique>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub default_params: TechniqueParams,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct NistCategories {
    /// Append the category definitions to every incident prompt.
    pub enabled: bool,
}

impl Default for NistCategories {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for the per-call interaction log. Default: `logs`.
    pub log_dir: PathBuf,
    /// Write one JSON line per model call. Default: `true`.
    pub interactions: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            interactions: true,
        }
    }
}

// ── Experiment config ──────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub framework: FrameworkInfo,
    pub models: BTreeMap<String, ModelConfig>,
    pub prompt_techniques: BTreeMap<String, TechniqueConfig>,
    #[serde(default)]
    pub nist_categories: NistCategories,
    /// Convergence scorer: `rouge_l` (default) or `exact_match`.
    #[serde(default)]
    pub scorer: ConvergenceScorer,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        let mut ollama = ModelConfig::new(BackendKind::Ollama);
        ollama.model = Some("llama3.1:8b".into());
        ollama.description = Some("Local Ollama server".into());
        let mut mock = ModelConfig::new(BackendKind::Mock);
        mock.description = Some("Keyword mock for dry runs".into());

        let prompt_techniques = Technique::ALL
            .into_iter()
            .map(|t| {
                let entry = TechniqueConfig {
                    technique: Some(t),
                    description: Some(t.description().into()),
                    enabled: true,
                    default_params: if t.is_iterative() {
                        TechniqueParams {
                            max_iter: Some(t.default_max_iter()),
                            threshold: Some(DEFAULT_THRESHOLD),
                            ..Default::default()
                        }
                    } else {
                        TechniqueParams::default()
                    },
                };
                (t.name().to_string(), entry)
            })
            .collect();

        Self {
            framework: FrameworkInfo::default(),
            models: BTreeMap::from([("mock".into(), mock), ("ollama".into(), ollama)]),
            prompt_techniques,
            nist_categories: NistCategories::default(),
            scorer: ConvergenceScorer::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// JSON Schema of the config file.
    pub fn json_schema() -> Value {
        crate::json_schema_for::<ExperimentConfig>()
    }

    /// Load `path`, or fall back to the built-in defaults when it does
    /// not exist. A file that exists but is invalid is an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(
                "Config file '{}' not found; using built-in defaults",
                path.display()
            );
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config '{}': {e}", path.display()))?;
        let config = Self::from_json_str(&text)
            .map_err(|e| format!("invalid config '{}': {e}", path.display()))?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parse config text, resolving `${VAR}` references from the process
    /// environment.
    pub fn from_json_str(text: &str) -> Result<Self, String> {
        Self::from_json_str_with(text, &|name| std::env::var(name).ok())
    }

    /// Like [`from_json_str`](Self::from_json_str) with a custom variable
    /// lookup.
    pub fn from_json_str_with(
        text: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, String> {
        let raw: Value = serde_json::from_str(text).map_err(|e| format!("not valid JSON: {e}"))?;
        let resolved = resolve_env(raw, lookup);

        let schema = Self::json_schema();
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| format!("internal schema error: {e}"))?;
        let errors: Vec<String> = validator
            .iter_errors(&resolved)
            .map(|e| format!("  - {}: {e}", e.instance_path()))
            .collect();
        if !errors.is_empty() {
            return Err(format!("\n{}", errors.join("\n")));
        }

        let config: Self = serde_json::from_value(resolved).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if self.models.is_empty() {
            return Err("no models configured".into());
        }
        if self.prompt_techniques.is_empty() {
            return Err("no prompt techniques configured".into());
        }
        for (name, entry) in &self.prompt_techniques {
            if entry.technique.is_none() {
                Technique::from_name(name)
                    .map_err(|e| format!("prompt_techniques.{name}: {e}"))?;
            }
            entry
                .default_params
                .validate()
                .map_err(|e| format!("prompt_techniques.{name}: {e}"))?;
        }
        Ok(())
    }

    /// The model entry called `name`.
    pub fn model(&self, name: &str) -> Result<&ModelConfig, String> {
        self.models.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.models.keys().map(String::as_str).collect();
            format!("unknown model '{name}' (configured: {})", known.join(", "))
        })
    }

    /// Resolve a technique name (entry name, technique name, or legacy
    /// mode) to the technique and its configured default parameters.
    ///
    /// Known techniques without a config entry run with their built-in
    /// defaults.
    pub fn technique(&self, name: &str) -> Result<(Technique, TechniqueParams), String> {
        let entry = self.prompt_techniques.get(name).map(|entry| (name, entry));
        let (technique, entry) = match entry {
            Some((key, entry)) => (resolved_technique(key, entry)?, Some(entry)),
            None => {
                let technique = Technique::from_name(name)?;
                let entry = self
                    .prompt_techniques
                    .iter()
                    .find(|(key, entry)| resolved_technique(key, entry).ok() == Some(technique))
                    .map(|(_, entry)| entry);
                (technique, entry)
            }
        };

        match entry {
            Some(entry) if !entry.enabled => {
                Err(format!("technique '{name}' is disabled in the config"))
            }
            Some(entry) => Ok((technique, entry.default_params.clone())),
            None => {
                debug!("Technique '{name}' has no config entry; using defaults");
                Ok((technique, TechniqueParams::default()))
            }
        }
    }

    /// Enabled techniques as `(entry name, technique, description)`.
    pub fn enabled_techniques(&self) -> Vec<(&str, Technique, &str)> {
        self.prompt_techniques
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .filter_map(|(key, entry)| {
                let technique = resolved_technique(key, entry).ok()?;
                let description = entry
                    .description
                    .as_deref()
                    .unwrap_or(technique.description());
                Some((key.as_str(), technique, description))
            })
            .collect()
    }
}

fn resolved_technique(key: &str, entry: &TechniqueConfig) -> Result<Technique, String> {
    match entry.technique {
        Some(t) => Ok(t),
        None => Technique::from_name(key),
    }
}

// ── Environment references ─────────────────────────────────────────

/// Replace `${VAR}` / `${VAR:-default}` string values throughout `value`.
///
/// Only whole-string references are replaced. An unset variable without a
/// default becomes the empty string.
pub fn resolve_env(value: Value, lookup: &dyn Fn(&str) -> Option<String>) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, resolve_env(v, lookup)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| resolve_env(v, lookup)).collect())
        }
        Value::String(s) => match s.strip_prefix("${").and_then(|r| r.strip_suffix('}')) {
            Some(reference) => {
                let (name, default) = match reference.split_once(":-") {
                    Some((name, default)) => (name, Some(default)),
                    None => (reference, None),
                };
                let resolved = lookup(name)
                    .or_else(|| default.map(str::to_string))
                    .unwrap_or_else(|| {
                        warn!("Environment variable '{name}' is not set; using an empty string");
                        String::new()
                    });
                Value::String(resolved)
            }
            None => Value::String(s),
        },
        other => other,
    }
}
