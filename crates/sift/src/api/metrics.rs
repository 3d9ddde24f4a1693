//! Run ids, token and cost accounting, and the per-call interaction log.
//!
//! A [`RunMetrics`] handle is created once per batch run and passed
//! explicitly to the model client. All state sits behind a mutex so
//! incidents processed concurrently can record into the same handle.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use chrono::Local;
use serde::Serialize;
use tracing::{debug, warn};

use crate::io::file_safe;

/// Generate a unique id for a batch run.
pub fn generate_run_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("run-{ts:x}-{count:04x}")
}

/// Rough token count for back-ends that don't report usage.
pub fn estimate_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

// ── Pricing ────────────────────────────────────────────────────────

/// Per-model pricing for cost estimation (USD per 1M tokens).
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPricing {
    /// Zero-cost pricing for local and mock back-ends.
    pub fn free() -> Self {
        Self {
            input_per_million: 0.0,
            output_per_million: 0.0,
        }
    }

    pub fn estimate_cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 / 1_000_000.0) * self.input_per_million
            + (completion_tokens as f64 / 1_000_000.0) * self.output_per_million
    }
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self {
            input_per_million: 3.0,
            output_per_million: 15.0,
        }
    }
}

/// Approximate pricing for a hosted model id.
///
/// Matches on the segment after the last `/`, so `"openai/gpt-4o-mini"`
/// and `"gpt-4o-mini"` price the same. Estimates only.
pub fn pricing_for_model(model: &str) -> ModelPricing {
    let name = model.rsplit('/').next().unwrap_or(model).to_lowercase();
    let (input, output) = if name.contains("opus") {
        (15.0, 75.0)
    } else if name.contains("sonnet") {
        (3.0, 15.0)
    } else if name.contains("haiku") {
        (0.25, 1.25)
    } else if name.contains("4o-mini") {
        (0.15, 0.60)
    } else if name.contains("gpt-4") {
        (2.50, 10.0)
    } else if name.contains("gemini") && name.contains("flash") {
        (0.075, 0.30)
    } else if name.contains("gemini") {
        (1.25, 5.0)
    } else if name.contains("deepseek") {
        (0.27, 1.10)
    } else if name.contains("llama") || name.contains("mistral") || name.contains("qwen") {
        (0.10, 0.10)
    } else {
        let d = ModelPricing::default();
        (d.input_per_million, d.output_per_million)
    };
    ModelPricing {
        input_per_million: input,
        output_per_million: output,
    }
}

/// Cumulative token and cost totals.
#[derive(Debug, Default, Clone)]
pub struct CostTracker {
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub estimated_cost_usd: f64,
}

impl CostTracker {
    pub fn record(&mut self, prompt_tokens: u32, completion_tokens: u32, pricing: &ModelPricing) {
        self.total_prompt_tokens += prompt_tokens as u64;
        self.total_completion_tokens += completion_tokens as u64;
        self.estimated_cost_usd += pricing.estimate_cost(prompt_tokens, completion_tokens);
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_prompt_tokens + self.total_completion_tokens
    }

    pub fn summary(&self) -> String {
        format!(
            "tokens: {} prompt + {} completion = {} total, est. cost: ${:.4}",
            self.total_prompt_tokens,
            self.total_completion_tokens,
            self.total_tokens(),
            self.estimated_cost_usd,
        )
    }
}

// ── Run metrics ────────────────────────────────────────────────────

/// One completed model call, as seen by the model client.
#[derive(Debug)]
pub struct Interaction<'a> {
    pub model: &'a str,
    pub mode: &'a str,
    pub incident_id: &'a str,
    pub prompt: &'a str,
    pub response: &'a str,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Serialize)]
struct InteractionLine<'a> {
    timestamp: String,
    run_id: &'a str,
    model_name: &'a str,
    mode: &'a str,
    id: &'a str,
    input_tokens: u32,
    output_tokens: u32,
    total_tokens: u32,
    prompt: &'a str,
    response: &'a str,
}

#[derive(Default)]
struct MetricsState {
    cost: CostTracker,
    calls_by_mode: BTreeMap<String, u64>,
    log_files: HashMap<PathBuf, File>,
}

/// Shared per-run accounting handle.
pub struct RunMetrics {
    run_id: String,
    started: Instant,
    log_dir: Option<PathBuf>,
    state: Mutex<MetricsState>,
}

/// Point-in-time copy of [`RunMetrics`] for reporting.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub run_id: String,
    pub cost: CostTracker,
    pub calls_by_mode: BTreeMap<String, u64>,
    pub elapsed: Duration,
}

impl MetricsSnapshot {
    pub fn total_calls(&self) -> u64 {
        self.calls_by_mode.values().sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} model call(s), {} in {:.1}s",
            self.total_calls(),
            self.cost.summary(),
            self.elapsed.as_secs_f64(),
        )
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunMetrics {
    pub fn new() -> Self {
        Self {
            run_id: generate_run_id(),
            started: Instant::now(),
            log_dir: None,
            state: Mutex::new(MetricsState::default()),
        }
    }

    /// Append one JSON line per call to `{dir}/{date}_{model}_{mode}.jsonl`.
    pub fn with_interaction_log(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Record a completed call. Log write failures are warned about and
    /// never fail the call.
    pub fn record(&self, interaction: &Interaction<'_>, pricing: &ModelPricing) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.cost.record(
            interaction.prompt_tokens,
            interaction.completion_tokens,
            pricing,
        );
        *state
            .calls_by_mode
            .entry(interaction.mode.to_string())
            .or_default() += 1;

        let Some(dir) = &self.log_dir else {
            return;
        };
        if let Err(e) = self.append_line(&mut state.log_files, dir, interaction) {
            warn!("Failed to write interaction log: {e}");
        }
    }

    fn append_line(
        &self,
        files: &mut HashMap<PathBuf, File>,
        dir: &Path,
        interaction: &Interaction<'_>,
    ) -> Result<(), String> {
        let now = Local::now();
        let path = dir.join(format!(
            "{}_{}_{}.jsonl",
            now.format("%Y-%m-%d"),
            file_safe(interaction.model),
            interaction.mode,
        ));

        if !files.contains_key(&path) {
            fs::create_dir_all(dir)
                .map_err(|e| format!("failed to create '{}': {e}", dir.display()))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| format!("failed to open '{}': {e}", path.display()))?;
            debug!("Interaction log: {}", path.display());
            files.insert(path.clone(), file);
        }

        let line = InteractionLine {
            timestamp: now.to_rfc3339(),
            run_id: &self.run_id,
            model_name: interaction.model,
            mode: interaction.mode,
            id: interaction.incident_id,
            input_tokens: interaction.prompt_tokens,
            output_tokens: interaction.completion_tokens,
            total_tokens: interaction.prompt_tokens + interaction.completion_tokens,
            prompt: interaction.prompt,
            response: interaction.response,
        };
        let json = serde_json::to_string(&line)
            .map_err(|e| format!("failed to serialize interaction: {e}"))?;

        match files.get_mut(&path) {
            Some(file) => writeln!(file, "{json}")
                .map_err(|e| format!("failed to write '{}': {e}", path.display())),
            None => Ok(()),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        MetricsSnapshot {
            run_id: self.run_id.clone(),
            cost: state.cost.clone(),
            calls_by_mode: state.calls_by_mode.clone(),
            elapsed: self.started.elapsed(),
        }
    }
}
