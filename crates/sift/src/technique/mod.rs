//! Prompting techniques: iterative loops around a model call, plus two
//! single-call baselines.
//!
//! An iterative [`Technique`] takes one rendered incident prompt and
//! drives the model until its answer stabilises or an iteration ceiling
//! is hit. Those variants follow the same shape:
//!
//! 1. send a prompt through [`TechniqueContext::ask`],
//! 2. [`extract`] a category/explanation pair from the reply,
//! 3. [`score`](TechniqueContext::score) it against the previous answer,
//! 4. stop at the threshold or the ceiling, otherwise hint or rectify.
//!
//! [`ZeroShot`](Technique::ZeroShot) and [`FreePrompt`](Technique::FreePrompt)
//! ignore the rendered prompt, build their own from the incident info,
//! and make exactly one call.
//!
//! Loops always terminate with exactly one [`ClassificationRecord`]; the
//! `Vec` return type is kept so callers never assume a cardinality.

pub mod events;
mod free_prompt;
mod hypothesis;
mod progressive_hint;
mod rectification;
mod self_hint;
mod zero_shot;

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::classify::{ConvergenceScorer, Extraction, extract};
use crate::model::{ModelInvoker, SendOptions};
use events::{EventHandler, NoopHandler, TechniqueEvent};

/// Output instructions appended to every classification prompt.
pub const OUTPUT_FORMAT: &str = "If classification is not possible, return:\n\
Category: Unknown\n\
Explanation: Unknown\n\
\n\
OUTPUT:\n\
Category: [NIST code]\n\
Explanation: [Justification for the chosen category]";

/// Default convergence threshold for every technique.
pub const DEFAULT_THRESHOLD: f64 = 0.9;

// ── Technique ──────────────────────────────────────────────────────

/// The prompting strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    /// Re-ask with "the category is near: X" until the answer settles.
    ProgressiveHint,
    /// Have the model write a plan, then refine against its own answer.
    SelfHint,
    /// Mask category keywords and re-validate, excluding rejected answers.
    ProgressiveRectification,
    /// Test CAT1..CAT12 one at a time as explicit hypotheses.
    HypothesisTesting,
    /// One call with the category table and no examples.
    #[serde(rename = "zeroshot")]
    ZeroShot,
    /// One call with optional examples, hints and output format.
    FreePrompt,
}

impl Technique {
    pub const ALL: [Technique; 6] = [
        Technique::ProgressiveHint,
        Technique::SelfHint,
        Technique::ProgressiveRectification,
        Technique::HypothesisTesting,
        Technique::ZeroShot,
        Technique::FreePrompt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Technique::ProgressiveHint => "progressive_hint",
            Technique::SelfHint => "self_hint",
            Technique::ProgressiveRectification => "progressive_rectification",
            Technique::HypothesisTesting => "hypothesis_testing",
            Technique::ZeroShot => "zeroshot",
            Technique::FreePrompt => "free_prompt",
        }
    }

    /// Short label attached to model calls and interaction log files.
    pub fn mode(self) -> &'static str {
        match self {
            Technique::ProgressiveHint => "php",
            Technique::SelfHint => "shp",
            Technique::ProgressiveRectification => "prp",
            Technique::HypothesisTesting => "htp",
            Technique::ZeroShot => "zeroshot",
            Technique::FreePrompt => "free_prompt",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Technique::ProgressiveHint => {
                "Progressive Hint: feeds the previous answer back as a hint until it stabilises"
            }
            Technique::SelfHint => {
                "Self Hint: the model devises its own plan and refines against its last answer"
            }
            Technique::ProgressiveRectification => {
                "Progressive Rectification: masks category keywords to validate, then \
                 rectifies with rejected answers excluded"
            }
            Technique::HypothesisTesting => {
                "Hypothesis Testing: tests each category as a true/false hypothesis in turn"
            }
            Technique::ZeroShot => "Zero Shot: one direct call with the category table",
            Technique::FreePrompt => {
                "Free Prompt: one direct call with optional examples and context hints"
            }
        }
    }

    /// Iteration ceiling when nothing overrides it. Zero for the
    /// single-call techniques.
    pub fn default_max_iter(self) -> u32 {
        match self {
            Technique::HypothesisTesting => 12,
            Technique::ZeroShot | Technique::FreePrompt => 0,
            _ => 4,
        }
    }

    /// Whether the technique loops, and so reads `max_iter` and `threshold`.
    pub fn is_iterative(self) -> bool {
        !matches!(self, Technique::ZeroShot | Technique::FreePrompt)
    }

    /// Look up a technique by name (`progressive_hint`) or mode (`php`).
    pub fn from_name(name: &str) -> Result<Self, String> {
        let wanted = name.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.name() == wanted || t.mode() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|t| t.name()).collect();
                format!("unknown technique '{name}' (known: {})", known.join(", "))
            })
    }

    /// Run this technique for one incident prompt.
    pub async fn execute(
        self,
        ctx: &TechniqueContext<'_>,
        prompt: &str,
    ) -> Result<Vec<ClassificationRecord>, String> {
        let record = match self {
            Technique::ProgressiveHint => progressive_hint::run(ctx, prompt).await?,
            Technique::SelfHint => self_hint::run(ctx, prompt).await?,
            Technique::ProgressiveRectification => rectification::run(ctx, prompt).await?,
            Technique::HypothesisTesting => hypothesis::run(ctx, prompt).await?,
            Technique::ZeroShot => zero_shot::run(ctx).await?,
            Technique::FreePrompt => free_prompt::run(ctx).await?,
        };
        Ok(vec![record])
    }
}

impl fmt::Display for Technique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Parameters ─────────────────────────────────────────────────────

/// Tunable loop parameters. Unset fields fall through to the next layer:
/// CLI overrides, then the config's `default_params`, then the technique
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TechniqueParams {
    /// Iteration ceiling. Also accepted as `max_hints`.
    #[serde(default, alias = "max_hints", skip_serializing_if = "Option::is_none")]
    pub max_iter: Option<u32>,
    /// Convergence threshold in `[0, 1]`. Also accepted as `limite_rouge`
    /// or `limite_qualidade`.
    #[serde(
        default,
        alias = "limite_rouge",
        alias = "limite_qualidade",
        skip_serializing_if = "Option::is_none"
    )]
    pub threshold: Option<f64>,
    /// Sampling temperature for this technique's calls. Also accepted as
    /// `temperature_override`.
    #[serde(
        default,
        alias = "temperature_override",
        skip_serializing_if = "Option::is_none"
    )]
    pub temperature: Option<f32>,
    /// Completion budget for this technique's calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Free prompt: include the worked examples. Defaults to on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_examples: Option<bool>,
    /// Free prompt: ask for the `Category:`/`Explanation:` layout. Defaults
    /// to on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_structured_output: Option<bool>,
    /// Free prompt: add keyword-triggered analysis hints. Defaults to off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_context_hints: Option<bool>,
}

impl TechniqueParams {
    /// Layer `overrides` on top of `self`.
    pub fn merged(&self, overrides: &TechniqueParams) -> TechniqueParams {
        TechniqueParams {
            max_iter: overrides.max_iter.or(self.max_iter),
            threshold: overrides.threshold.or(self.threshold),
            temperature: overrides.temperature.or(self.temperature),
            max_tokens: overrides.max_tokens.or(self.max_tokens),
            use_examples: overrides.use_examples.or(self.use_examples),
            use_structured_output: overrides.use_structured_output.or(self.use_structured_output),
            use_context_hints: overrides.use_context_hints.or(self.use_context_hints),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(t) = self.threshold
            && !(0.0..=1.0).contains(&t)
        {
            return Err(format!("threshold must be within [0, 1], got {t}"));
        }
        Ok(())
    }
}

// ── Records ────────────────────────────────────────────────────────

/// One classification result. Serialized field names match the result
/// files earlier runs of this harness produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub id: String,
    #[serde(rename = "informacoes_das_colunas")]
    pub incident_info: String,
    #[serde(rename = "categoria")]
    pub category: String,
    #[serde(rename = "explicacao")]
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rouge: Option<f64>,
    #[serde(rename = "qualidade", default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    #[serde(rename = "iteracao", default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    #[serde(
        rename = "categoria_testada",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub tested_category: Option<String>,
    #[serde(rename = "erro", default, skip_serializing_if = "is_false")]
    pub error: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl ClassificationRecord {
    pub fn new(
        id: impl Into<String>,
        incident_info: impl Into<String>,
        category: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            incident_info: incident_info.into(),
            category: category.into(),
            explanation: explanation.into(),
            rouge: None,
            quality: None,
            iteration: None,
            tested_category: None,
            error: false,
        }
    }

    /// The `ERROR` record that replaces a failed row.
    pub fn failed(
        id: impl Into<String>,
        incident_info: impl Into<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            error: true,
            ..Self::new(id, incident_info, "ERROR", format!("processing error: {error}"))
        }
    }

    pub fn with_rouge(mut self, score: f64) -> Self {
        self.rouge = Some(score);
        self
    }

    pub fn with_quality(mut self, score: f64) -> Self {
        self.quality = Some(score);
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_tested_category(mut self, category: impl Into<String>) -> Self {
        self.tested_category = Some(category.into());
        self
    }
}

// ── Context ────────────────────────────────────────────────────────

/// Everything a technique needs for one incident: the model, the scorer,
/// resolved parameters, and where to report events.
pub struct TechniqueContext<'a> {
    model: &'a dyn ModelInvoker,
    technique: Technique,
    incident_id: &'a str,
    incident_info: &'a str,
    scorer: ConvergenceScorer,
    handler: &'a dyn EventHandler,
    max_iter: u32,
    threshold: f64,
    params: TechniqueParams,
    options: SendOptions,
}

impl<'a> TechniqueContext<'a> {
    /// Context with the technique's default ceiling and threshold.
    pub fn new(
        model: &'a dyn ModelInvoker,
        technique: Technique,
        incident_id: &'a str,
        incident_info: &'a str,
    ) -> Self {
        Self {
            model,
            technique,
            incident_id,
            incident_info,
            scorer: ConvergenceScorer::default(),
            handler: &NoopHandler,
            max_iter: technique.default_max_iter(),
            threshold: DEFAULT_THRESHOLD,
            params: TechniqueParams::default(),
            options: SendOptions {
                mode: technique.mode(),
                incident_id: incident_id.to_string(),
                ..Default::default()
            },
        }
    }

    /// Apply resolved parameters. Unset fields keep their current value.
    pub fn with_params(mut self, params: &TechniqueParams) -> Self {
        if let Some(n) = params.max_iter {
            self.max_iter = n;
        }
        if let Some(t) = params.threshold {
            self.threshold = t;
        }
        self.options.temperature = params.temperature.or(self.options.temperature);
        self.options.max_tokens = params.max_tokens.or(self.options.max_tokens);
        self.params = self.params.merged(params);
        self
    }

    pub fn with_scorer(mut self, scorer: ConvergenceScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_event_handler(mut self, handler: &'a dyn EventHandler) -> Self {
        self.handler = handler;
        self
    }

    pub fn max_iter(&self) -> u32 {
        self.max_iter
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn incident_id(&self) -> &str {
        self.incident_id
    }

    pub fn incident_info(&self) -> &str {
        self.incident_info
    }

    /// Every parameter applied so far, including technique-specific flags.
    pub fn params(&self) -> &TechniqueParams {
        &self.params
    }

    /// Send one prompt to the model, tagged with this technique's mode.
    pub async fn ask(&self, prompt: &str) -> Result<String, String> {
        self.handler.on_event(&TechniqueEvent::ModelCall {
            mode: self.technique.mode(),
            incident_id: self.incident_id,
            prompt_chars: prompt.len(),
        });
        self.model.send(prompt, &self.options).await
    }

    /// [`ask`](Self::ask), then [`extract`] the reply.
    pub async fn ask_extract(&self, prompt: &str) -> Result<Extraction, String> {
        let response = self.ask(prompt).await?;
        Ok(extract(&response))
    }

    /// Score `current` against `previous` and report it.
    pub fn score(&self, iteration: u32, previous: &str, current: &str) -> f64 {
        let score = self.scorer.score(previous, current);
        self.handler.on_event(&TechniqueEvent::Scored {
            mode: self.technique.mode(),
            incident_id: self.incident_id,
            iteration,
            previous,
            current,
            score,
        });
        score
    }

    /// Whether `score` stops the loop. Reports the convergence if so.
    pub fn converged(&self, iteration: u32, score: f64) -> bool {
        let done = score >= self.threshold;
        if done {
            self.handler.on_event(&TechniqueEvent::Converged {
                mode: self.technique.mode(),
                incident_id: self.incident_id,
                iteration,
                score,
            });
        }
        done
    }

    pub fn ceiling_reached(&self) {
        self.handler.on_event(&TechniqueEvent::CeilingReached {
            mode: self.technique.mode(),
            incident_id: self.incident_id,
            max_iter: self.max_iter,
        });
    }

    /// A record for this incident.
    pub fn record(
        &self,
        category: impl Into<String>,
        explanation: impl Into<String>,
    ) -> ClassificationRecord {
        ClassificationRecord::new(self.incident_id, self.incident_info, category, explanation)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::Scripted;
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn names_and_modes_resolve() {
        for t in Technique::ALL {
            assert_eq!(Technique::from_name(t.name()), Ok(t));
            assert_eq!(Technique::from_name(t.mode()), Ok(t));
        }
        assert_eq!(Technique::from_name(" PHP "), Ok(Technique::ProgressiveHint));
        assert_eq!(Technique::from_name("ZeroShot"), Ok(Technique::ZeroShot));
        let err = Technique::from_name("chain_of_thought").unwrap_err();
        assert!(err.contains("hypothesis_testing"));
        assert!(err.contains("free_prompt"));
    }

    #[test]
    fn default_ceilings() {
        assert_eq!(Technique::ProgressiveHint.default_max_iter(), 4);
        assert_eq!(Technique::HypothesisTesting.default_max_iter(), 12);
        assert_eq!(Technique::ZeroShot.default_max_iter(), 0);
        assert!(!Technique::FreePrompt.is_iterative());
        assert!(Technique::SelfHint.is_iterative());
    }

    #[test]
    fn single_call_techniques_serialize_by_name() {
        assert_eq!(
            serde_json::to_value(Technique::ZeroShot).unwrap(),
            serde_json::json!("zeroshot")
        );
        let t: Technique = serde_json::from_str(r#""free_prompt""#).unwrap();
        assert_eq!(t, Technique::FreePrompt);
    }

    #[test]
    fn free_prompt_flags_merge_and_accept_temperature_override() {
        let base: TechniqueParams = serde_json::from_str(
            r#"{"use_examples": false, "use_context_hints": true, "temperature_override": 0.2}"#,
        )
        .unwrap();
        assert_eq!(base.temperature, Some(0.2));
        let merged = base.merged(&TechniqueParams {
            use_context_hints: Some(false),
            ..Default::default()
        });
        assert_eq!(merged.use_examples, Some(false));
        assert_eq!(merged.use_context_hints, Some(false));
        assert_eq!(merged.use_structured_output, None);
    }

    #[test]
    fn params_accept_legacy_keys_and_merge() {
        let base: TechniqueParams =
            serde_json::from_str(r#"{"max_hints": 3, "limite_rouge": 0.8}"#).unwrap();
        assert_eq!(base.max_iter, Some(3));
        assert_eq!(base.threshold, Some(0.8));

        let quality: TechniqueParams =
            serde_json::from_str(r#"{"limite_qualidade": 0.7}"#).unwrap();
        assert_eq!(quality.threshold, Some(0.7));

        let merged = base.merged(&TechniqueParams {
            threshold: Some(0.5),
            ..Default::default()
        });
        assert_eq!(merged.max_iter, Some(3));
        assert_eq!(merged.threshold, Some(0.5));
    }

    #[test]
    fn threshold_out_of_range_is_rejected() {
        let p = TechniqueParams {
            threshold: Some(1.5),
            ..Default::default()
        };
        assert!(p.validate().is_err());
        assert!(TechniqueParams::default().validate().is_ok());
    }

    #[test]
    fn record_serializes_with_legacy_names() {
        let r = ClassificationRecord::new("INC-1", "desc: x", "CAT3", "flood")
            .with_rouge(1.0)
            .with_iteration(2);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["informacoes_das_colunas"], "desc: x");
        assert_eq!(json["categoria"], "CAT3");
        assert_eq!(json["iteracao"], 2);
        assert!(json.get("qualidade").is_none());
        assert!(json.get("erro").is_none());

        let failed = ClassificationRecord::failed("INC-2", "", "boom");
        assert_eq!(failed.category, "ERROR");
        assert_eq!(failed.explanation, "processing error: boom");
        assert_eq!(serde_json::to_value(&failed).unwrap()["erro"], true);
    }

    #[tokio::test]
    async fn ask_reports_model_calls_with_mode() {
        let model = Scripted::answering("CAT2");
        let seen = Mutex::new(Vec::new());
        let handler = events::FnEventHandler::new(|e| {
            if let TechniqueEvent::ModelCall { mode, .. } = e {
                seen.lock().unwrap().push(*mode);
            }
        });
        let ctx = TechniqueContext::new(&model, Technique::SelfHint, "INC-1", "")
            .with_event_handler(&handler);
        let got = ctx.ask_extract("hello").await.unwrap();
        assert_eq!(got.category, "CAT2");
        assert_eq!(*seen.lock().unwrap(), vec!["shp"]);
    }
}
