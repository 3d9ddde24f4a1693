//! Batch execution: one technique run per incident, failures isolated.
//!
//! The runner renders each incident into a classification prompt, hands
//! it to the configured [`Technique`], and turns the outcome into records.
//! A row whose technique fails becomes a single `ERROR` record; the batch
//! always carries on. Records come back in input order even when rows are
//! processed concurrently.

use std::collections::BTreeMap;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::classify::{ConvergenceScorer, definitions_block};
use crate::model::ModelInvoker;
use crate::technique::events::{EventHandler, NoopHandler, TechniqueEvent};
use crate::technique::{ClassificationRecord, Technique, TechniqueContext, TechniqueParams};

/// Rendered in place of a configured column the row has no value for.
pub const MISSING_VALUE: &str = "[missing]";

// ── Incident ───────────────────────────────────────────────────────

/// One input row: an optional id plus named text fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Incident {
    pub id: Option<String>,
    fields: BTreeMap<String, String>,
}

impl Incident {
    pub fn new(id: Option<String>) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    /// Set a field. Blank values are treated as missing.
    pub fn with_field(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if !value.trim().is_empty() {
            self.fields.insert(column.into(), value);
        }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

// ── Prompt rendering ───────────────────────────────────────────────

const PREAMBLE: &str = "\n        You are a security expert.\
\n        Categorize the following incident description into a Category and an Explanation.\
\n\
\n        Description:\
\n            ```";

/// Closes the fenced description.
const FENCE_END: &str = "\n            ```";

/// Renders incidents into prompts and `incident_info` summaries.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    columns: Vec<String>,
    definitions: bool,
}

impl PromptBuilder {
    /// Builder over `columns`, with category definitions enabled.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            definitions: true,
        }
    }

    pub fn with_definitions(mut self, enabled: bool) -> Self {
        self.definitions = enabled;
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The classification prompt for one incident. Columns the row has no
    /// value for are left out.
    pub fn prompt(&self, incident: &Incident) -> String {
        let mut prompt = String::from(PREAMBLE);
        for column in &self.columns {
            if let Some(value) = incident.get(column) {
                prompt.push_str(&format!(" [{column}]: [{value}]"));
            }
        }
        prompt.push_str(FENCE_END);
        if self.definitions {
            prompt.push_str(&definitions_block());
        }
        prompt
    }

    /// `"col: value / col: value"`, with missing values marked.
    pub fn incident_info(&self, incident: &Incident) -> String {
        self.columns
            .iter()
            .map(|column| format!("{column}: {}", incident.get(column).unwrap_or(MISSING_VALUE)))
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

// ── Runner ─────────────────────────────────────────────────────────

/// How one row ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Classified(Vec<ClassificationRecord>),
    Failed(ClassificationRecord),
}

impl RowOutcome {
    pub fn into_records(self) -> Vec<ClassificationRecord> {
        match self {
            RowOutcome::Classified(records) => records,
            RowOutcome::Failed(record) => vec![record],
        }
    }
}

/// Runs one technique over a batch of incidents.
pub struct IncidentRunner<'a> {
    model: &'a dyn ModelInvoker,
    technique: Technique,
    params: TechniqueParams,
    scorer: ConvergenceScorer,
    prompts: PromptBuilder,
    handler: &'a dyn EventHandler,
    concurrency: usize,
}

impl<'a> IncidentRunner<'a> {
    pub fn new(model: &'a dyn ModelInvoker, technique: Technique) -> Self {
        Self {
            model,
            technique,
            params: TechniqueParams::default(),
            scorer: ConvergenceScorer::default(),
            prompts: PromptBuilder::new(Vec::new()),
            handler: &NoopHandler,
            concurrency: 1,
        }
    }

    /// Columns rendered into the prompt, in this order.
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.prompts.columns = columns;
        self
    }

    /// Append the category definitions to every prompt. Default: on.
    pub fn with_definitions(mut self, enabled: bool) -> Self {
        self.prompts = self.prompts.with_definitions(enabled);
        self
    }

    pub fn with_params(mut self, params: TechniqueParams) -> Self {
        self.params = params;
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

    /// Rows processed at once. Calls within a row stay sequential.
    /// Default: 1.
    pub fn with_concurrency(mut self, rows: usize) -> Self {
        self.concurrency = rows.max(1);
        self
    }

    pub fn technique(&self) -> Technique {
        self.technique
    }

    /// Classify every incident, returning records in input order.
    pub async fn run(&self, incidents: &[Incident]) -> Vec<ClassificationRecord> {
        let total = incidents.len();
        info!(
            "Classifying {total} incident(s) with {} via {} (concurrency {})",
            self.model.name(),
            self.technique,
            self.concurrency
        );

        let outcomes: Vec<RowOutcome> = stream::iter(incidents.iter().enumerate())
            .map(|(index, incident)| self.classify(index, total, incident))
            .buffered(self.concurrency)
            .collect()
            .await;

        outcomes
            .into_iter()
            .flat_map(RowOutcome::into_records)
            .collect()
    }

    /// Classify one incident. `index` is the row's position in the batch
    /// and names rows without an id.
    pub async fn classify(&self, index: usize, total: usize, incident: &Incident) -> RowOutcome {
        let incident_id = match incident.id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                let fallback = format!("row_{index}");
                warn!("Row {index} has no id; using '{fallback}'");
                fallback
            }
        };
        self.handler.on_event(&TechniqueEvent::RowStarted {
            index,
            total,
            incident_id: &incident_id,
        });

        let prompt = self.prompts.prompt(incident);
        let incident_info = self.prompts.incident_info(incident);
        let ctx = TechniqueContext::new(self.model, self.technique, &incident_id, &incident_info)
            .with_params(&self.params)
            .with_scorer(self.scorer)
            .with_event_handler(self.handler);

        let outcome = match self.technique.execute(&ctx, &prompt).await {
            Ok(mut records) => {
                for record in &mut records {
                    if record.id.is_empty() {
                        record.id.clone_from(&incident_id);
                    }
                }
                RowOutcome::Classified(records)
            }
            Err(e) => {
                error!("Failed to process incident {incident_id}: {e}");
                self.handler.on_event(&TechniqueEvent::RowFailed {
                    index,
                    incident_id: &incident_id,
                    error: &e,
                });
                RowOutcome::Failed(ClassificationRecord::failed(
                    incident_id.as_str(),
                    incident_info.as_str(),
                    &e,
                ))
            }
        };

        let records = match &outcome {
            RowOutcome::Classified(records) => records.as_slice(),
            RowOutcome::Failed(record) => std::slice::from_ref(record),
        };
        self.handler.on_event(&TechniqueEvent::RowFinished {
            index,
            total,
            incident_id: &incident_id,
            records,
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InvokeFuture, SendOptions};

    struct Fixed(&'static str);

    impl ModelInvoker for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn send<'a>(&'a self, _: &'a str, _: &'a SendOptions) -> InvokeFuture<'a> {
            Box::pin(async move { Ok(self.0.to_string()) })
        }
    }

    fn incident() -> Incident {
        Incident::new(Some("INC-1".into()))
            .with_field("title", "Port scan")
            .with_field("description", "Repeated SYN packets")
            .with_field("blank", "   ")
    }

    #[test]
    fn prompt_includes_present_columns_in_order() {
        let builder = PromptBuilder::new(vec![
            "description".into(),
            "title".into(),
            "blank".into(),
        ])
        .with_definitions(false);
        let prompt = builder.prompt(&incident());
        assert!(prompt.starts_with("\n        You are a security expert.\n"));
        assert!(prompt.ends_with(
            "Description:\n            ``` [description]: [Repeated SYN packets] [title]: [Port scan]\
             \n            ```"
        ));
        assert!(!prompt.contains("[blank]"));
    }

    #[test]
    fn prompt_layout_matches_earlier_runs() {
        let prompt = PromptBuilder::new(vec!["title".into()])
            .with_definitions(false)
            .prompt(&incident());
        assert_eq!(
            prompt,
            "\n        You are a security expert.\
             \n        Categorize the following incident description into a Category and an Explanation.\
             \n\
             \n        Description:\
             \n            ``` [title]: [Port scan]\
             \n            ```"
        );
    }

    #[test]
    fn definitions_are_appended_when_enabled() {
        let prompt = PromptBuilder::new(vec!["title".into()]).prompt(&incident());
        assert!(prompt.contains("NIST Categories Available for Classification:"));
        assert!(prompt.contains("- CAT12:"));
    }

    #[test]
    fn incident_info_marks_missing_values() {
        let builder = PromptBuilder::new(vec!["title".into(), "blank".into(), "nope".into()]);
        assert_eq!(
            builder.incident_info(&incident()),
            "title: Port scan / blank: [missing] / nope: [missing]"
        );
    }

    #[tokio::test]
    async fn missing_id_falls_back_to_row_index() {
        let model = Fixed("Category: CAT12\nExplanation: scan");
        let runner = IncidentRunner::new(&model, Technique::ProgressiveHint)
            .with_columns(vec!["title".into()])
            .with_params(TechniqueParams {
                max_iter: Some(0),
                ..Default::default()
            });

        let incidents = vec![
            incident(),
            Incident::new(None).with_field("title", "x"),
            Incident::new(Some("  ".into())),
        ];
        let records = runner.run(&incidents).await;
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["INC-1", "row_1", "row_2"]);
        assert_eq!(records[2].incident_info, "title: [missing]");
    }

    #[test]
    fn outcome_flattens() {
        let failed = RowOutcome::Failed(ClassificationRecord::failed("a", "", "x"));
        assert_eq!(failed.into_records().len(), 1);
        assert!(RowOutcome::Classified(Vec::new()).into_records().is_empty());
    }
}
