//! Convenience re-exports for common `sift` types.
//!
//! ```ignore
//! use sift::prelude::*;
//! ```
//!
//! Covers a typical batch run: config, model client, incident loading,
//! the runner, and event handlers. Scorer internals, prompt templates and
//! the raw chat client stay in their modules.

// ── Classification ──────────────────────────────────────────────────
pub use crate::classify::{Category, ConvergenceScorer, Extraction, extract};

// ── Models ──────────────────────────────────────────────────────────
pub use crate::api::{RetryConfig, RunMetrics};
pub use crate::model::{FailurePolicy, ModelClient, ModelInvoker, SendOptions};

// ── Techniques and runs ─────────────────────────────────────────────
pub use crate::config::ExperimentConfig;
pub use crate::io::{OutputFormat, load_incidents, save_results, validate_columns};
pub use crate::runner::{Incident, IncidentRunner, RowOutcome};
pub use crate::technique::events::{
    CompositeEventHandler, EventHandler, FnEventHandler, LoggingHandler, NoopHandler,
    ProgressHandler, TechniqueEvent,
};
pub use crate::technique::{ClassificationRecord, Technique, TechniqueParams};
