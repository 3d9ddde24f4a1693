//! Model-call plumbing below the [`ModelClient`](crate::model::ModelClient):
//!
//! - [`retry`]: transient error detection (429, 5xx, network timeouts)
//!   with exponential backoff. Never retries 400/401 errors.
//! - [`metrics`]: run ids, per-model pricing, cumulative token/cost
//!   tracking, and the optional JSONL interaction log.

pub mod metrics;
pub mod retry;

pub use metrics::{CostTracker, MetricsSnapshot, RunMetrics, generate_run_id, pricing_for_model};
pub use retry::RetryConfig;
