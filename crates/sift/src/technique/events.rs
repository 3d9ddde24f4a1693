//! Events and handlers for technique and batch runs.
//!
//! Techniques and the [`IncidentRunner`](crate::runner::IncidentRunner)
//! report what they are doing through [`TechniqueEvent`] variants: every
//! model call, every convergence score, and how each row ended. Callers
//! implement [`EventHandler`] to observe them for logging, progress
//! output, or test assertions.
//!
//! # Choosing an event handler
//!
//! | Handler | Use case |
//! |---------|----------|
//! | [`NoopHandler`] | Tests or fire-and-forget runs |
//! | [`LoggingHandler`] | Structured logging via `tracing` |
//! | [`ProgressHandler`] | One `info!` line per finished row |
//! | [`FnEventHandler`] | Quick closures for simple callbacks |
//! | [`CompositeEventHandler`] | Compose multiple handlers in order |

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, error, info};

use super::ClassificationRecord;

// ── Events ─────────────────────────────────────────────────────────

/// Events emitted while classifying incidents.
#[derive(Debug)]
pub enum TechniqueEvent<'a> {
    /// The runner is starting row `index` of `total`.
    RowStarted {
        index: usize,
        total: usize,
        incident_id: &'a str,
    },
    /// A technique is about to call the model.
    ModelCall {
        mode: &'static str,
        incident_id: &'a str,
        prompt_chars: usize,
    },
    /// Two consecutive answers were compared.
    Scored {
        mode: &'static str,
        incident_id: &'a str,
        iteration: u32,
        previous: &'a str,
        current: &'a str,
        score: f64,
    },
    /// The score reached the threshold and the loop stopped early.
    Converged {
        mode: &'static str,
        incident_id: &'a str,
        iteration: u32,
        score: f64,
    },
    /// The loop ran out of iterations without converging.
    CeilingReached {
        mode: &'static str,
        incident_id: &'a str,
        max_iter: u32,
    },
    /// The technique returned an error; the row becomes an `ERROR` record.
    RowFailed {
        index: usize,
        incident_id: &'a str,
        error: &'a str,
    },
    /// A row produced its records.
    RowFinished {
        index: usize,
        total: usize,
        incident_id: &'a str,
        records: &'a [ClassificationRecord],
    },
}

/// Handler for technique and runner events.
///
/// Events are informational; the default implementation ignores them.
///
/// # Example
///
/// ```ignore
/// struct Tally(AtomicUsize);
///
/// impl EventHandler for Tally {
///     fn on_event(&self, event: &TechniqueEvent<'_>) {
///         if let TechniqueEvent::ModelCall { .. } = event {
///             self.0.fetch_add(1, Ordering::Relaxed);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &TechniqueEvent<'_>) {
        let _ = event;
    }
}

/// Ignores every event.
pub struct NoopHandler;
impl EventHandler for NoopHandler {}

/// An event handler backed by a closure.
///
/// ```ignore
/// let handler = FnEventHandler::new(|event| {
///     if let TechniqueEvent::Converged { iteration, .. } = event {
///         println!("converged after {iteration}");
///     }
/// });
/// ```
pub struct FnEventHandler<F>(F)
where
    F: Fn(&TechniqueEvent<'_>) + Send + Sync;

impl<F> FnEventHandler<F>
where
    F: Fn(&TechniqueEvent<'_>) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventHandler for FnEventHandler<F>
where
    F: Fn(&TechniqueEvent<'_>) + Send + Sync,
{
    fn on_event(&self, event: &TechniqueEvent<'_>) {
        (self.0)(event)
    }
}

/// Dispatches every event to each inner handler in registration order.
///
/// ```ignore
/// let handler = CompositeEventHandler::new()
///     .with(LoggingHandler)
///     .with_if(!quiet, ProgressHandler::new());
/// ```
pub struct CompositeEventHandler {
    handlers: Vec<Box<dyn EventHandler>>,
}

impl CompositeEventHandler {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the chain.
    pub fn with(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Add a handler only when `condition` is true.
    pub fn with_if(self, condition: bool, handler: impl EventHandler + 'static) -> Self {
        if condition { self.with(handler) } else { self }
    }

    /// Add a handler from an `Option`. `None` is a no-op.
    pub fn with_opt(self, handler: Option<impl EventHandler + 'static>) -> Self {
        match handler {
            Some(h) => self.with(h),
            None => self,
        }
    }
}

impl Default for CompositeEventHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHandler for CompositeEventHandler {
    fn on_event(&self, event: &TechniqueEvent<'_>) {
        for handler in &self.handlers {
            handler.on_event(event);
        }
    }
}

/// Logs events via `tracing`.
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn on_event(&self, event: &TechniqueEvent<'_>) {
        match event {
            TechniqueEvent::RowStarted {
                index,
                total,
                incident_id,
            } => {
                debug!("[{}/{total}] classifying incident {incident_id}", index + 1);
            }
            TechniqueEvent::ModelCall {
                mode,
                incident_id,
                prompt_chars,
            } => {
                debug!("[{mode}] {incident_id}: sending {prompt_chars} chars");
            }
            TechniqueEvent::Scored {
                mode,
                incident_id,
                iteration,
                previous,
                current,
                score,
            } => {
                debug!(
                    "[{mode}] {incident_id} iteration {iteration}: '{previous}' -> '{current}' \
                     (score {score:.3})"
                );
            }
            TechniqueEvent::Converged {
                mode,
                incident_id,
                iteration,
                score,
            } => {
                debug!("[{mode}] {incident_id} converged at iteration {iteration} ({score:.3})");
            }
            TechniqueEvent::CeilingReached {
                mode,
                incident_id,
                max_iter,
            } => {
                debug!("[{mode}] {incident_id} hit the iteration ceiling ({max_iter})");
            }
            TechniqueEvent::RowFailed {
                index,
                incident_id,
                error: e,
            } => {
                error!("Row {index} ({incident_id}) failed: {e}");
            }
            TechniqueEvent::RowFinished {
                incident_id,
                records,
                ..
            } => {
                let categories: Vec<&str> = records.iter().map(|r| r.category.as_str()).collect();
                debug!("Incident {incident_id}: {}", categories.join(", "));
            }
        }
    }
}

/// Prints an `info!` line each time a row finishes.
#[derive(Default)]
pub struct ProgressHandler {
    done: AtomicUsize,
}

impl ProgressHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows finished so far, failed ones included.
    pub fn finished(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }
}

impl EventHandler for ProgressHandler {
    fn on_event(&self, event: &TechniqueEvent<'_>) {
        if let TechniqueEvent::RowFinished {
            total,
            incident_id,
            records,
            ..
        } = event
        {
            let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
            let category = records.first().map_or("-", |r| r.category.as_str());
            info!("[{done}/{total}] {incident_id}: {category}");
        }
    }
}
