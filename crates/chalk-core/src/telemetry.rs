//! Fire-and-forget error and breadcrumb reporting.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Structured context attached to a capture (record id, attempt count, ...)
pub type Context = BTreeMap<String, String>;

/// Build a [`Context`] from string pairs.
pub fn context<'a>(pairs: impl IntoIterator<Item = (&'a str, String)>) -> Context {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Telemetry sink. Implementations must never block or fail the caller.
pub trait Telemetry: Send + Sync {
    fn capture_exception(&self, error: &str, context: Context);

    fn breadcrumb(&self, category: &str, message: &str);
}

/// Routes telemetry into `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn capture_exception(&self, error: &str, context: Context) {
        tracing::error!(target: "chalk::telemetry", ?context, "{error}");
    }

    fn breadcrumb(&self, category: &str, message: &str) {
        tracing::debug!(target: "chalk::telemetry", category, "{message}");
    }
}

/// A captured telemetry event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    Exception { error: String, context: Context },
    Breadcrumb { category: String, message: String },
}

/// Records every event in memory; used by tests and the CLI's dry runs.
#[derive(Debug, Default, Clone)]
pub struct MemoryTelemetry {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn exceptions(&self) -> Vec<(String, Context)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TelemetryEvent::Exception { error, context } => Some((error, context)),
                _ => None,
            })
            .collect()
    }

    pub fn breadcrumbs(&self, category: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TelemetryEvent::Breadcrumb {
                    category: recorded,
                    message,
                } if recorded == category => Some(message),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: TelemetryEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl Telemetry for MemoryTelemetry {
    fn capture_exception(&self, error: &str, context: Context) {
        self.push(TelemetryEvent::Exception {
            error: error.to_string(),
            context,
        });
    }

    fn breadcrumb(&self, category: &str, message: &str) {
        self.push(TelemetryEvent::Breadcrumb {
            category: category.to_string(),
            message: message.to_string(),
        });
    }
}
