use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::Phase;
use crate::token::Token;

/// Fire-and-forget telemetry sink. Implementations must never block or
/// fail the orchestration path.
pub trait Telemetry: Send + Sync {
    fn log_event(&self, name: &str, payload: Value);
    fn log_metric(&self, name: &str, value: f64, tags: &[(&str, &str)]);
    fn log_trace(&self, name: &str, payload: Value);
}

/// Per-token outcome of one completed layer.
#[derive(Debug, Clone, Serialize)]
pub struct LayerOutcome {
    pub token: String,
    pub ok: bool,
    pub duration_ms: u64,
}

/// Observational snapshot delivered to a [`Tracer`] after each layer.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseSnapshot {
    pub phase: Phase,
    pub layer_index: usize,
    pub outcomes: Vec<LayerOutcome>,
}

/// Purely observational collaborator: sees the computed layering once per
/// run and each completed layer as phases progress.
pub trait Tracer: Send + Sync {
    fn on_layers(&self, layers: &[Vec<Token>]);
    fn on_phase(&self, snapshot: &PhaseSnapshot);
}

/// Default telemetry backed by the `tracing` macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn log_event(&self, name: &str, payload: Value) {
        debug!(target: "strata::telemetry", event = name, %payload);
    }

    fn log_metric(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        debug!(target: "strata::telemetry", metric = name, value, ?tags);
    }

    fn log_trace(&self, name: &str, payload: Value) {
        trace!(target: "strata::telemetry", trace = name, %payload);
    }
}
