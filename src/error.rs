use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::lifecycle::LifecycleState;

/// Phase of an orchestration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Start,
    Stop,
    Destroy,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Stop => "stop",
            Phase::Destroy => "destroy",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a failure was produced relative to the orchestration flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureContext {
    /// During the phase the caller asked for.
    Normal,
    /// While rolling back already-started components after a start failure.
    Rollback,
    /// While tearing down the registration store itself.
    Container,
}

/// Provider shapes rejected at registration time.
///
/// The `Provider` sum type makes asynchronous providers unrepresentable in
/// this crate; the variants exist so downstream callers can branch on the
/// same stable code across implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderShape {
    AsyncValue,
    AsyncFactory,
    DeferredFactory,
}

/// One component's failure inside an orchestrated phase.
#[derive(Debug, Clone, Serialize)]
pub struct FailureDetail {
    pub token_description: String,
    pub phase: Phase,
    pub context: FailureContext,
    pub timed_out: bool,
    pub duration_ms: u64,
    pub error: String,
}

impl FailureDetail {
    pub fn from_error(
        token_description: impl Into<String>,
        phase: Phase,
        context: FailureContext,
        elapsed: Duration,
        error: &OrchestratorError,
    ) -> Self {
        Self {
            token_description: token_description.into(),
            phase,
            context,
            timed_out: error.is_timeout(),
            duration_ms: elapsed.as_millis() as u64,
            error: error.to_string(),
        }
    }
}

/// Errors produced by the layering, runner, lifecycle and orchestration
/// layers. Each variant maps to a stable code via [`OrchestratorError::code`].
#[derive(Error, Debug)]
pub enum OrchestratorError {
    // Graph validation errors: fail fast, never aggregated.
    #[error("unknown dependency: {dependent} depends on {dependency}, which is not registered")]
    UnknownDependency {
        dependent: String,
        dependency: String,
    },

    #[error("cycle detected in dependency graph involving: {tokens:?}")]
    CycleDetected { tokens: Vec<String> },

    #[error("duplicate registration for token: {description}")]
    DuplicateRegistration { description: String },

    #[error("async provider rejected for {description}: {shape:?}")]
    AsyncProviderRejected {
        description: String,
        shape: ProviderShape,
    },

    #[error("start invoked while {active} component instance(s) from a previous run are live")]
    AlreadyStarted { active: usize },

    // Per-component transition errors.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("hook {hook} timed out after {timeout:?} for component {description}")]
    HookTimedOut {
        description: String,
        hook: &'static str,
        timeout: Duration,
    },

    #[error("hook {hook} failed for component {description}: {source}")]
    HookFailed {
        description: String,
        hook: &'static str,
        #[source]
        source: anyhow::Error,
    },

    // Phase aggregates: one per failed phase invocation.
    #[error("errors during start: {} component failure(s)", .details.len())]
    StartAggregate { details: Vec<FailureDetail> },

    #[error("errors during stop: {} component failure(s)", .details.len())]
    StopAggregate { details: Vec<FailureDetail> },

    #[error("errors during destroy: {} component failure(s)", .details.len())]
    DestroyAggregate { details: Vec<FailureDetail> },

    // Batch runner and FIFO errors.
    #[error("queue capacity exceeded: {capacity}")]
    QueueCapacityExceeded { capacity: usize },

    #[error("batch aborted by cancellation signal")]
    QueueAborted,

    #[error("task {index} exceeded its timeout of {timeout:?}")]
    QueueTaskTimeout { index: usize, timeout: Duration },

    #[error("shared deadline of {deadline:?} exceeded with {pending} task(s) unfinished")]
    QueueDeadlineExceeded { deadline: Duration, pending: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Stable code for the error category. Downstream callers branch on
    /// these rather than on display strings.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownDependency { .. } => "unknown-dependency",
            Self::CycleDetected { .. } => "cycle-detected",
            Self::DuplicateRegistration { .. } => "duplicate-registration",
            Self::AsyncProviderRejected { .. } => "async-provider-rejected",
            Self::AlreadyStarted { .. } => "already-started",
            Self::InvalidTransition { .. } => "invalid-transition",
            Self::HookTimedOut { .. } => "hook-timed-out",
            Self::HookFailed { .. } => "hook-failed",
            Self::StartAggregate { .. } => "aggregate-start-errors",
            Self::StopAggregate { .. } => "aggregate-stop-errors",
            Self::DestroyAggregate { .. } => "aggregate-destroy-errors",
            Self::QueueCapacityExceeded { .. } => "queue-capacity-exceeded",
            Self::QueueAborted => "queue-aborted",
            Self::QueueTaskTimeout { .. } => "queue-task-timeout",
            Self::QueueDeadlineExceeded { .. } => "queue-deadline-exceeded",
            Self::InvalidConfiguration(_) => "invalid-configuration",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether the error represents an elapsed time budget.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::HookTimedOut { .. }
                | Self::QueueTaskTimeout { .. }
                | Self::QueueDeadlineExceeded { .. }
        )
    }

    /// Failure details carried by a phase aggregate, if any.
    pub fn details(&self) -> Option<&[FailureDetail]> {
        match self {
            Self::StartAggregate { details }
            | Self::StopAggregate { details }
            | Self::DestroyAggregate { details } => Some(details),
            _ => None,
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
