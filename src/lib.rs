//! # Strata: deterministic component-lifecycle orchestration
//!
//! Given a set of named components with declared dependencies, strata
//! computes a safe execution order (Kahn layering with stable input
//! order), drives each component through a fixed state machine
//! (created → started → stopped → destroyed), runs each layer with bounded
//! concurrency and per-hook timeouts, and rolls back cleanly when a phase
//! fails partway through.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use strata::{
//!     Component, Orchestrator, OrchestratorConfig, Provider, Registration, Token,
//! };
//!
//! struct Database;
//! impl Component for Database {}
//!
//! struct Server;
//! impl Component for Server {}
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Token::new("db");
//!     let server = Token::new("server");
//!
//!     let orchestrator = Orchestrator::new(
//!         OrchestratorConfig::builder().concurrency(4).build()?,
//!     );
//!     orchestrator
//!         .start(vec![
//!             Registration::new(db.clone(), Provider::Value(Arc::new(Database))),
//!             Registration::new(server, Provider::Value(Arc::new(Server)))
//!                 .depends_on([db]),
//!         ])
//!         .await?;
//!
//!     orchestrator.stop().await?;
//!     orchestrator.destroy().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fifo;
pub mod layers;
pub mod lifecycle;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod runner;
pub mod telemetry;
pub mod token;

pub use config::{OrchestratorConfig, OrchestratorConfigBuilder};
pub use error::{
    FailureContext, FailureDetail, OrchestratorError, Phase, ProviderShape, Result,
};
pub use fifo::Fifo;
pub use layers::{compute, group, LayerNode};
pub use lifecycle::{
    Lifecycle, LifecycleEvent, LifecycleEventKind, LifecycleOp, LifecycleState, Subscription,
    TransitionFilter, TransitionHook, TransitionInfo, DEFAULT_HOOK_TIMEOUT,
};
pub use orchestrator::Orchestrator;
pub use provider::{Component, HookTimeouts, Provider, Registration};
pub use registry::{ComponentRegistry, TeardownFn};
pub use runner::{run, RunOptions, TaskFuture};
pub use telemetry::{LayerOutcome, LogTelemetry, PhaseSnapshot, Telemetry, Tracer};
pub use token::Token;
