use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex as SyncMutex;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::OrchestratorConfig;
use crate::error::{FailureContext, FailureDetail, OrchestratorError, Phase, Result};
use crate::layers::{self, LayerNode};
use crate::lifecycle::{Lifecycle, LifecycleState, DEFAULT_HOOK_TIMEOUT};
use crate::provider::Registration;
use crate::registry::ComponentRegistry;
use crate::runner::{self, RunOptions, TaskFuture};
use crate::telemetry::{LayerOutcome, LogTelemetry, PhaseSnapshot, Telemetry, Tracer};
use crate::token::Token;

type Collector = Arc<SyncMutex<Vec<FailureDetail>>>;

/// Per-run mutable state: the layering snapshot and the live lifecycle
/// instances keyed by token.
#[derive(Default)]
struct RunState {
    layers: Vec<Vec<Token>>,
    instances: HashMap<Token, Arc<Lifecycle>>,
}

/// Drives registered components through start/stop/destroy phases.
///
/// Composes the layer engine, lifecycle state machines and batch runner:
/// each phase walks the layering (forward for start, reverse for stop and
/// destroy) one layer at a time, executing that layer's hooks concurrently
/// under the configured cap. A start failure rolls back everything already
/// started before one aggregate error is raised; stop and destroy run to
/// completion and aggregate at the end.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<ComponentRegistry>,
    telemetry: Arc<dyn Telemetry>,
    tracer: Option<Arc<dyn Tracer>>,
    run: Mutex<RunState>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_registry(config, Arc::new(ComponentRegistry::new()))
    }

    /// Use an existing registration store, e.g. one with a parent chain.
    pub fn with_registry(config: OrchestratorConfig, registry: Arc<ComponentRegistry>) -> Self {
        Self {
            config,
            registry,
            telemetry: Arc::new(LogTelemetry),
            tracer: None,
            run: Mutex::new(RunState::default()),
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    /// Register the graph and start every component, layer by layer.
    ///
    /// A run is exclusive: while instances from a previous `start` are
    /// live, calling `start` again fails with `already-started` before
    /// touching the registry. `destroy` ends the run and allows a fresh
    /// `start`.
    ///
    /// Fails fast on graph errors (duplicate registration, unknown
    /// dependency, cycle) before any hook runs. A hook failure mid-phase
    /// stops successfully started components in reverse layer order and
    /// raises `aggregate-start-errors` carrying every failure detail,
    /// normal context first, rollback context after. Never returns a
    /// partial success.
    pub async fn start(&self, registrations: Vec<Registration>) -> Result<()> {
        self.config.validate()?;
        let mut run = self.run.lock().await;
        if !run.instances.is_empty() {
            return Err(OrchestratorError::AlreadyStarted {
                active: run.instances.len(),
            });
        }

        for registration in registrations {
            self.registry.register(registration)?;
        }

        let nodes = self.graph_nodes()?;
        let computed = layers::compute(&nodes)?;
        if let Some(tracer) = &self.tracer {
            tracer.on_layers(&computed);
        }
        self.telemetry.log_trace(
            "orchestrator.layers",
            json!(computed
                .iter()
                .map(|layer| layer.iter().map(Token::description).collect::<Vec<_>>())
                .collect::<Vec<_>>()),
        );
        run.layers = computed.clone();

        let collector: Collector = Arc::new(SyncMutex::new(Vec::new()));
        for (layer_index, layer) in computed.iter().enumerate() {
            let mut tasks = Vec::with_capacity(layer.len());
            for token in layer {
                let registration = self.registry.lookup(token).ok_or_else(|| {
                    OrchestratorError::internal(format!("registration missing for {token}"))
                })?;
                let component = registration.provider.resolve();
                let lifecycle = Arc::new(
                    Lifecycle::new(token.description(), component)
                        .with_timeouts(registration.timeouts)
                        .with_default_timeout(
                            self.config.default_hook_timeout.unwrap_or(DEFAULT_HOOK_TIMEOUT),
                        ),
                );
                run.instances.insert(token.clone(), lifecycle.clone());
                tasks.push(phase_task(
                    lifecycle,
                    Phase::Start,
                    FailureContext::Normal,
                    collector.clone(),
                    self.telemetry.clone(),
                ));
            }

            let batch = runner::run(tasks, &self.batch_options()).await;
            let failed = self.digest_batch(
                Phase::Start,
                FailureContext::Normal,
                layer_index,
                layer,
                batch,
                &collector,
            );
            if failed {
                warn!(layer = layer_index, "start failed, rolling back started components");
                self.run_phase_batches(&run, Phase::Stop, FailureContext::Rollback, &collector)
                    .await;
                let details = std::mem::take(&mut *collector.lock());
                self.telemetry.log_event(
                    "start.failed",
                    json!({ "layer": layer_index, "failures": details.len() }),
                );
                return Err(OrchestratorError::StartAggregate { details });
            }
        }

        info!(
            components = run.instances.len(),
            layers = run.layers.len(),
            "all components started"
        );
        Ok(())
    }

    /// Stop every currently-started component in reverse layer order.
    ///
    /// Every reverse layer gets its chance even when an earlier one
    /// failed; failures aggregate into one `aggregate-stop-errors` at the
    /// end.
    pub async fn stop(&self) -> Result<()> {
        let run = self.run.lock().await;
        let collector: Collector = Arc::new(SyncMutex::new(Vec::new()));
        self.run_phase_batches(&run, Phase::Stop, FailureContext::Normal, &collector)
            .await;

        let details = std::mem::take(&mut *collector.lock());
        if details.is_empty() {
            info!("all components stopped");
            Ok(())
        } else {
            Err(OrchestratorError::StopAggregate { details })
        }
    }

    /// Stop anything still started, destroy every component in reverse
    /// layer order, then run the registration store's own teardown.
    ///
    /// All three steps continue through failures; one
    /// `aggregate-destroy-errors` merges the stop details, the destroy
    /// details and the container teardown outcome.
    pub async fn destroy(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        let collector: Collector = Arc::new(SyncMutex::new(Vec::new()));

        self.run_phase_batches(&run, Phase::Stop, FailureContext::Normal, &collector)
            .await;
        self.run_phase_batches(&run, Phase::Destroy, FailureContext::Normal, &collector)
            .await;

        if let Some(teardown) = self.registry.take_teardown() {
            let begun = Instant::now();
            if let Err(source) = teardown().await {
                collector.lock().push(FailureDetail {
                    token_description: "registry".into(),
                    phase: Phase::Destroy,
                    context: FailureContext::Container,
                    timed_out: false,
                    duration_ms: begun.elapsed().as_millis() as u64,
                    error: source.to_string(),
                });
            }
        }

        self.registry.clear();
        run.instances.clear();
        run.layers.clear();

        let details = std::mem::take(&mut *collector.lock());
        if details.is_empty() {
            info!("all components destroyed");
            Ok(())
        } else {
            Err(OrchestratorError::DestroyAggregate { details })
        }
    }

    /// Lifecycle state of one component, if it has an instance this run.
    pub async fn state_of(&self, token: &Token) -> Option<LifecycleState> {
        let run = self.run.lock().await;
        run.instances.get(token).map(|lifecycle| lifecycle.state())
    }

    /// Tokens currently in the `started` state, in layer order.
    pub async fn started_tokens(&self) -> Vec<Token> {
        let run = self.run.lock().await;
        phase_candidates(&run, Phase::Stop)
    }

    /// Snapshot of the layering computed by the last `start`.
    pub async fn layers(&self) -> Vec<Vec<Token>> {
        self.run.lock().await.layers.clone()
    }

    /// Run one teardown-direction phase (stop or destroy) over every
    /// eligible component, batch by reverse layer, continuing through
    /// failures.
    async fn run_phase_batches(
        &self,
        run: &RunState,
        phase: Phase,
        context: FailureContext,
        collector: &Collector,
    ) {
        let eligible = phase_candidates(run, phase);
        if eligible.is_empty() {
            return;
        }

        // Rollback must reach every component: no shared deadline there.
        let opts = match context {
            FailureContext::Rollback => RunOptions {
                concurrency: self.config.concurrency,
                ..Default::default()
            },
            _ => self.batch_options(),
        };

        for (batch_index, batch) in layers::group(&eligible, &run.layers).into_iter().enumerate() {
            let tasks: Vec<TaskFuture<LayerOutcome>> = batch
                .iter()
                .filter_map(|token| run.instances.get(token).cloned())
                .map(|lifecycle| {
                    phase_task(
                        lifecycle,
                        phase,
                        context,
                        collector.clone(),
                        self.telemetry.clone(),
                    )
                })
                .collect();

            let result = runner::run(tasks, &opts).await;
            self.digest_batch(phase, context, batch_index, &batch, result, collector);
        }
    }

    /// Fold one batch result into telemetry, tracer output and the failure
    /// collector. Returns whether the batch produced any failure.
    fn digest_batch(
        &self,
        phase: Phase,
        context: FailureContext,
        layer_index: usize,
        batch: &[Token],
        result: Result<Vec<Result<LayerOutcome>>>,
        collector: &Collector,
    ) -> bool {
        match result {
            Ok(slots) => {
                let failed = slots.iter().any(|slot| slot.is_err());
                let outcomes: Vec<LayerOutcome> = batch
                    .iter()
                    .zip(&slots)
                    .map(|(token, slot)| match slot {
                        Ok(outcome) => outcome.clone(),
                        Err(_) => LayerOutcome {
                            token: token.description().to_string(),
                            ok: false,
                            duration_ms: 0,
                        },
                    })
                    .collect();
                if let Some(tracer) = &self.tracer {
                    tracer.on_phase(&PhaseSnapshot {
                        phase,
                        layer_index,
                        outcomes: outcomes.clone(),
                    });
                }
                self.telemetry.log_event(
                    "phase.layer.completed",
                    json!({
                        "phase": phase.as_str(),
                        "layer": layer_index,
                        "ok": !failed,
                        "components": outcomes.len(),
                    }),
                );
                debug!(phase = %phase, layer = layer_index, ok = !failed, "layer completed");
                failed
            }
            Err(batch_error) => {
                // Deadline or abort: tasks that already failed have their
                // details collected; record one detail for the batch-level
                // cut itself.
                let elapsed = match &batch_error {
                    OrchestratorError::QueueDeadlineExceeded { deadline, .. } => *deadline,
                    _ => std::time::Duration::ZERO,
                };
                collector.lock().push(FailureDetail::from_error(
                    format!("layer {layer_index}"),
                    phase,
                    context,
                    elapsed,
                    &batch_error,
                ));
                self.telemetry.log_event(
                    "phase.layer.aborted",
                    json!({
                        "phase": phase.as_str(),
                        "layer": layer_index,
                        "code": batch_error.code(),
                    }),
                );
                true
            }
        }
    }

    fn graph_nodes(&self) -> Result<Vec<LayerNode>> {
        self.registry
            .tokens()
            .into_iter()
            .map(|token| {
                let registration = self.registry.lookup(&token).ok_or_else(|| {
                    OrchestratorError::internal(format!("registration missing for {token}"))
                })?;
                Ok(LayerNode::new(token, registration.dependencies.clone()))
            })
            .collect()
    }

    fn batch_options(&self) -> RunOptions {
        RunOptions {
            concurrency: self.config.concurrency,
            deadline: self.config.layer_deadline,
            ..Default::default()
        }
    }
}

/// Which instances a teardown-direction phase applies to, in layer order.
fn phase_candidates(run: &RunState, phase: Phase) -> Vec<Token> {
    run.layers
        .iter()
        .flatten()
        .filter(|token| {
            run.instances
                .get(token)
                .map(|lifecycle| match phase {
                    Phase::Stop => lifecycle.state() == LifecycleState::Started,
                    Phase::Destroy => lifecycle.state() != LifecycleState::Destroyed,
                    Phase::Start => false,
                })
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// One component's unit of work inside a phase batch: run the transition,
/// record a failure detail on error, report a duration metric either way.
fn phase_task(
    lifecycle: Arc<Lifecycle>,
    phase: Phase,
    context: FailureContext,
    collector: Collector,
    telemetry: Arc<dyn Telemetry>,
) -> TaskFuture<LayerOutcome> {
    async move {
        let begun = Instant::now();
        let result = match phase {
            Phase::Start => {
                match lifecycle.create().await {
                    Ok(()) => lifecycle.start().await,
                    Err(err) => Err(err),
                }
            }
            Phase::Stop => lifecycle.stop().await,
            Phase::Destroy => lifecycle.destroy().await,
        };
        let elapsed = begun.elapsed();
        telemetry.log_metric(
            "hook.duration_ms",
            elapsed.as_millis() as f64,
            &[("phase", phase.as_str())],
        );

        match result {
            Ok(()) => Ok(LayerOutcome {
                token: lifecycle.description().to_string(),
                ok: true,
                duration_ms: elapsed.as_millis() as u64,
            }),
            Err(err) => {
                collector.lock().push(FailureDetail::from_error(
                    lifecycle.description(),
                    phase,
                    context,
                    elapsed,
                    &err,
                ));
                Err(err)
            }
        }
    }
    .boxed()
}
