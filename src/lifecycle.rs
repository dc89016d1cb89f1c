use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use crate::error::{OrchestratorError, Result};
use crate::provider::{Component, HookTimeouts};

/// Hook budget applied when neither the registration nor the orchestrator
/// supplies an override.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_millis(5000);

/// Lifecycle position of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Created,
    Started,
    Stopped,
    Destroyed,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::Started => write!(f, "started"),
            LifecycleState::Stopped => write!(f, "stopped"),
            LifecycleState::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// The four transition operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOp {
    Create,
    Start,
    Stop,
    Destroy,
}

impl LifecycleOp {
    pub fn hook_name(&self) -> &'static str {
        match self {
            LifecycleOp::Create => "on_create",
            LifecycleOp::Start => "on_start",
            LifecycleOp::Stop => "on_stop",
            LifecycleOp::Destroy => "on_destroy",
        }
    }
}

/// Snapshot of a transition handed to the cross-cutting transition hook.
#[derive(Debug, Clone, Copy)]
pub struct TransitionInfo {
    pub op: LifecycleOp,
    pub from: LifecycleState,
    pub to: LifecycleState,
}

/// Notification delivered to subscribed observers.
#[derive(Debug, Clone)]
pub struct LifecycleEvent {
    pub component: String,
    pub kind: LifecycleEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEventKind {
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    Created,
    Started,
    Stopped,
    Destroyed,
}

type ObserverFn = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;
type ObserverMap = Mutex<HashMap<u64, ObserverFn>>;

/// Unsubscribe handle returned by [`Lifecycle::subscribe`].
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    id: u64,
    observers: Weak<ObserverMap>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(observers) = self.observers.upgrade() {
            observers.lock().remove(&self.id);
        }
    }
}

/// Cross-cutting hook run on approved transitions, sharing the primary
/// hook's timeout budget.
pub type TransitionHook =
    Box<dyn Fn(TransitionInfo) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Filter deciding whether the transition hook runs; defaults to always.
pub type TransitionFilter = Box<dyn Fn(&TransitionInfo) -> bool + Send + Sync>;

struct StateCell {
    state: LifecycleState,
    // `create` runs its hook exactly once; the flag distinguishes a fresh
    // instance from one whose on_create already ran.
    initialized: bool,
}

/// Per-component state machine: created → started → stopped → destroyed,
/// with stopped → started permitted (restart) and destroyed terminal.
///
/// Hooks run under a timeout before the state commits; a failed or
/// timed-out hook leaves the state unchanged. A timed-out hook is only
/// abandoned from the orchestrator's point of view: the user future cannot
/// be forcibly terminated and may still complete its side effects after
/// this instance has already reported failure.
///
/// Transitions on one instance are serialized: a concurrent call waits for
/// the in-flight transition to finish and then validates against the
/// committed state, so a hook never runs twice for the same transition.
pub struct Lifecycle {
    description: String,
    component: Arc<dyn Component>,
    timeouts: HookTimeouts,
    default_timeout: Duration,
    // Held across validate, hooks and commit so check-then-act stays atomic.
    gate: AsyncMutex<()>,
    cell: Mutex<StateCell>,
    transition_filter: Option<TransitionFilter>,
    transition_hook: Option<TransitionHook>,
    observers: Arc<ObserverMap>,
    next_observer_id: AtomicU64,
}

impl Lifecycle {
    pub fn new(description: impl Into<String>, component: Arc<dyn Component>) -> Self {
        Self {
            description: description.into(),
            component,
            timeouts: HookTimeouts::default(),
            default_timeout: DEFAULT_HOOK_TIMEOUT,
            gate: AsyncMutex::new(()),
            cell: Mutex::new(StateCell {
                state: LifecycleState::Created,
                initialized: false,
            }),
            transition_filter: None,
            transition_hook: None,
            observers: Arc::new(Mutex::new(HashMap::new())),
            next_observer_id: AtomicU64::new(0),
        }
    }

    /// Per-phase timeout overrides for this instance.
    pub fn with_timeouts(mut self, timeouts: HookTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Fallback budget used where no per-phase override applies.
    pub fn with_default_timeout(mut self, default_timeout: Duration) -> Self {
        self.default_timeout = default_timeout;
        self
    }

    /// Install a cross-cutting transition hook with an optional filter.
    pub fn with_transition_hook(
        mut self,
        filter: Option<TransitionFilter>,
        hook: TransitionHook,
    ) -> Self {
        self.transition_filter = filter;
        self.transition_hook = Some(hook);
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> LifecycleState {
        self.cell.lock().state
    }

    /// Register an observer; the handle is the only way to unregister.
    pub fn subscribe(
        &self,
        observer: impl Fn(&LifecycleEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().insert(id, Arc::new(observer));
        Subscription {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Run the `on_create` hook. Valid exactly once, on a fresh instance.
    pub async fn create(&self) -> Result<()> {
        self.transition(LifecycleOp::Create).await
    }

    /// Transition to `started`, from `created` or `stopped` (restart).
    pub async fn start(&self) -> Result<()> {
        self.transition(LifecycleOp::Start).await
    }

    /// Transition to `stopped`, from `started` only. Stopping an
    /// already-stopped instance is an invalid transition.
    pub async fn stop(&self) -> Result<()> {
        self.transition(LifecycleOp::Stop).await
    }

    /// Transition to `destroyed`. Idempotent once destroyed; the hook is
    /// not re-run. Clears all observer subscriptions as its last step.
    pub async fn destroy(&self) -> Result<()> {
        self.transition(LifecycleOp::Destroy).await
    }

    async fn transition(&self, op: LifecycleOp) -> Result<()> {
        let _gate = self.gate.lock().await;
        let (from, to) = match self.validate(op)? {
            Some(transition) => transition,
            // Repeated destroy: silent no-op.
            None => return Ok(()),
        };

        let budget = self.effective_timeout(op);
        let begun = Instant::now();
        self.run_hook(op, budget).await?;

        let info = TransitionInfo { op, from, to };
        if let Some(hook) = &self.transition_hook {
            let approved = self
                .transition_filter
                .as_ref()
                .map(|filter| filter(&info))
                .unwrap_or(true);
            if approved {
                // The transition hook shares the primary hook's budget, it
                // does not get a fresh one.
                let remaining = budget.saturating_sub(begun.elapsed());
                match timeout(remaining, hook(info)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(source)) => {
                        return Err(OrchestratorError::HookFailed {
                            description: self.description.clone(),
                            hook: "on_transition",
                            source,
                        })
                    }
                    Err(_) => {
                        return Err(OrchestratorError::HookTimedOut {
                            description: self.description.clone(),
                            hook: "on_transition",
                            timeout: budget,
                        })
                    }
                }
            } else {
                trace!(component = %self.description, ?op, "transition hook filtered out");
            }
        }

        {
            let mut cell = self.cell.lock();
            cell.state = to;
            if op == LifecycleOp::Create {
                cell.initialized = true;
            }
        }
        debug!(component = %self.description, %from, %to, "state transition");

        self.emit(LifecycleEventKind::StateChanged { from, to });
        self.emit(match op {
            LifecycleOp::Create => LifecycleEventKind::Created,
            LifecycleOp::Start => LifecycleEventKind::Started,
            LifecycleOp::Stop => LifecycleEventKind::Stopped,
            LifecycleOp::Destroy => LifecycleEventKind::Destroyed,
        });

        if op == LifecycleOp::Destroy {
            self.observers.lock().clear();
        }
        Ok(())
    }

    /// Validate `op` against the current state. `Ok(None)` marks the
    /// idempotent repeated-destroy case.
    fn validate(&self, op: LifecycleOp) -> Result<Option<(LifecycleState, LifecycleState)>> {
        use LifecycleState::*;

        let cell = self.cell.lock();
        let from = cell.state;
        let allowed = match (op, from) {
            (LifecycleOp::Create, Created) if !cell.initialized => Some(Created),
            (LifecycleOp::Start, Created) | (LifecycleOp::Start, Stopped) => Some(Started),
            (LifecycleOp::Stop, Started) => Some(Stopped),
            (LifecycleOp::Destroy, Created) | (LifecycleOp::Destroy, Stopped) => Some(Destroyed),
            (LifecycleOp::Destroy, Destroyed) => return Ok(None),
            _ => None,
        };

        match allowed {
            Some(to) => Ok(Some((from, to))),
            None => Err(OrchestratorError::InvalidTransition {
                from,
                to: match op {
                    LifecycleOp::Create => Created,
                    LifecycleOp::Start => Started,
                    LifecycleOp::Stop => Stopped,
                    LifecycleOp::Destroy => Destroyed,
                },
            }),
        }
    }

    async fn run_hook(&self, op: LifecycleOp, budget: Duration) -> Result<()> {
        let hook = match op {
            LifecycleOp::Create => self.component.on_create(),
            LifecycleOp::Start => self.component.on_start(),
            LifecycleOp::Stop => self.component.on_stop(),
            LifecycleOp::Destroy => self.component.on_destroy(),
        };

        match timeout(budget, hook).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(OrchestratorError::HookFailed {
                description: self.description.clone(),
                hook: op.hook_name(),
                source,
            }),
            Err(_) => Err(OrchestratorError::HookTimedOut {
                description: self.description.clone(),
                hook: op.hook_name(),
                timeout: budget,
            }),
        }
    }

    fn effective_timeout(&self, op: LifecycleOp) -> Duration {
        let override_for = match op {
            LifecycleOp::Create => self.timeouts.on_create,
            LifecycleOp::Start => self.timeouts.on_start,
            LifecycleOp::Stop => self.timeouts.on_stop,
            LifecycleOp::Destroy => self.timeouts.on_destroy,
        };
        override_for.unwrap_or(self.default_timeout)
    }

    fn emit(&self, kind: LifecycleEventKind) {
        let event = LifecycleEvent {
            component: self.description.clone(),
            kind,
        };
        // Invoke outside the lock so a callback may subscribe or
        // unsubscribe on this same instance.
        let observers: Vec<ObserverFn> = self.observers.lock().values().cloned().collect();
        for observer in &observers {
            observer(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    #[derive(Default)]
    struct Probe {
        creates: AtomicUsize,
        starts: AtomicUsize,
        stops: AtomicUsize,
        destroys: AtomicUsize,
        start_delay: Option<Duration>,
        fail_start: bool,
    }

    #[async_trait::async_trait]
    impl Component for Probe {
        async fn on_create(&self) -> anyhow::Result<()> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_start(&self) -> anyhow::Result<()> {
            if let Some(delay) = self.start_delay {
                sleep(delay).await;
            }
            if self.fail_start {
                anyhow::bail!("refusing to start");
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_stop(&self) -> anyhow::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_destroy(&self) -> anyhow::Result<()> {
            self.destroys.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn lifecycle_with(probe: Arc<Probe>) -> Lifecycle {
        Lifecycle::new("probe", probe)
    }

    #[tokio::test]
    async fn full_lifecycle_path() {
        let probe = Arc::new(Probe::default());
        let lifecycle = lifecycle_with(probe.clone());

        lifecycle.create().await.unwrap();
        lifecycle.start().await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Started);
        lifecycle.stop().await.unwrap();
        lifecycle.start().await.unwrap(); // restart is legal
        lifecycle.stop().await.unwrap();
        lifecycle.destroy().await.unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Destroyed);

        assert_eq!(probe.creates.load(Ordering::SeqCst), 1);
        assert_eq!(probe.starts.load(Ordering::SeqCst), 2);
        assert_eq!(probe.stops.load(Ordering::SeqCst), 2);
        assert_eq!(probe.destroys.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_transitions_fail_without_running_hooks() {
        let probe = Arc::new(Probe::default());
        let lifecycle = lifecycle_with(probe.clone());
        lifecycle.create().await.unwrap();

        let err = lifecycle.stop().await.unwrap_err();
        assert_eq!(err.code(), "invalid-transition");
        assert_eq!(probe.stops.load(Ordering::SeqCst), 0);

        // Second create is invalid too.
        let err = lifecycle.create().await.unwrap_err();
        assert_eq!(err.code(), "invalid-transition");
        assert_eq!(probe.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_on_stopped_is_invalid() {
        let lifecycle = lifecycle_with(Arc::new(Probe::default()));
        lifecycle.create().await.unwrap();
        lifecycle.start().await.unwrap();
        lifecycle.stop().await.unwrap();

        let err = lifecycle.stop().await.unwrap_err();
        assert_eq!(err.code(), "invalid-transition");
        assert_eq!(lifecycle.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn failed_hook_leaves_state_unchanged() {
        let probe = Arc::new(Probe {
            fail_start: true,
            ..Default::default()
        });
        let lifecycle = lifecycle_with(probe);
        lifecycle.create().await.unwrap();

        let err = lifecycle.start().await.unwrap_err();
        assert_eq!(err.code(), "hook-failed");
        assert_eq!(lifecycle.state(), LifecycleState::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_hook_times_out() {
        let probe = Arc::new(Probe {
            start_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let lifecycle = lifecycle_with(probe).with_timeouts(HookTimeouts {
            on_start: Some(Duration::from_millis(10)),
            ..Default::default()
        });
        lifecycle.create().await.unwrap();

        let err = lifecycle.start().await.unwrap_err();
        assert_eq!(err.code(), "hook-timed-out");
        assert!(err.is_timeout());
        assert_eq!(lifecycle.state(), LifecycleState::Created);
    }

    #[tokio::test]
    async fn concurrent_starts_serialize_to_one_winner() {
        let probe = Arc::new(Probe {
            start_delay: Some(Duration::from_millis(20)),
            ..Default::default()
        });
        let lifecycle = Arc::new(lifecycle_with(probe.clone()));
        lifecycle.create().await.unwrap();

        let first = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.start().await })
        };
        let second = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.start().await })
        };
        let outcomes = [first.await.unwrap(), second.await.unwrap()];

        // Exactly one call wins; the other validates against the committed
        // state and fails without running the hook again.
        let losers: Vec<&'static str> = outcomes
            .iter()
            .filter_map(|outcome| outcome.as_ref().err().map(|err| err.code()))
            .collect();
        assert_eq!(losers, vec!["invalid-transition"]);
        assert_eq!(probe.starts.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.state(), LifecycleState::Started);
    }

    #[tokio::test]
    async fn destroy_is_idempotent_and_clears_observers() {
        let probe = Arc::new(Probe::default());
        let lifecycle = lifecycle_with(probe.clone());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let _sub = lifecycle.subscribe(move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        lifecycle.create().await.unwrap();
        lifecycle.destroy().await.unwrap();
        let after_destroy = seen.load(Ordering::SeqCst);
        assert!(after_destroy > 0);

        // Second destroy: no error, no hook, no events.
        lifecycle.destroy().await.unwrap();
        assert_eq!(probe.destroys.load(Ordering::SeqCst), 1);
        assert_eq!(seen.load(Ordering::SeqCst), after_destroy);
    }

    #[tokio::test]
    async fn destroy_legal_from_created() {
        let probe = Arc::new(Probe::default());
        let lifecycle = lifecycle_with(probe.clone());
        lifecycle.create().await.unwrap();
        lifecycle.destroy().await.unwrap();
        assert_eq!(probe.destroys.load(Ordering::SeqCst), 1);

        // But not from started.
        let probe = Arc::new(Probe::default());
        let lifecycle = lifecycle_with(probe);
        lifecycle.create().await.unwrap();
        lifecycle.start().await.unwrap();
        let err = lifecycle.destroy().await.unwrap_err();
        assert_eq!(err.code(), "invalid-transition");
    }

    #[tokio::test]
    async fn events_emitted_in_order() {
        let lifecycle = lifecycle_with(Arc::new(Probe::default()));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = lifecycle.subscribe(move |event| {
            sink.lock().push(event.kind.clone());
        });

        lifecycle.create().await.unwrap();
        lifecycle.start().await.unwrap();

        let seen = events.lock().clone();
        assert_eq!(
            seen,
            vec![
                LifecycleEventKind::StateChanged {
                    from: LifecycleState::Created,
                    to: LifecycleState::Created,
                },
                LifecycleEventKind::Created,
                LifecycleEventKind::StateChanged {
                    from: LifecycleState::Created,
                    to: LifecycleState::Started,
                },
                LifecycleEventKind::Started,
            ]
        );
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let lifecycle = lifecycle_with(Arc::new(Probe::default()));
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let sub = lifecycle.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        lifecycle.create().await.unwrap();
        let after_create = seen.load(Ordering::SeqCst);
        sub.unsubscribe();
        lifecycle.start().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), after_create);
    }

    #[tokio::test]
    async fn observer_may_subscribe_from_its_callback() {
        let lifecycle = Arc::new(lifecycle_with(Arc::new(Probe::default())));
        let late = Arc::new(AtomicUsize::new(0));

        let handle = lifecycle.clone();
        let counter = late.clone();
        let armed = Arc::new(AtomicUsize::new(0));
        let once = armed.clone();
        let _sub = lifecycle.subscribe(move |_| {
            if once.fetch_add(1, Ordering::SeqCst) == 0 {
                let counter = counter.clone();
                handle.subscribe(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        lifecycle.create().await.unwrap();
        lifecycle.start().await.unwrap();
        // The nested subscription took effect and receives later events.
        assert!(late.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn transition_hook_shares_budget() {
        let probe = Arc::new(Probe {
            start_delay: Some(Duration::from_millis(40)),
            ..Default::default()
        });
        let hook: TransitionHook = Box::new(|_info| {
            Box::pin(async {
                sleep(Duration::from_millis(40)).await;
                Ok(())
            })
        });
        let lifecycle = lifecycle_with(probe)
            .with_timeouts(HookTimeouts::uniform(Duration::from_millis(60)))
            .with_transition_hook(None, hook);

        lifecycle.create().await.unwrap();
        // Primary hook eats ~40ms of the 60ms budget; the transition hook
        // needs another 40ms and must time out.
        let err = lifecycle.start().await.unwrap_err();
        assert_eq!(err.code(), "hook-timed-out");
        assert_eq!(lifecycle.state(), LifecycleState::Created);
    }

    #[tokio::test]
    async fn transition_filter_gates_hook() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let hook: TransitionHook = Box::new(move |_info| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        let filter: TransitionFilter = Box::new(|info| info.op == LifecycleOp::Start);
        let lifecycle = lifecycle_with(Arc::new(Probe::default()))
            .with_transition_hook(Some(filter), hook);

        lifecycle.create().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        lifecycle.start().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
