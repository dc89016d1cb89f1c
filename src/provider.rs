use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::token::Token;

/// User-supplied lifecycle hooks for one component.
///
/// Every hook defaults to a no-op so components only implement the phases
/// they care about. Hook errors surface as `hook-failed` with the anyhow
/// error attached as the source.
#[async_trait]
pub trait Component: Send + Sync + 'static {
    async fn on_create(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// How a component instance is produced when its layer starts.
///
/// Providers are synchronous by construction: async work belongs inside
/// lifecycle hooks, not here. Resolution happens exactly once per
/// orchestration run, before the component's `create` hook.
pub enum Provider {
    /// A ready-made instance.
    Value(Arc<dyn Component>),
    /// A capturing factory closure.
    Factory(Box<dyn Fn() -> Arc<dyn Component> + Send + Sync>),
    /// A plain constructor function.
    Constructor(fn() -> Arc<dyn Component>),
}

impl Provider {
    pub fn resolve(&self) -> Arc<dyn Component> {
        match self {
            Provider::Value(component) => component.clone(),
            Provider::Factory(factory) => factory(),
            Provider::Constructor(constructor) => constructor(),
        }
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Value(_) => f.write_str("Provider::Value"),
            Provider::Factory(_) => f.write_str("Provider::Factory"),
            Provider::Constructor(_) => f.write_str("Provider::Constructor"),
        }
    }
}

/// Per-phase hook timeout overrides for one registration.
///
/// `None` falls through to the orchestrator default, then to
/// [`crate::lifecycle::DEFAULT_HOOK_TIMEOUT`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HookTimeouts {
    pub on_create: Option<Duration>,
    pub on_start: Option<Duration>,
    pub on_stop: Option<Duration>,
    pub on_destroy: Option<Duration>,
}

impl HookTimeouts {
    /// The same ceiling for every hook.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            on_create: Some(timeout),
            on_start: Some(timeout),
            on_stop: Some(timeout),
            on_destroy: Some(timeout),
        }
    }
}

/// One entry in the dependency graph: a token, how to build the component
/// behind it, and the tokens it depends on.
#[derive(Debug)]
pub struct Registration {
    pub token: Token,
    pub provider: Provider,
    pub dependencies: Vec<Token>,
    pub timeouts: HookTimeouts,
}

impl Registration {
    pub fn new(token: Token, provider: Provider) -> Self {
        Self {
            token,
            provider,
            dependencies: Vec::new(),
            timeouts: HookTimeouts::default(),
        }
    }

    pub fn depends_on(mut self, dependencies: impl IntoIterator<Item = Token>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    pub fn with_timeouts(mut self, timeouts: HookTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}
