use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::provider::Registration;
use crate::token::Token;

/// Teardown hook invoked when the registry's contents are destroyed.
pub type TeardownFn = Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Keyed registration store with parent-chain fallback.
///
/// Lookups miss locally before consulting the parent, so a child registry
/// can shadow nothing and still see everything the parent registered.
/// Registration order is preserved for deterministic layering.
pub struct ComponentRegistry {
    entries: DashMap<Token, Arc<Registration>>,
    order: Mutex<Vec<Token>>,
    parent: Option<Arc<ComponentRegistry>>,
    teardown: Mutex<Option<TeardownFn>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(Vec::new()),
            parent: None,
            teardown: Mutex::new(None),
        }
    }

    pub fn with_parent(parent: Arc<ComponentRegistry>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new()
        }
    }

    /// Register an entry, failing fast on a duplicate token.
    pub fn register(&self, registration: Registration) -> Result<()> {
        let token = registration.token.clone();
        if self.entries.contains_key(&token) {
            return Err(OrchestratorError::DuplicateRegistration {
                description: token.description().to_string(),
            });
        }
        debug!(token = %token, deps = registration.dependencies.len(), "registering component");
        self.entries.insert(token.clone(), Arc::new(registration));
        self.order.lock().push(token);
        Ok(())
    }

    /// Look up a registration locally, falling back to the parent chain.
    pub fn lookup(&self, token: &Token) -> Option<Arc<Registration>> {
        match self.entries.get(token) {
            Some(entry) => Some(entry.value().clone()),
            None => self.parent.as_ref().and_then(|p| p.lookup(token)),
        }
    }

    /// Tokens registered locally, in registration order.
    pub fn tokens(&self) -> Vec<Token> {
        self.order.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Install the store's own teardown, run last during `destroy`.
    pub fn set_teardown(&self, teardown: TeardownFn) {
        *self.teardown.lock() = Some(teardown);
    }

    pub(crate) fn take_teardown(&self) -> Option<TeardownFn> {
        self.teardown.lock().take()
    }

    /// Drop all local registrations. The parent chain is untouched.
    pub fn clear(&self) {
        self.entries.clear();
        self.order.lock().clear();
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
