//! Registry of execution contexts
//!
//! Contexts are registered lazily on first use and never removed. Lookup by
//! name goes through a sharded `DashMap`; lookup by id and iteration use the
//! registration-ordered list.

use crate::transient::TransientState;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::sync::Arc;
use tracestate_core::ContextId;

/// One registered context and its ongoing state
#[derive(Debug)]
pub struct ContextHandle {
    id: ContextId,
    name: String,
    state: Mutex<TransientState>,
}

impl ContextHandle {
    /// Registration id
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Context name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lock the ongoing state of this context
    pub fn state(&self) -> MutexGuard<'_, TransientState> {
        self.state.lock()
    }
}

/// Name-indexed, registration-ordered set of contexts
#[derive(Debug, Default)]
pub struct ContextRegistry {
    ordered: RwLock<Vec<Arc<ContextHandle>>>,
    by_name: DashMap<String, Arc<ContextHandle>>,
}

impl ContextRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Context registered under `name`
    pub fn get(&self, name: &str) -> Option<Arc<ContextHandle>> {
        self.by_name.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Context with registration id `id`
    pub fn by_id(&self, id: ContextId) -> Option<Arc<ContextHandle>> {
        self.ordered.read().get(id.index()).cloned()
    }

    /// Context registered under `name`, registering it with a state built by
    /// `init` if absent
    ///
    /// Registration is serialized so ids follow registration order exactly.
    pub fn get_or_register<F>(&self, name: &str, init: F) -> Arc<ContextHandle>
    where
        F: FnOnce(ContextId) -> TransientState,
    {
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let mut ordered = self.ordered.write();
        if let Some(existing) = self.get(name) {
            return existing;
        }
        let id = ContextId::new(ordered.len() as u32);
        let handle = Arc::new(ContextHandle {
            id,
            name: name.to_string(),
            state: Mutex::new(init(id)),
        });
        ordered.push(Arc::clone(&handle));
        self.by_name.insert(name.to_string(), Arc::clone(&handle));
        handle
    }

    /// Every context in registration order
    pub fn all(&self) -> Vec<Arc<ContextHandle>> {
        self.ordered.read().clone()
    }

    /// Context names in registration order
    pub fn names(&self) -> Vec<String> {
        self.ordered.read().iter().map(|h| h.name.clone()).collect()
    }

    /// Number of registered contexts
    pub fn len(&self) -> usize {
        self.ordered.read().len()
    }

    /// Check if no context is registered
    pub fn is_empty(&self) -> bool {
        self.ordered.read().is_empty()
    }
}
