//! Registry mapping stable entity class names to behaviours.
//!
//! Lookup is keyed by the string class name persisted in entity and signal
//! rows, never by a Rust type. The registry is plain instance state handed to
//! the runtime builder; nothing is registered globally.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{Behaviour, MachineError};

/// Maps entity class names to their [`Behaviour`].
#[derive(Default, Clone)]
pub struct BehaviourRegistry {
    behaviours: HashMap<String, Arc<dyn Behaviour>>,
}

impl BehaviourRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `behaviour` for `class`, replacing any previous registration.
    pub fn register(&mut self, class: impl Into<String>, behaviour: Arc<dyn Behaviour>) {
        self.behaviours.insert(class.into(), behaviour);
    }

    /// Builder-style [`BehaviourRegistry::register`].
    pub fn with(mut self, class: impl Into<String>, behaviour: Arc<dyn Behaviour>) -> Self {
        self.register(class, behaviour);
        self
    }

    /// Resolve the behaviour for `class`.
    pub fn resolve(&self, class: &str) -> Result<Arc<dyn Behaviour>, MachineError> {
        self.behaviours
            .get(class)
            .cloned()
            .ok_or_else(|| MachineError::UnknownClass(class.to_string()))
    }

    /// Registered class names, in no particular order.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.behaviours.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for BehaviourRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BehaviourRegistry")
            .field("classes", &self.behaviours.keys().collect::<Vec<_>>())
            .finish()
    }
}
