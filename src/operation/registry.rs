// src/operation/registry.rs

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::{DummyOperation, Operation, ShellOperation};
use crate::config::model::OperationSection;

/// Operation implementations keyed by [`Operation::id`].
#[derive(Clone, Default)]
pub struct OperationRegistry {
    operations: BTreeMap<String, Arc<dyn Operation>>,
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("operations", &self.operations.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `dummy` and `shell` operations, using the
    /// `[operation.*]` sections as their reference configs.
    pub fn with_builtins(section: &OperationSection) -> Self {
        Self::new()
            .with(DummyOperation::new(section.dummy.clone()))
            .with(ShellOperation::new(section.shell.clone()))
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, operation: impl Operation + 'static) -> Self {
        self.register(Arc::new(operation));
        self
    }

    /// Add an operation, replacing any previous one with the same id.
    pub fn register(&mut self, operation: Arc<dyn Operation>) {
        let id = operation.id().to_string();
        debug!(operation = %id, "registering operation");
        self.operations.insert(id, operation);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.operations.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.operations.keys().map(|s| s.as_str())
    }
}
