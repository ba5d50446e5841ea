//! Advisory binding descriptors.
//!
//! Bindings record which cells a device reads and writes so that tools can
//! draw the reactive graph. They reflect the real subscriptions but do not
//! control them: removing a binding never cancels anything.

use std::sync::{Mutex, PoisonError};

use labhub_domain::id::BindingId;

use crate::cell::CellId;

/// One edge of the reactive graph, as declared by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// A cell exposed as a named property.
    Property { property: String, cell: CellId },
    /// A cell observed inside the device scope.
    State { cell: CellId },
    /// An action with the cells it reads and writes.
    Action {
        action: String,
        reads: Vec<CellId>,
        writes: Vec<CellId>,
    },
}

#[derive(Debug, Default)]
pub struct BindingRegistry {
    entries: Mutex<Vec<(BindingId, Binding)>>,
}

impl BindingRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, binding: Binding) -> BindingId {
        let id = BindingId::new();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, binding));
        id
    }

    /// Remove a binding. Returns `false` when the id is unknown.
    pub fn unregister(&self, id: BindingId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// Bindings in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(BindingId, Binding)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_keep_bindings_in_registration_order() {
        let registry = BindingRegistry::new();
        let first = CellId::next();
        let second = CellId::next();
        registry.register(Binding::State { cell: first });
        registry.register(Binding::Property {
            property: "x".to_string(),
            cell: second,
        });

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].1, Binding::State { cell: first });
    }

    #[test]
    fn should_unregister_by_id() {
        let registry = BindingRegistry::new();
        let id = registry.register(Binding::State { cell: CellId::next() });

        assert!(registry.unregister(id));
        assert!(registry.is_empty());
        assert!(!registry.unregister(id));
    }
}
