//! The type registry: the process-wide `(type, name) -> Checkable` map (spec
//! §3, §9 "Global state"). Read-heavy, so backed by `dashmap` rather than a
//! single `RwLock<HashMap<_>>` around the whole table.

use std::sync::Arc;

use dashmap::DashMap;
use watchmesh_types::CheckableRef;

use crate::checkable::Checkable;
use crate::event_bus::EventBus;

/// The process-wide `(type, name) -> Checkable` map, plus the single
/// [`EventBus`] every checkable in it is wired to. Every `Checkable`
/// constructed for this registry should be built with `registry.events()`
/// so the composition root can subscribe once and see every signal in the
/// process (spec §9 "Global state").
pub struct TypeRegistry {
    checkables: DashMap<CheckableRef, Arc<Checkable>>,
    events: EventBus,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self {
            checkables: DashMap::new(),
            events: EventBus::new(),
        }
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared bus every checkable in this registry publishes to. Clone
    /// it to construct a new `Checkable`, or `.subscribe()` it to observe
    /// every signal in the process.
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn insert(&self, checkable: Arc<Checkable>) {
        self.checkables.insert(checkable.reference.clone(), checkable);
    }

    pub fn get(&self, reference: &CheckableRef) -> Option<Arc<Checkable>> {
        self.checkables.get(reference).map(|entry| entry.clone())
    }

    pub fn remove(&self, reference: &CheckableRef) -> Option<Arc<Checkable>> {
        self.checkables.remove(reference).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.checkables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Arc<Checkable>> + '_ {
        self.checkables.iter().map(|entry| entry.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkable::CheckableConfig;
    use crate::event_bus::EventBus;

    #[test]
    fn insert_then_get_round_trips() {
        let registry = TypeRegistry::new();
        let reference = CheckableRef::host("web1");
        let checkable = Arc::new(Checkable::new(reference.clone(), CheckableConfig::default(), EventBus::new()));
        registry.insert(checkable);
        assert!(registry.get(&reference).is_some());
        assert_eq!(registry.len(), 1);
    }
}
