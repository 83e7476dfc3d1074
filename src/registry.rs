//! Per-runtime service registry.
//!
//! String-keyed slots for shared resources such as bound class constructors
//! (`"<class>:ctor"`) and the pre-resolved JSON helpers. The registry holds
//! its own reference to each value; draining it never destroys a value a
//! registrant still holds.

use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;
use tracing::trace;

/// A registry slot value
pub type Slot = Arc<dyn Any + Send + Sync>;

/// Registry key under which `JSON.stringify` is kept
pub const JSON_STRINGIFY_KEY: &str = "json:stringify";

/// Registry key under which `JSON.parse` is kept
pub const JSON_PARSE_KEY: &str = "json:parse";

/// Key of the constructor slot for a bound class: `"Session"` → `"session:ctor"`
pub fn constructor_key(class: &str) -> String {
    format!("{}:ctor", class.to_ascii_lowercase())
}

/// String-keyed service slots
#[derive(Default)]
pub struct ServiceRegistry {
    slots: DashMap<String, Slot>,
}

impl ServiceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a slot
    pub fn get(&self, id: &str) -> Option<Slot> {
        self.slots.get(id).map(|slot| slot.value().clone())
    }

    /// Look up a slot holding a `T`
    pub fn get_as<T: Any + Send + Sync>(&self, id: &str) -> Option<Arc<T>> {
        self.get(id)?.downcast::<T>().ok()
    }

    /// Store a value. The last writer wins; the previous value is returned.
    pub fn set(&self, id: impl Into<String>, value: Slot) -> Option<Slot> {
        let id = id.into();
        trace!(id = %id, "Registry slot set");
        self.slots.insert(id, value)
    }

    /// Whether a slot exists
    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Remove every slot, handing the registry's references back
    pub fn drain(&self) -> Vec<(String, Slot)> {
        let keys: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        keys.into_iter()
            .filter_map(|key| self.slots.remove(&key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructor_key() {
        assert_eq!(constructor_key("Session"), "session:ctor");
        assert_eq!(constructor_key("Script"), "script:ctor");
    }

    #[test]
    fn test_typed_lookup() {
        let registry = ServiceRegistry::new();
        registry.set("answer", Arc::new(42u32));

        assert_eq!(registry.get_as::<u32>("answer").as_deref(), Some(&42));
        assert!(registry.get_as::<String>("answer").is_none());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_last_writer_wins() {
        let registry = ServiceRegistry::new();
        assert!(registry.set("slot", Arc::new(1u8)).is_none());
        let previous = registry.set("slot", Arc::new(2u8)).unwrap();

        assert_eq!(previous.downcast_ref::<u8>(), Some(&1));
        assert_eq!(registry.get_as::<u8>("slot").as_deref(), Some(&2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_drain_does_not_destroy_registrant_values() {
        let registry = ServiceRegistry::new();
        let owned = Arc::new(String::from("kept"));
        registry.set("owned", owned.clone());

        let drained = registry.drain();
        assert_eq!(drained.len(), 1);
        drop(drained);

        assert!(registry.is_empty());
        assert_eq!(Arc::strong_count(&owned), 1);
        assert_eq!(owned.as_str(), "kept");
    }
}
