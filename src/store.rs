//! Out-of-band per-entity state, kept in an explicit identity-keyed map.
//!
//! The bridges attach derived state (cached single-flight producers) to
//! entities they do not own. Rather than hiding fields on the entity type,
//! each bridge owns one store per operation kind; get-or-create is atomic
//! under the store lock so concurrent first access cannot start two
//! platform operations.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::entity::EntityId;

/// A concurrency-safe map from entity identity to one derived value.
///
/// Reading an absent key yields `None`, never an error. The store holds
/// plain values and introduces no entity ownership; callers keep entries
/// meaningful by evicting them when the associated work terminates.
#[derive(Debug)]
pub(crate) struct EntityStateStore<V> {
    slots: Mutex<HashMap<EntityId, V>>,
}

impl<V> EntityStateStore<V> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Current value for the entity, if any.
    pub fn get(&self, id: EntityId) -> Option<V>
    where
        V: Clone,
    {
        self.slots.lock().unwrap().get(&id).cloned()
    }

    /// Replace the value for the entity.
    pub fn set(&self, id: EntityId, value: V) {
        self.slots.lock().unwrap().insert(id, value);
    }

    /// Atomic get-or-create.
    ///
    /// `reuse` decides whether an existing entry is still live (e.g. a weak
    /// producer reference that still upgrades); a dead entry is replaced by
    /// `make` under the same lock acquisition.
    pub fn get_or_insert_with<T>(
        &self,
        id: EntityId,
        reuse: impl Fn(&V) -> Option<T>,
        make: impl FnOnce() -> (V, T),
    ) -> T {
        let mut slots = self.slots.lock().unwrap();
        if let Some(existing) = slots.get(&id) {
            if let Some(live) = reuse(existing) {
                return live;
            }
        }
        let (value, out) = make();
        slots.insert(id, value);
        out
    }

    /// Remove the entry if `matches` says it is the one the caller created.
    ///
    /// A terminal failure must evict its own cache entry without clobbering
    /// a newer producer that may already have replaced it.
    pub fn remove_if(&self, id: EntityId, matches: impl Fn(&V) -> bool) -> bool {
        let mut slots = self.slots.lock().unwrap();
        if slots.get(&id).is_some_and(&matches) {
            slots.remove(&id);
            return true;
        }
        false
    }

    /// Drop entries that `dead` classifies as no longer live.
    pub fn purge(&self, dead: impl Fn(&V) -> bool) {
        self.slots.lock().unwrap().retain(|_, v| !dead(v));
    }
}
