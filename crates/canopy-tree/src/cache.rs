// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Named memoization slots with dirty bits.
//!
//! A [`CacheManager`] knows nothing about services or trees. Owners register
//! slots, store computed values into them, and mark them dirty when their
//! inputs change. A dirty slot keeps its last value (readable through
//! [`CacheManager::get`]) but [`CacheManager::get_if_clean`] refuses it.

#[derive(Debug, Clone)]
struct Slot<V> {
    data: Option<V>,
    dirty: bool,
}

/// Per-owner set of named cache slots.
///
/// Slots live in registration order; owners hold a handful of them, so a
/// linear scan beats hashing here.
#[derive(Debug, Clone)]
pub struct CacheManager<K, V> {
    slots: Vec<(K, Slot<V>)>,
}

impl<K, V> Default for CacheManager<K, V> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<K: PartialEq, V> CacheManager<K, V> {
    /// Create a manager with the given slots registered (all dirty).
    pub fn with_slots(names: impl IntoIterator<Item = K>) -> Self {
        let mut cache = Self::default();
        for name in names {
            cache.add_slot(name);
        }
        cache
    }

    /// Register a slot. New slots start dirty with no data.
    ///
    /// Registering an existing name resets that slot.
    pub fn add_slot(&mut self, name: K) {
        let fresh = Slot {
            data: None,
            dirty: true,
        };
        match self.slot_mut(&name) {
            Some(slot) => *slot = fresh,
            None => self.slots.push((name, fresh)),
        }
    }

    /// Flag one slot as stale. Unknown names are ignored.
    pub fn mark_dirty(&mut self, name: &K) {
        if let Some(slot) = self.slot_mut(name) {
            slot.dirty = true;
        }
    }

    /// Flag every slot as stale.
    pub fn mark_all_dirty(&mut self) {
        for (_, slot) in &mut self.slots {
            slot.dirty = true;
        }
    }

    /// Store `data` and clear the dirty bit. Registers the slot if needed.
    pub fn cache(&mut self, name: K, data: V) {
        match self.slot_mut(&name) {
            Some(slot) => {
                slot.data = Some(data);
                slot.dirty = false;
            }
            None => self.slots.push((
                name,
                Slot {
                    data: Some(data),
                    dirty: false,
                },
            )),
        }
    }

    /// Last stored value, stale or not.
    pub fn get(&self, name: &K) -> Option<&V> {
        self.slot(name).and_then(|slot| slot.data.as_ref())
    }

    /// Stored value, only if the slot is clean.
    pub fn get_if_clean(&self, name: &K) -> Option<&V> {
        self.slot(name)
            .filter(|slot| !slot.dirty)
            .and_then(|slot| slot.data.as_ref())
    }

    /// Whether `name` is dirty. Unknown names report `false`.
    pub fn is_dirty(&self, name: &K) -> bool {
        self.slot(name).is_some_and(|slot| slot.dirty)
    }

    /// Whether at least one slot is dirty.
    pub fn any_dirty(&self) -> bool {
        self.slots.iter().any(|(_, slot)| slot.dirty)
    }

    fn slot(&self, name: &K) -> Option<&Slot<V>> {
        self.slots.iter().find(|(k, _)| k == name).map(|(_, s)| s)
    }

    fn slot_mut(&mut self, name: &K) -> Option<&mut Slot<V>> {
        self.slots
            .iter_mut()
            .find(|(k, _)| k == name)
            .map(|(_, s)| s)
    }
}
