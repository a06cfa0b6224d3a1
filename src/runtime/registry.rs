//! Registry of live sessions using slab allocation.
//!
//! Slots are reused after removal, so every handle carries the generation of
//! the slot it was issued for. A handle whose session has been removed never
//! matches a later occupant of the same slot, which makes `remove` safe to
//! call more than once.

use slab::Slab;

/// Generations wrap within 31 bits so they fit a mio token alongside the index.
pub(crate) const GENERATION_MASK: u32 = 0x7FFF_FFFF;

/// Stable identifier for a registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    index: usize,
    generation: u32,
}

impl SessionHandle {
    pub(crate) fn new(index: usize, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slab index of the slot.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Generation of the slot when this handle was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    generation: u32,
    value: T,
}

/// Arena of sessions addressed by `SessionHandle`.
///
/// Provides O(1) insert, lookup, and remove operations.
pub struct SessionRegistry<T> {
    slots: Slab<Slot<T>>,
    next_generation: u32,
}

impl<T> SessionRegistry<T> {
    /// Create an empty registry with room for `capacity` sessions.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Slab::with_capacity(capacity),
            next_generation: 0,
        }
    }

    /// Insert a value and return its handle.
    pub fn insert(&mut self, value: T) -> SessionHandle {
        self.insert_with(|_| value)
    }

    /// Insert a value built from its own handle.
    pub fn insert_with(&mut self, f: impl FnOnce(SessionHandle) -> T) -> SessionHandle {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1) & GENERATION_MASK;

        let entry = self.slots.vacant_entry();
        let handle = SessionHandle::new(entry.key(), generation);
        entry.insert(Slot {
            generation,
            value: f(handle),
        });
        handle
    }

    pub fn get(&self, handle: SessionHandle) -> Option<&T> {
        self.slots
            .get(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .map(|slot| &slot.value)
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index)
            .filter(|slot| slot.generation == handle.generation)
            .map(|slot| &mut slot.value)
    }

    pub fn contains(&self, handle: SessionHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Remove a value. Removing a stale handle is a no-op.
    pub fn remove(&mut self, handle: SessionHandle) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        Some(self.slots.remove(handle.index).value)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Handles of all live sessions.
    #[cfg(test)]
    pub(crate) fn handles(&self) -> Vec<SessionHandle> {
        self.slots
            .iter()
            .map(|(index, slot)| SessionHandle::new(index, slot.generation))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_remove() {
        let mut registry = SessionRegistry::with_capacity(4);

        let a = registry.insert("a");
        let b = registry.insert("b");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(a), Some(&"a"));

        assert_eq!(registry.remove(a), Some("a"));
        assert!(!registry.contains(a));
        assert!(registry.contains(b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_double_remove_is_noop() {
        let mut registry = SessionRegistry::with_capacity(4);
        let a = registry.insert(1);

        assert_eq!(registry.remove(a), Some(1));
        assert_eq!(registry.remove(a), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stale_handle_does_not_hit_reused_slot() {
        let mut registry = SessionRegistry::with_capacity(1);
        let old = registry.insert("old");
        registry.remove(old);

        let new = registry.insert("new");
        assert_eq!(new.index(), old.index()); // Slab reuses slots
        assert_ne!(new.generation(), old.generation());

        assert_eq!(registry.remove(old), None);
        assert_eq!(registry.get(new), Some(&"new"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insert_with_sees_own_handle() {
        let mut registry = SessionRegistry::with_capacity(2);
        let handle = registry.insert_with(|h| h);
        assert_eq!(registry.get(handle), Some(&handle));
        assert_eq!(registry.handles(), vec![handle]);
    }
}
