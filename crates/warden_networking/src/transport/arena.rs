//! # Connection Arena
//!
//! Slot storage addressed by [`PeerHandle`]s.
//!
//! A handle is an index plus the generation of the slot it was issued for.
//! Freeing a slot bumps its generation, so a handle kept past removal stops
//! resolving instead of aliasing whatever reuses the slot.

use std::fmt;

/// Opaque reference to one peer connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerHandle {
    index: u32,
    generation: u32,
}

impl PeerHandle {
    /// Slot index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation the handle was issued for.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational slot arena.
#[derive(Debug)]
pub struct ConnectionArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> ConnectionArena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Number of live values.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if nothing is stored.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores a value, reusing a free slot when one exists.
    pub fn insert(&mut self, value: T) -> PeerHandle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return PeerHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        PeerHandle {
            index,
            generation: 0,
        }
    }

    /// Returns true if `handle` resolves to a live value.
    #[must_use]
    pub fn contains(&self, handle: PeerHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Value for `handle`, unless the handle is stale.
    #[must_use]
    pub fn get(&self, handle: PeerHandle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Mutable value for `handle`, unless the handle is stale.
    pub fn get_mut(&mut self, handle: PeerHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Removes and returns the value, invalidating `handle`.
    pub fn remove(&mut self, handle: PeerHandle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(value)
    }

    /// Handles of every live value, in slot order.
    #[must_use]
    pub fn handles(&self) -> Vec<PeerHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.value.is_some())
            .map(|(index, slot)| PeerHandle {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }
}

impl<T> Default for ConnectionArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut arena = ConnectionArena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.handles(), vec![a, b]);
    }

    #[test]
    fn test_stale_handle_detected_after_reuse() {
        let mut arena = ConnectionArena::new();
        let old = arena.insert(1);
        assert_eq!(arena.remove(old), Some(1));

        let new = arena.insert(2);
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());

        assert_eq!(arena.get(old), None);
        assert_eq!(arena.remove(old), None);
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn test_double_remove() {
        let mut arena = ConnectionArena::new();
        let handle = arena.insert(());
        assert!(arena.remove(handle).is_some());
        assert!(arena.remove(handle).is_none());
        assert!(arena.is_empty());
        assert!(!arena.contains(handle));
    }

    #[test]
    fn test_display() {
        let mut arena = ConnectionArena::new();
        let handle = arena.insert(());
        assert_eq!(handle.to_string(), "peer#0.0");
    }
}
