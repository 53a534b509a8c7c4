// Copyright 2025 the Quarry Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Quarry Slots: generational slot handles and a compact slot map.
//!
//! This crate provides the reusable-identifier primitive the rest of the
//! workspace is built on.
//!
//! - [`Slot`]: a small, copyable `(index, generation)` handle.
//! - [`SlotMap`]: a growable array of entries addressed by [`Slot`], with
//!   free-list reuse and per-slot generations so stale handles are detectably
//!   invalid rather than silently aliasing a newer entry.
//!
//! ## Semantics
//!
//! - On insert, a slot is allocated with generation `1` (or the freed slot's
//!   previous generation plus one on reuse, wrapping past the reserved `0`).
//! - On remove, the slot is freed; any existing [`Slot`] that pointed at it is
//!   now stale and every accessor returns `None` for it.
//! - A stale [`Slot`] can never resolve to a different live entry because the
//!   stored generation must match.
//!
//! Growth is array append; there is no capacity bound besides memory.
//!
//! ### Minimal usage
//!
//! ```
//! use quarry_slots::SlotMap;
//!
//! let mut map = SlotMap::new();
//! let a = map.insert("a");
//! let b = map.insert("b");
//! assert_eq!(map.get(a), Some(&"a"));
//!
//! assert_eq!(map.remove(a), Some("a"));
//! assert_eq!(map.get(a), None, "stale handles never resolve");
//!
//! // The freed slot is reused with a bumped generation.
//! let c = map.insert("c");
//! assert_eq!(map.get(c), Some(&"c"));
//! assert_eq!(map.get(a), None);
//! assert_ne!(a, c);
//! # let _ = b;
//! ```
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

use alloc::vec::Vec;

/// Generational handle into a [`SlotMap`].
///
/// Two slots are equal iff both the index and the generation match. A slot is
/// live only while the map still stores the same generation at its index.
///
/// Generation `0` is never issued, so [`Slot::INVALID`] compares unequal to
/// every handle a map returns.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Slot {
    /// Index of the entry within the map's backing array.
    pub index: u32,
    /// Generation the entry had when this handle was issued.
    pub generation: u32,
}

impl Slot {
    /// A handle that no map will ever issue or resolve.
    pub const INVALID: Self = Self {
        index: u32::MAX,
        generation: 0,
    };

    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) const fn idx(self) -> usize {
        self.index as usize
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::INVALID
    }
}

#[derive(Clone, Debug)]
struct Entry<T> {
    generation: u32,
    value: T,
}

/// A compact, generational arena of `T`.
///
/// Entries are addressed by [`Slot`]. Freed slots are recycled LIFO with a
/// bumped generation, so handles to removed entries go permanently stale
/// instead of dangling.
#[derive(Clone)]
pub struct SlotMap<T> {
    entries: Vec<Option<Entry<T>>>,
    // Last generation per slot; persists across frees so reuse can bump it.
    generations: Vec<u32>,
    free_list: Vec<usize>,
}

impl<T> core::fmt::Debug for SlotMap<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let total = self.entries.len();
        let alive = self.entries.iter().filter(|e| e.is_some()).count();
        f.debug_struct("SlotMap")
            .field("slots_total", &total)
            .field("slots_alive", &alive)
            .field("free_list", &self.free_list.len())
            .finish_non_exhaustive()
    }
}

impl<T> Default for SlotMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SlotMap<T> {
    /// Create an empty map.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Reserve space for at least `n` additional entries.
    pub fn reserve(&mut self, n: usize) {
        self.entries.reserve(n);
        self.generations.reserve(n);
    }

    /// Insert a value, returning a fresh [`Slot`].
    pub fn insert(&mut self, value: T) -> Slot {
        let (idx, generation) = if let Some(idx) = self.free_list.pop() {
            // Wrap past the never-issued generation 0, so an exhausted slot
            // keeps issuing distinct generations instead of pinning at the
            // maximum. A handle can then only alias after its slot cycles
            // through another 2^32 - 1 reuses.
            let generation = match self.generations[idx].wrapping_add(1) {
                0 => 1,
                g => g,
            };
            self.generations[idx] = generation;
            self.entries[idx] = Some(Entry { generation, value });
            (idx, generation)
        } else {
            let generation = 1_u32;
            self.entries.push(Some(Entry { generation, value }));
            self.generations.push(generation);
            (self.entries.len() - 1, generation)
        };
        #[allow(
            clippy::cast_possible_truncation,
            reason = "Slot uses 32-bit indices by design."
        )]
        Slot::new(idx as u32, generation)
    }

    /// Remove the entry for `slot`, returning its value.
    ///
    /// Returns `None` (and leaves the map unchanged) when `slot` is stale.
    pub fn remove(&mut self, slot: Slot) -> Option<T> {
        if !self.contains(slot) {
            return None;
        }
        let entry = self.entries[slot.idx()].take()?;
        self.free_list.push(slot.idx());
        Some(entry.value)
    }

    /// Whether `slot` refers to a live entry.
    pub fn contains(&self, slot: Slot) -> bool {
        self.entries
            .get(slot.idx())
            .and_then(|e| e.as_ref())
            .map(|e| e.generation == slot.generation)
            .unwrap_or(false)
    }

    /// Shared access to the entry for `slot`, or `None` when stale.
    pub fn get(&self, slot: Slot) -> Option<&T> {
        let e = self.entries.get(slot.idx())?.as_ref()?;
        (e.generation == slot.generation).then_some(&e.value)
    }

    /// Mutable access to the entry for `slot`, or `None` when stale.
    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut T> {
        let e = self.entries.get_mut(slot.idx())?.as_mut()?;
        (e.generation == slot.generation).then_some(&mut e.value)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len() - self.free_list.len()
    }

    /// Whether the map has no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate live entries as `(Slot, &T)` in slot-index order.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &T)> {
        self.entries.iter().enumerate().filter_map(|(i, e)| {
            let e = e.as_ref()?;
            #[allow(
                clippy::cast_possible_truncation,
                reason = "Slot uses 32-bit indices by design."
            )]
            Some((Slot::new(i as u32, e.generation), &e.value))
        })
    }

    /// Iterate live slots in slot-index order.
    pub fn slots(&self) -> impl Iterator<Item = Slot> {
        self.iter().map(|(slot, _)| slot)
    }
}
