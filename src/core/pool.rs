//! Generation-Stamped Resource Pool
//!
//! An arena addressed by `{index, generation}` handles. Every slot carries a
//! generation counter; a handle is valid only while its generation matches
//! the slot's. Releasing a slot bumps the generation, so every outstanding
//! copy of the old handle stops resolving even after the slot is reused.
//!
//! ```text
//!   slots:       [ A ][ - ][ C ][ - ]
//!   generations: [ 1 ][ 3 ][ 1 ][ 2 ]
//!   free list:   [ 3, 1 ]  (stack, top = last)
//! ```
//!
//! A slot whose generation reaches `u32::MAX` is retired permanently and
//! never handed out again.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

// ─── Handle ──────────────────────────────────────────────────────────────────

/// Typed `{index, generation}` reference into a [`Pool`].
///
/// `T` only tags the handle; it need not be the stored type.
pub struct Handle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// A handle that no pool ever issues.
    pub const INVALID: Self = Self {
        index: u32::MAX,
        generation: 0,
        _marker: PhantomData,
    };

    #[inline]
    #[must_use]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Generation 0 is never issued.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.generation != 0
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

// ─── Pool ────────────────────────────────────────────────────────────────────

/// Arena of `T` values addressed by [`Handle<Tag>`].
///
/// Not internally synchronized; wrap it in a lock when it is shared.
pub struct Pool<T, Tag = T> {
    slots: Vec<Option<T>>,
    generations: Vec<u32>,
    free_list: Vec<u32>,
    num_active: usize,
    _marker: PhantomData<fn() -> Tag>,
}

impl<T, Tag> Default for Pool<T, Tag> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T, Tag> Pool<T, Tag> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut pool = Self {
            slots: Vec::new(),
            generations: Vec::new(),
            free_list: Vec::new(),
            num_active: 0,
            _marker: PhantomData,
        };
        if capacity > 0 {
            pool.resize(capacity);
        }
        pool
    }

    /// Total slots, including retired ones.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live values.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.num_active
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_active == 0
    }

    /// Stores `value` and returns its handle, growing the pool if no slot is free.
    pub fn insert(&mut self, value: T) -> Handle<Tag> {
        if self.free_list.is_empty() {
            let grown = if self.slots.is_empty() { 16 } else { self.slots.len() * 2 };
            self.resize(grown);
        }

        let Some(index) = self.free_list.pop() else {
            unreachable!("pool resize always appends free slots");
        };

        let slot = index as usize;
        debug_assert!(self.slots[slot].is_none(), "free slot {index} is occupied");
        self.slots[slot] = Some(value);
        self.num_active += 1;
        Handle::new(index, self.generations[slot])
    }

    /// Constructs the value in place from `f`.
    pub fn emplace_with(&mut self, f: impl FnOnce() -> T) -> Handle<Tag> {
        self.insert(f())
    }

    /// Bounds and generation check.
    #[inline]
    #[must_use]
    pub fn contains(&self, handle: Handle<Tag>) -> bool {
        let slot = handle.index() as usize;
        slot < self.slots.len()
            && self.generations[slot] == handle.generation()
            && self.slots[slot].is_some()
    }

    #[must_use]
    pub fn get(&self, handle: Handle<Tag>) -> Option<&T> {
        if !self.contains(handle) {
            return None;
        }
        self.slots[handle.index() as usize].as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle<Tag>) -> Option<&mut T> {
        if !self.contains(handle) {
            return None;
        }
        self.slots[handle.index() as usize].as_mut()
    }

    /// Takes the value out, invalidating every copy of `handle`.
    ///
    /// Returns `None` for stale handles, so a double release is harmless.
    pub fn release(&mut self, handle: Handle<Tag>) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }

        let slot = handle.index() as usize;
        let value = self.slots[slot].take();
        self.num_active -= 1;

        let generation = &mut self.generations[slot];
        *generation = generation.saturating_add(1);
        if *generation == u32::MAX {
            log::debug!("Pool slot {slot} reached max generation and is retired");
        } else {
            self.free_list.push(handle.index());
        }

        value
    }

    /// Drops every live value and bumps every generation.
    pub fn clear(&mut self) {
        for slot in 0..self.slots.len() {
            if self.slots[slot].is_some() {
                let handle = Handle::new(slot as u32, self.generations[slot]);
                self.release(handle);
            }
        }
    }

    /// Iterates live values with their current handles.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<Tag>, &T)> {
        self.slots.iter().enumerate().filter_map(|(slot, value)| {
            value
                .as_ref()
                .map(|v| (Handle::new(slot as u32, self.generations[slot]), v))
        })
    }

    /// Grows to `new_capacity` slots. New slots join the free list so that
    /// the lowest new index is handed out first.
    fn resize(&mut self, new_capacity: usize) {
        let old_capacity = self.slots.len();
        if new_capacity <= old_capacity {
            return;
        }

        self.slots.resize_with(new_capacity, || None);
        self.generations.resize(new_capacity, 1);

        // The free list is a stack: push in descending order so pops ascend.
        self.free_list.reserve(new_capacity - old_capacity);
        self.free_list
            .extend((old_capacity as u32..new_capacity as u32).rev());

        if old_capacity > 0 {
            log::info!("Resource pool grown: {old_capacity} -> {new_capacity} slots");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get() {
        let mut pool: Pool<&str> = Pool::new(4);
        let a = pool.insert("a");
        let b = pool.insert("b");

        assert_eq!(pool.get(a), Some(&"a"));
        assert_eq!(pool.get(b), Some(&"b"));
        assert_eq!(pool.len(), 2);
        assert_eq!(a.generation(), 1);
    }

    #[test]
    fn test_fresh_slots_ascend() {
        let mut pool: Pool<u32> = Pool::new(4);
        let indices: Vec<u32> = (0..4).map(|i| pool.insert(i).index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_release_invalidates_old_handle() {
        let mut pool: Pool<u32> = Pool::new(1);
        let old = pool.insert(10);
        assert_eq!(pool.release(old), Some(10));
        assert!(!pool.contains(old));

        let new = pool.insert(20);
        assert_eq!(new.index(), old.index());
        assert_ne!(new.generation(), old.generation());
        assert!(!pool.contains(old));
        assert_eq!(pool.get(new), Some(&20));
    }

    #[test]
    fn test_double_release_is_noop() {
        let mut pool: Pool<u32> = Pool::new(2);
        let h = pool.insert(1);
        assert!(pool.release(h).is_some());
        assert!(pool.release(h).is_none());
        assert_eq!(pool.len(), 0);

        // The slot is on the free list exactly once.
        let a = pool.insert(2);
        let b = pool.insert(3);
        assert_ne!(a.index(), b.index());
    }

    #[test]
    fn test_growth_appends_ascending() {
        let mut pool: Pool<u32> = Pool::new(2);
        let _a = pool.insert(0);
        let _b = pool.insert(1);
        let c = pool.insert(2);
        let d = pool.insert(3);

        assert_eq!(pool.capacity(), 4);
        assert_eq!(c.index(), 2);
        assert_eq!(d.index(), 3);
    }

    #[test]
    fn test_growth_keeps_released_slots_usable() {
        let mut pool: Pool<u32> = Pool::new(2);
        let a = pool.insert(0);
        let _b = pool.insert(1);
        pool.release(a);
        let _c = pool.insert(2);
        // Free list is empty again; this one triggers growth.
        let d = pool.insert(3);

        assert_eq!(pool.capacity(), 4);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.get(d), Some(&3));
    }

    #[test]
    fn test_empty_pool_grows_to_sixteen() {
        let mut pool: Pool<u8> = Pool::default();
        pool.insert(0);
        assert_eq!(pool.capacity(), 16);
    }

    #[test]
    fn test_saturated_slot_is_retired() {
        let mut pool: Pool<u32> = Pool::new(1);
        pool.generations[0] = u32::MAX - 1;
        let h = pool.insert(1);
        pool.release(h);

        assert_eq!(pool.generations[0], u32::MAX);
        let next = pool.insert(2);
        assert_ne!(next.index(), 0, "retired slot must not be reused");
    }

    #[test]
    fn test_invalid_handle_never_resolves() {
        let mut pool: Pool<u32> = Pool::new(1);
        pool.insert(5);
        assert!(!pool.contains(Handle::INVALID));
        assert!(!pool.contains(Handle::new(0, 0)));
        assert!(!pool.contains(Handle::new(7, 1)));
    }

    #[test]
    fn test_iter_yields_live_values() {
        let mut pool: Pool<u32> = Pool::new(4);
        let a = pool.insert(1);
        let _b = pool.insert(2);
        pool.release(a);

        let live: Vec<u32> = pool.iter().map(|(_, v)| *v).collect();
        assert_eq!(live, vec![2]);
    }
}
