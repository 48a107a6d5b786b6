//! Fixed-capacity index allocator over a bit set.
//!
//! Valid only for uniformly sized slots (descriptor slots, query pairs).
//! The scan starts at a cursor that is pulled back on every free, so low
//! indices are reused first.

/// Allocates indices in `[0, capacity)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitSetAllocator {
    words: Vec<u64>,
    capacity: u32,
    next_available: u32,
    allocated: u32,
}

impl BitSetAllocator {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64) as usize],
            capacity,
            next_available: 0,
            allocated: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    #[must_use]
    pub fn allocated(&self) -> u32 {
        self.allocated
    }

    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.allocated == self.capacity
    }

    #[inline]
    #[must_use]
    pub fn is_allocated(&self, index: u32) -> bool {
        index < self.capacity && self.words[(index / 64) as usize] & (1 << (index % 64)) != 0
    }

    /// Returns the next free index, or `None` when every index is taken.
    pub fn allocate(&mut self) -> Option<u32> {
        if self.is_full() {
            return None;
        }

        let start = self.next_available;
        for step in 0..self.capacity {
            let index = (start + step) % self.capacity;
            if !self.is_allocated(index) {
                self.words[(index / 64) as usize] |= 1 << (index % 64);
                self.allocated += 1;
                self.next_available = (index + 1) % self.capacity;
                return Some(index);
            }
        }

        None
    }

    /// Returns `index` to the free set. Freeing a free index is ignored.
    pub fn release(&mut self, index: u32) {
        if !self.is_allocated(index) {
            log::warn!("BitSetAllocator: release of unallocated index {index}");
            return;
        }

        self.words[(index / 64) as usize] &= !(1 << (index % 64));
        self.allocated -= 1;
        self.next_available = self.next_available.min(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_sequentially() {
        let mut bits = BitSetAllocator::new(4);
        let got: Vec<_> = (0..4).filter_map(|_| bits.allocate()).collect();
        assert_eq!(got, vec![0, 1, 2, 3]);
        assert!(bits.is_full());
        assert_eq!(bits.allocate(), None);
    }

    #[test]
    fn test_release_reuses_lowest() {
        let mut bits = BitSetAllocator::new(8);
        for _ in 0..5 {
            bits.allocate();
        }
        bits.release(3);
        bits.release(1);
        assert_eq!(bits.allocate(), Some(1));
        assert_eq!(bits.allocate(), Some(3));
        assert_eq!(bits.allocate(), Some(5));
    }

    #[test]
    fn test_scan_wraps_around() {
        let mut bits = BitSetAllocator::new(3);
        bits.allocate();
        bits.allocate();
        bits.allocate();
        bits.release(0);
        // Cursor moved back to 0 on release.
        assert_eq!(bits.allocate(), Some(0));
    }

    #[test]
    fn test_capacity_not_multiple_of_word() {
        let mut bits = BitSetAllocator::new(70);
        let count = std::iter::from_fn(|| bits.allocate()).count();
        assert_eq!(count, 70);
    }

    #[test]
    fn test_double_release_ignored() {
        let mut bits = BitSetAllocator::new(2);
        let a = bits.allocate().unwrap();
        bits.release(a);
        bits.release(a);
        assert_eq!(bits.allocated(), 0);
    }

    #[test]
    fn test_zero_capacity() {
        let mut bits = BitSetAllocator::new(0);
        assert_eq!(bits.allocate(), None);
    }
}
