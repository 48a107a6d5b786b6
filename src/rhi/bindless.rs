//! Bindless Descriptor Table
//!
//! A fixed window of the GPU-visible heap whose slots are addressed by
//! [`DescriptorIndex`]. Shaders read a resource by indexing this table with
//! the integer stored in their constant data, so no per-draw binding is
//! needed. Indices come from a [`BitSetAllocator`] because every slot is one
//! descriptor wide.

use parking_lot::Mutex;

use crate::core::bitset::BitSetAllocator;
use crate::errors::Result;
use crate::rhi::descriptor_heap::{DescriptorAllocation, GpuDescriptorHeap};
use crate::types::DescriptorIndex;

pub struct BindlessDescriptorTable {
    allocation: DescriptorAllocation,
    indices: Mutex<BitSetAllocator>,
}

impl BindlessDescriptorTable {
    /// Reserves `capacity` slots of the static region of `heap`.
    pub fn new<D: Clone>(heap: &GpuDescriptorHeap<D>, capacity: u32) -> Result<Self> {
        let allocation = heap.allocate_static(capacity)?;
        Ok(Self {
            allocation,
            indices: Mutex::new(BitSetAllocator::new(capacity)),
        })
    }

    /// Next free index, or [`DescriptorIndex::INVALID`] when the table is full.
    pub fn allocate(&self) -> DescriptorIndex {
        match self.indices.lock().allocate() {
            Some(index) => DescriptorIndex(index),
            None => {
                log::warn!(
                    "Bindless descriptor table exhausted ({} slots)",
                    self.allocation.count
                );
                DescriptorIndex::INVALID
            }
        }
    }

    pub fn free(&self, index: DescriptorIndex) {
        if index.is_valid() {
            self.indices.lock().release(index.0);
        }
    }

    /// Absolute GPU heap slot backing `index`.
    #[inline]
    #[must_use]
    pub fn heap_index(&self, index: DescriptorIndex) -> u32 {
        self.allocation.index(index.0)
    }

    /// First heap slot of the table, bound as the bindless root parameter.
    #[inline]
    #[must_use]
    pub fn heap_offset(&self) -> u32 {
        self.allocation.offset
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.allocation.count
    }

    #[must_use]
    pub fn allocated(&self) -> u32 {
        self.indices.lock().allocated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_returns_invalid() {
        let heap: GpuDescriptorHeap<u32> = GpuDescriptorHeap::new(2, 0);
        let table = BindlessDescriptorTable::new(&heap, 2).unwrap();
        assert!(table.allocate().is_valid());
        assert!(table.allocate().is_valid());
        assert_eq!(table.allocate(), DescriptorIndex::INVALID);
    }

    #[test]
    fn test_round_trip_does_not_grow() {
        let heap: GpuDescriptorHeap<u32> = GpuDescriptorHeap::new(8, 0);
        let table = BindlessDescriptorTable::new(&heap, 8).unwrap();

        let first: Vec<_> = (0..8).map(|_| table.allocate()).collect();
        for index in &first {
            table.free(*index);
        }
        let second: Vec<_> = (0..8).map(|_| table.allocate()).collect();

        assert!(second.iter().all(|i| i.is_valid()));
        let mut a: Vec<_> = first.iter().map(|i| i.0).collect();
        let mut b: Vec<_> = second.iter().map(|i| i.0).collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
        assert_eq!(table.capacity(), 8);
    }

    #[test]
    fn test_heap_index_offsets_into_reserved_range() {
        let heap: GpuDescriptorHeap<u32> = GpuDescriptorHeap::new(4, 4);
        let table = BindlessDescriptorTable::new(&heap, 4).unwrap();
        let index = table.allocate();
        assert!(table.heap_index(index) < heap.static_capacity());
    }

    #[test]
    fn test_free_invalid_is_ignored() {
        let heap: GpuDescriptorHeap<u32> = GpuDescriptorHeap::new(1, 0);
        let table = BindlessDescriptorTable::new(&heap, 1).unwrap();
        table.free(DescriptorIndex::INVALID);
        assert_eq!(table.allocated(), 0);
    }
}
