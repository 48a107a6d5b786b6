//! Dynamic Descriptor Sub-Allocation
//!
//! Each recording session owns one [`DynamicSuballocator`]: a set of
//! fixed-size chunks carved from the dynamic region of the GPU-visible heap,
//! from which transient descriptor tables are bump-allocated. A table never
//! straddles two chunks.
//!
//! [`DynamicSubAllocatorPool`] recycles sub-allocators with the same fence
//! discipline as command allocators, and releases their chunks back to the
//! heap on reuse so stale tables are never observed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::errors::Result;
use crate::rhi::descriptor_heap::{DescriptorAllocation, GpuDescriptorHeap};

/// A transient descriptor table: `count` consecutive GPU heap slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorTable {
    pub heap_offset: u32,
    pub count: u32,
}

pub struct DynamicSuballocator<D> {
    id: u64,
    heap: Arc<GpuDescriptorHeap<D>>,
    chunk_size: u32,
    chunks: Vec<DescriptorAllocation>,
    /// Slots used in the last chunk.
    cursor: u32,
}

impl<D> DynamicSuballocator<D> {
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Reserves `count` consecutive slots.
    pub fn allocate(&mut self, count: u32) -> Result<DescriptorTable> {
        let fits = self
            .chunks
            .last()
            .is_some_and(|chunk| chunk.count - self.cursor >= count);

        if !fits {
            let chunk = self.heap.allocate_dynamic(count.max(self.chunk_size))?;
            self.chunks.push(chunk);
            self.cursor = 0;
        }

        let Some(chunk) = self.chunks.last() else {
            unreachable!("a chunk was just pushed");
        };
        let table = DescriptorTable {
            heap_offset: chunk.offset + self.cursor,
            count,
        };
        self.cursor += count;
        Ok(table)
    }

    /// Returns every chunk to the heap.
    pub fn release_allocations(&mut self) {
        for chunk in self.chunks.drain(..) {
            self.heap.free(chunk);
        }
        self.cursor = 0;
    }

    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl<D> Drop for DynamicSuballocator<D> {
    fn drop(&mut self) {
        self.release_allocations();
    }
}

pub struct DynamicSubAllocatorPool<D> {
    heap: Arc<GpuDescriptorHeap<D>>,
    chunk_size: u32,
    retired: Mutex<VecDeque<(u64, Box<DynamicSuballocator<D>>)>>,
    next_id: AtomicU64,
}

impl<D> DynamicSubAllocatorPool<D> {
    #[must_use]
    pub fn new(heap: Arc<GpuDescriptorHeap<D>>, chunk_size: u32) -> Self {
        Self {
            heap,
            chunk_size: chunk_size.max(1),
            retired: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Reuses the oldest retired sub-allocator whose fence is within
    /// `completed_fence`, with its chunks released. Otherwise creates one.
    pub fn request(&self, completed_fence: u64) -> Box<DynamicSuballocator<D>> {
        let mut retired = self.retired.lock();

        if let Some((fence, _)) = retired.front()
            && *fence <= completed_fence
            && let Some((_, mut suballocator)) = retired.pop_front()
        {
            suballocator.release_allocations();
            return suballocator;
        }

        Box::new(DynamicSuballocator {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            heap: Arc::clone(&self.heap),
            chunk_size: self.chunk_size,
            chunks: Vec::new(),
            cursor: 0,
        })
    }

    /// Returns `suballocator` to the pool, reusable once `fence` completes.
    pub fn discard(&self, fence: u64, suballocator: Box<DynamicSuballocator<D>>) {
        let mut retired = self.retired.lock();
        let at = retired
            .iter()
            .rposition(|(last, _)| *last <= fence)
            .map_or(0, |i| i + 1);
        retired.insert(at, (fence, suballocator));
    }

    /// Sub-allocators ever created.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(dynamic: u32, chunk: u32) -> (Arc<GpuDescriptorHeap<u32>>, DynamicSubAllocatorPool<u32>) {
        let heap = Arc::new(GpuDescriptorHeap::new(4, dynamic));
        let pool = DynamicSubAllocatorPool::new(Arc::clone(&heap), chunk);
        (heap, pool)
    }

    #[test]
    fn test_tables_within_chunk_are_contiguous() {
        let (_heap, pool) = pool(64, 16);
        let mut sub = pool.request(0);
        let a = sub.allocate(4).unwrap();
        let b = sub.allocate(4).unwrap();
        assert_eq!(b.heap_offset, a.heap_offset + 4);
        assert_eq!(sub.chunk_count(), 1);
    }

    #[test]
    fn test_table_never_straddles_chunks() {
        let (_heap, pool) = pool(64, 16);
        let mut sub = pool.request(0);
        let a = sub.allocate(12).unwrap();
        let b = sub.allocate(8).unwrap();
        assert_eq!(sub.chunk_count(), 2);
        assert!(b.heap_offset >= a.heap_offset + 16);
    }

    #[test]
    fn test_large_table_gets_dedicated_chunk() {
        let (_heap, pool) = pool(64, 16);
        let mut sub = pool.request(0);
        let table = sub.allocate(40).unwrap();
        assert_eq!(table.count, 40);
        assert_eq!(sub.chunk_count(), 1);
    }

    #[test]
    fn test_reuse_releases_chunks() {
        let (heap, pool) = pool(32, 16);
        let mut sub = pool.request(0);
        sub.allocate(16).unwrap();
        sub.allocate(16).unwrap();
        assert_eq!(heap.dynamic_free(), 0);
        let id = sub.id();
        pool.discard(3, sub);

        let fresh = pool.request(2);
        assert_ne!(fresh.id(), id);

        let reused = pool.request(3);
        assert_eq!(reused.id(), id);
        assert_eq!(reused.chunk_count(), 0);
        assert_eq!(heap.dynamic_free(), 32);
    }

    #[test]
    fn test_out_of_order_discard_keeps_oldest_first() {
        let (_heap, pool) = pool(64, 16);
        let late = pool.request(0);
        let early = pool.request(0);
        let early_id = early.id();
        pool.discard(5, late);
        pool.discard(3, early);

        let reused = pool.request(3);
        assert_eq!(reused.id(), early_id);
        assert_eq!(pool.size(), 2);
    }

    #[test]
    fn test_exhausted_heap_errors() {
        let (_heap, pool) = pool(16, 16);
        let mut a = pool.request(0);
        let mut b = pool.request(0);
        a.allocate(1).unwrap();
        assert!(b.allocate(1).is_err());
    }
}
