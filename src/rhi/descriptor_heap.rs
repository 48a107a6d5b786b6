//! Descriptor Heaps
//!
//! Two kinds of heap store [`Descriptor`](super::command::Descriptor) views:
//!
//! - [`CpuDescriptorHeap`]: staging storage for the views of every resource.
//!   Grows by whole pages and is never read by shaders directly.
//! - [`GpuDescriptorHeap`]: the single shader-visible heap. Fixed capacity,
//!   split into a static region (the bindless table lives here) and a dynamic
//!   region shared by the per-list descriptor-table sub-allocators.
//!
//! ```text
//!   GPU heap:  [ static: 0 .. S )[ dynamic: S .. S + D )
//!                 └ bindless       └ 256-slot chunks per recording session
//! ```
//!
//! Both regions hand out contiguous ranges from a [`FreeBlockAllocator`].

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::{Mutex, RwLock};

use crate::errors::{Result, RhiError};

// ─── Free-Block Allocator ────────────────────────────────────────────────────

/// Variable-size range allocator with best-fit placement and coalescing.
///
/// Free blocks are indexed by offset (for merging) and by `(size, offset)`
/// (for best fit).
#[derive(Debug, Clone)]
pub struct FreeBlockAllocator {
    capacity: u32,
    free: u32,
    by_offset: BTreeMap<u32, u32>,
    by_size: BTreeSet<(u32, u32)>,
}

impl FreeBlockAllocator {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        let mut allocator = Self {
            capacity,
            free: 0,
            by_offset: BTreeMap::new(),
            by_size: BTreeSet::new(),
        };
        if capacity > 0 {
            allocator.insert_block(0, capacity);
        }
        allocator
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    #[must_use]
    pub fn free_count(&self) -> u32 {
        self.free
    }

    /// Offset of the smallest free block holding `count`, or `None`.
    pub fn allocate(&mut self, count: u32) -> Option<u32> {
        if count == 0 || count > self.free {
            return None;
        }

        let &(size, offset) = self.by_size.range((count, 0)..).next()?;
        self.remove_block(offset, size);
        if size > count {
            self.insert_block(offset + count, size - count);
        }
        Some(offset)
    }

    /// Returns `[offset, offset + count)` and merges it with its neighbours.
    pub fn free(&mut self, offset: u32, count: u32) {
        if count == 0 {
            return;
        }
        debug_assert!(offset + count <= self.capacity, "free past the end of the heap");

        let mut start = offset;
        let mut size = count;

        if let Some((&prev_offset, &prev_size)) = self.by_offset.range(..offset).next_back()
            && prev_offset + prev_size == offset
        {
            self.remove_block(prev_offset, prev_size);
            start = prev_offset;
            size += prev_size;
        }

        if let Some(&next_size) = self.by_offset.get(&(offset + count)) {
            self.remove_block(offset + count, next_size);
            size += next_size;
        }

        self.insert_block(start, size);
    }

    fn insert_block(&mut self, offset: u32, size: u32) {
        self.by_offset.insert(offset, size);
        self.by_size.insert((size, offset));
        self.free += size;
    }

    fn remove_block(&mut self, offset: u32, size: u32) {
        self.by_offset.remove(&offset);
        self.by_size.remove(&(size, offset));
        self.free -= size;
    }
}

// ─── Allocation ──────────────────────────────────────────────────────────────

/// A contiguous descriptor range. `page` selects the CPU heap page, or the
/// GPU heap region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorAllocation {
    pub page: u32,
    pub offset: u32,
    pub count: u32,
}

impl DescriptorAllocation {
    /// Absolute slot of the `i`-th descriptor.
    #[inline]
    #[must_use]
    pub fn index(&self, i: u32) -> u32 {
        debug_assert!(i < self.count, "descriptor {i} outside allocation of {}", self.count);
        self.offset + i
    }
}

// ─── CPU Heap ────────────────────────────────────────────────────────────────

struct CpuPage<D> {
    allocator: FreeBlockAllocator,
    slots: Vec<Option<D>>,
}

/// Growable non-shader-visible heap.
pub struct CpuDescriptorHeap<D> {
    label: &'static str,
    page_size: u32,
    pages: Mutex<Vec<CpuPage<D>>>,
}

impl<D: Clone> CpuDescriptorHeap<D> {
    #[must_use]
    pub fn new(label: &'static str, page_size: u32) -> Self {
        Self {
            label,
            page_size: page_size.max(1),
            pages: Mutex::new(Vec::new()),
        }
    }

    pub fn allocate(&self, count: u32) -> DescriptorAllocation {
        let mut pages = self.pages.lock();

        for (page_index, page) in pages.iter_mut().enumerate() {
            if let Some(offset) = page.allocator.allocate(count) {
                return DescriptorAllocation {
                    page: page_index as u32,
                    offset,
                    count,
                };
            }
        }

        let size = self.page_size.max(count);
        let mut allocator = FreeBlockAllocator::new(size);
        let offset = allocator.allocate(count).unwrap_or(0);
        pages.push(CpuPage {
            allocator,
            slots: vec![None; size as usize],
        });
        log::info!("{}: allocated descriptor page #{} ({size} slots)", self.label, pages.len());

        DescriptorAllocation {
            page: (pages.len() - 1) as u32,
            offset,
            count,
        }
    }

    pub fn free(&self, allocation: DescriptorAllocation) {
        let mut pages = self.pages.lock();
        let Some(page) = pages.get_mut(allocation.page as usize) else {
            log::warn!("{}: free of unknown page {}", self.label, allocation.page);
            return;
        };
        for slot in &mut page.slots[allocation.offset as usize..(allocation.offset + allocation.count) as usize] {
            *slot = None;
        }
        page.allocator.free(allocation.offset, allocation.count);
    }

    pub fn write(&self, allocation: &DescriptorAllocation, i: u32, descriptor: D) {
        let mut pages = self.pages.lock();
        if let Some(page) = pages.get_mut(allocation.page as usize) {
            page.slots[allocation.index(i) as usize] = Some(descriptor);
        }
    }

    #[must_use]
    pub fn get(&self, allocation: &DescriptorAllocation, i: u32) -> Option<D> {
        let pages = self.pages.lock();
        pages
            .get(allocation.page as usize)
            .and_then(|page| page.slots[allocation.index(i) as usize].clone())
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }
}

// ─── GPU Heap ────────────────────────────────────────────────────────────────

const STATIC_REGION: u32 = 0;
const DYNAMIC_REGION: u32 = 1;

struct Regions {
    static_region: FreeBlockAllocator,
    dynamic_region: FreeBlockAllocator,
}

/// Fixed-capacity shader-visible heap.
pub struct GpuDescriptorHeap<D> {
    static_capacity: u32,
    dynamic_capacity: u32,
    regions: Mutex<Regions>,
    slots: RwLock<Vec<Option<D>>>,
}

impl<D> GpuDescriptorHeap<D> {
    #[must_use]
    pub fn new(static_capacity: u32, dynamic_capacity: u32) -> Self {
        Self {
            static_capacity,
            dynamic_capacity,
            regions: Mutex::new(Regions {
                static_region: FreeBlockAllocator::new(static_capacity),
                dynamic_region: FreeBlockAllocator::new(dynamic_capacity),
            }),
            slots: RwLock::new(
                (0..static_capacity + dynamic_capacity).map(|_| None).collect(),
            ),
        }
    }

    #[inline]
    #[must_use]
    pub fn static_capacity(&self) -> u32 {
        self.static_capacity
    }

    #[inline]
    #[must_use]
    pub fn dynamic_capacity(&self) -> u32 {
        self.dynamic_capacity
    }

    /// Long-lived range, such as the bindless table.
    pub fn allocate_static(&self, count: u32) -> Result<DescriptorAllocation> {
        let offset = self
            .regions
            .lock()
            .static_region
            .allocate(count)
            .ok_or(RhiError::DescriptorHeapExhausted {
                heap: "gpu-static",
                requested: count,
            })?;
        Ok(DescriptorAllocation {
            page: STATIC_REGION,
            offset,
            count,
        })
    }

    /// Transient range for descriptor tables.
    pub fn allocate_dynamic(&self, count: u32) -> Result<DescriptorAllocation> {
        let offset = self
            .regions
            .lock()
            .dynamic_region
            .allocate(count)
            .ok_or(RhiError::DescriptorHeapExhausted {
                heap: "gpu-dynamic",
                requested: count,
            })?;
        Ok(DescriptorAllocation {
            page: DYNAMIC_REGION,
            offset: self.static_capacity + offset,
            count,
        })
    }

    pub fn free(&self, allocation: DescriptorAllocation) {
        {
            let mut slots = self.slots.write();
            for slot in &mut slots[allocation.offset as usize..(allocation.offset + allocation.count) as usize] {
                *slot = None;
            }
        }

        let mut regions = self.regions.lock();
        if allocation.page == DYNAMIC_REGION {
            regions
                .dynamic_region
                .free(allocation.offset - self.static_capacity, allocation.count);
        } else {
            regions.static_region.free(allocation.offset, allocation.count);
        }
    }

    /// Copies a descriptor into absolute slot `index`.
    pub fn write(&self, index: u32, descriptor: D) {
        if let Some(slot) = self.slots.write().get_mut(index as usize) {
            *slot = Some(descriptor);
        }
    }

    pub fn clear(&self, index: u32) {
        if let Some(slot) = self.slots.write().get_mut(index as usize) {
            *slot = None;
        }
    }

    /// Free slots left in the dynamic region.
    #[must_use]
    pub fn dynamic_free(&self) -> u32 {
        self.regions.lock().dynamic_region.free_count()
    }
}

impl<D: Clone> GpuDescriptorHeap<D> {
    #[must_use]
    pub fn read(&self, index: u32) -> Option<D> {
        self.slots.read().get(index as usize).cloned().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_block_best_fit() {
        let mut heap = FreeBlockAllocator::new(100);
        let a = heap.allocate(10).unwrap();
        let b = heap.allocate(30).unwrap();
        let c = heap.allocate(5).unwrap();
        heap.free(a, 10);
        heap.free(b, 30);
        // a and b coalesced into [0, 40); the tail is [45, 100).
        assert_eq!(heap.allocate(40), Some(0));
        assert_eq!(heap.allocate(55), Some(45));
        assert_eq!(heap.free_count(), 0);
        heap.free(c, 5);
        assert_eq!(heap.allocate(5), Some(40));
    }

    #[test]
    fn test_free_block_prefers_smallest_hole() {
        let mut heap = FreeBlockAllocator::new(64);
        let a = heap.allocate(8).unwrap();
        let _b = heap.allocate(4).unwrap();
        let c = heap.allocate(2).unwrap();
        let _d = heap.allocate(4).unwrap();
        heap.free(a, 8);
        heap.free(c, 2);
        assert_eq!(heap.allocate(2), Some(c));
    }

    #[test]
    fn test_free_block_merges_both_sides() {
        let mut heap = FreeBlockAllocator::new(30);
        let a = heap.allocate(10).unwrap();
        let b = heap.allocate(10).unwrap();
        let c = heap.allocate(10).unwrap();
        heap.free(a, 10);
        heap.free(c, 10);
        heap.free(b, 10);
        assert_eq!(heap.allocate(30), Some(0));
    }

    #[test]
    fn test_free_block_rejects_oversized() {
        let mut heap = FreeBlockAllocator::new(8);
        assert_eq!(heap.allocate(9), None);
        assert_eq!(heap.allocate(0), None);
    }

    #[test]
    fn test_cpu_heap_grows_by_pages() {
        let heap: CpuDescriptorHeap<u32> = CpuDescriptorHeap::new("test", 4);
        let a = heap.allocate(3);
        let b = heap.allocate(3);
        assert_eq!(a.page, 0);
        assert_eq!(b.page, 1);
        assert_eq!(heap.page_count(), 2);

        heap.write(&a, 0, 7);
        assert_eq!(heap.get(&a, 0), Some(7));
        heap.free(a);
        assert_eq!(heap.get(&DescriptorAllocation { page: 0, offset: 0, count: 1 }, 0), None);
    }

    #[test]
    fn test_gpu_heap_regions_are_disjoint() {
        let heap: GpuDescriptorHeap<u32> = GpuDescriptorHeap::new(16, 16);
        let s = heap.allocate_static(16).unwrap();
        let d = heap.allocate_dynamic(16).unwrap();
        assert_eq!(s.offset, 0);
        assert_eq!(d.offset, 16);
        assert!(heap.allocate_static(1).is_err());
        assert!(heap.allocate_dynamic(1).is_err());

        heap.free(d);
        assert_eq!(heap.dynamic_free(), 16);
    }

    #[test]
    fn test_gpu_heap_free_clears_slots() {
        let heap: GpuDescriptorHeap<u32> = GpuDescriptorHeap::new(0, 8);
        let d = heap.allocate_dynamic(2).unwrap();
        heap.write(d.index(1), 42);
        assert_eq!(heap.read(d.index(1)), Some(42));
        heap.free(d);
        assert_eq!(heap.read(d.offset + 1), None);
    }
}
