//! Upload Buffer
//!
//! Paged linear allocator over CPU-writable, GPU-readable memory. Each
//! [`CommandList`](super::command_list::CommandList) owns one and draws
//! dynamic vertex/index/constant data and texture staging bytes from it.
//!
//! Page lifecycle:
//!
//! ```text
//!   available ──allocate──▶ current/in use ──retire(fence)──▶ retired
//!       ▲                                                       │
//!       └──────────────── reset(completed ≥ fence) ─────────────┘
//! ```
//!
//! A single allocation never spans two pages, so every allocation's GPU
//! range is contiguous. Requests larger than a page fail.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::backend::Backend;
use crate::errors::{Result, RhiError};
use crate::types::{BufferDesc, ResourceStates, Usage};

#[inline]
#[must_use]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// A staging range of one upload page.
#[derive(Debug)]
pub struct UploadAllocation<B: Backend> {
    pub buffer: Arc<B::Buffer>,
    pub offset: u64,
    pub size: u64,
}

impl<B: Backend> Clone for UploadAllocation<B> {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
            offset: self.offset,
            size: self.size,
        }
    }
}

struct Page<B: Backend> {
    buffer: Arc<B::Buffer>,
    offset: u64,
}

impl<B: Backend> Page<B> {
    /// Tail padding past the page end is not reserved.
    fn has_space(&self, size: u64, alignment: u64, page_size: u64) -> bool {
        align_up(self.offset, alignment) + size <= page_size
    }
}

pub struct UploadBuffer<B: Backend> {
    backend: B,
    page_size: u64,
    current: Option<Page<B>>,
    /// Filled pages of the current recording.
    in_use: Vec<Page<B>>,
    /// Pages of submitted recordings, tagged with their fence.
    retired: VecDeque<(u64, Page<B>)>,
    available: Vec<Page<B>>,
    created: usize,
}

impl<B: Backend> UploadBuffer<B> {
    #[must_use]
    pub fn new(backend: B, page_size: u64) -> Self {
        Self {
            backend,
            page_size,
            current: None,
            in_use: Vec::new(),
            retired: VecDeque::new(),
            available: Vec::new(),
            created: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Pages ever created.
    #[inline]
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.created
    }

    /// Reserves `size` bytes at `alignment`.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<UploadAllocation<B>> {
        if size > self.page_size {
            return Err(RhiError::UploadAllocationTooLarge {
                requested: size,
                page_size: self.page_size,
            });
        }

        let needs_page = self
            .current
            .as_ref()
            .is_none_or(|page| !page.has_space(size, alignment, self.page_size));

        if needs_page {
            let page = self.request_page()?;
            if let Some(full) = self.current.replace(page) {
                self.in_use.push(full);
            }
        }

        let Some(page) = self.current.as_mut() else {
            unreachable!("a page was just installed");
        };

        let offset = align_up(page.offset, alignment);
        page.offset = (offset + align_up(size, alignment)).min(self.page_size);

        Ok(UploadAllocation {
            buffer: Arc::clone(&page.buffer),
            offset,
            size,
        })
    }

    /// Allocates and fills a staging range with `data`.
    pub fn upload(&mut self, data: &[u8], alignment: u64) -> Result<UploadAllocation<B>> {
        let allocation = self.allocate(data.len() as u64, alignment)?;
        self.backend
            .write_buffer(&allocation.buffer, allocation.offset, data)?;
        Ok(allocation)
    }

    /// Host write into a previously returned range.
    pub fn write(&self, allocation: &UploadAllocation<B>, offset: u64, data: &[u8]) -> Result<()> {
        debug_assert!(offset + data.len() as u64 <= allocation.size, "write past upload allocation");
        self.backend
            .write_buffer(&allocation.buffer, allocation.offset + offset, data)
    }

    /// Tags every page used since the last reset with `fence`.
    pub fn retire(&mut self, fence: u64) {
        for mut page in self.in_use.drain(..).chain(self.current.take()) {
            page.offset = 0;
            self.retired.push_back((fence, page));
        }
    }

    /// Makes pages whose fence is within `completed_fence` reusable.
    ///
    /// Pages touched since the last [`retire`](Self::retire) never reached
    /// the GPU and are recycled as well.
    pub fn reset(&mut self, completed_fence: u64) {
        for mut page in self.in_use.drain(..).chain(self.current.take()) {
            page.offset = 0;
            self.available.push(page);
        }

        while let Some((fence, _)) = self.retired.front()
            && *fence <= completed_fence
            && let Some((_, page)) = self.retired.pop_front()
        {
            self.available.push(page);
        }
    }

    fn request_page(&mut self) -> Result<Page<B>> {
        if let Some(page) = self.available.pop() {
            return Ok(page);
        }

        let desc = BufferDesc {
            usage: Usage::Upload,
            size: self.page_size,
            initial_state: ResourceStates::GENERIC_READ,
            debug_name: format!("Upload Page {}", self.created),
            ..Default::default()
        };
        let buffer = self.backend.create_buffer(&desc)?;
        self.created += 1;
        log::debug!("Upload buffer page #{} created ({} bytes)", self.created, self.page_size);

        Ok(Page {
            buffer: Arc::new(buffer),
            offset: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    fn upload(page_size: u64) -> UploadBuffer<NullBackend> {
        UploadBuffer::new(NullBackend::default(), page_size)
    }

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(7, 1), 7);
    }

    #[test]
    fn test_allocation_larger_than_page_fails() {
        let mut upload = upload(1024);
        let err = upload.allocate(1025, 4).unwrap_err();
        assert!(matches!(
            err,
            RhiError::UploadAllocationTooLarge {
                requested: 1025,
                page_size: 1024
            }
        ));
        assert_eq!(upload.page_count(), 0);
    }

    #[test]
    fn test_allocations_never_overlap() {
        let mut upload = upload(4096);
        let sizes = [3u64, 17, 256, 1, 64, 100, 250, 9];
        let alignments = [1u64, 4, 16, 256];

        let mut ranges = Vec::new();
        for (i, size) in sizes.iter().enumerate() {
            let a = upload.allocate(*size, alignments[i % alignments.len()]).unwrap();
            assert_eq!(a.offset % alignments[i % alignments.len()], 0);
            ranges.push((Arc::as_ptr(&a.buffer) as usize, a.offset, a.offset + a.size));
        }

        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                let disjoint = a.0 != b.0 || a.2 <= b.1 || b.2 <= a.1;
                assert!(disjoint, "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn test_full_page_rolls_over() {
        let mut upload = upload(512);
        let a = upload.allocate(400, 4).unwrap();
        let b = upload.allocate(400, 4).unwrap();
        assert!(!Arc::ptr_eq(&a.buffer, &b.buffer));
        assert_eq!(b.offset, 0);
        assert_eq!(upload.page_count(), 2);
    }

    #[test]
    fn test_exact_page_fits() {
        let mut upload = upload(512);
        let a = upload.allocate(512, 256).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(upload.page_count(), 1);
    }

    #[test]
    fn test_padded_size_does_not_force_a_new_page() {
        let mut upload = upload(500);
        let a = upload.allocate(500, 256).unwrap();
        assert_eq!(a.offset, 0);
        assert_eq!(upload.page_count(), 1);

        let b = upload.allocate(1, 1).unwrap();
        assert!(!Arc::ptr_eq(&a.buffer, &b.buffer), "page is full");
        assert_eq!(upload.page_count(), 2);
    }

    #[test]
    fn test_padding_clamped_to_page_end() {
        let mut upload = upload(500);
        let a = upload.allocate(300, 1).unwrap();
        // 150 pads to 192 and would end at 512.
        let b = upload.allocate(150, 64).unwrap();
        assert!(Arc::ptr_eq(&a.buffer, &b.buffer));
        assert_eq!(b.offset, 320);
        assert_eq!(upload.page_count(), 1);

        let c = upload.allocate(1, 1).unwrap();
        assert!(!Arc::ptr_eq(&a.buffer, &c.buffer));
        assert_eq!(c.offset, 0);
    }

    #[test]
    fn test_retired_pages_wait_for_fence() {
        let mut upload = upload(256);
        upload.allocate(256, 1).unwrap();
        upload.retire(7);

        upload.reset(6);
        upload.allocate(16, 1).unwrap();
        assert_eq!(upload.page_count(), 2, "in-flight page must not be reused");

        upload.retire(8);
        upload.reset(8);
        upload.allocate(16, 1).unwrap();
        upload.allocate(16, 1).unwrap();
        assert_eq!(upload.page_count(), 2);
    }

    #[test]
    fn test_unsubmitted_pages_recycle_on_reset() {
        let mut upload = upload(256);
        let a = upload.allocate(200, 1).unwrap();
        upload.reset(0);
        let b = upload.allocate(200, 1).unwrap();
        assert!(Arc::ptr_eq(&a.buffer, &b.buffer));
        assert_eq!(b.offset, 0);
    }
}
