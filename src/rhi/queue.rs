//! Command Queue
//!
//! Wraps one native queue and the fence timeline it owns. The queue's
//! [`last_completed_fence`](CommandQueue::last_completed_fence) is the single
//! value every pool consults before reusing memory tied to this queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{Backend, NativeQueue};
use crate::errors::Result;
use crate::rhi::command::Command;
use crate::rhi::fence::Fence;
use crate::types::QueueType;

/// Granularity of blocking waits between completion polls.
const WAIT_SLICE: Duration = Duration::from_millis(1);

pub struct CommandQueue<B: Backend> {
    queue_type: QueueType,
    native: B::Queue,
    fence: Arc<Fence>,
    /// Last value handed to the native signal. Guards submission order too.
    next_fence_value: Mutex<u64>,
    last_completed: AtomicU64,
}

impl<B: Backend> CommandQueue<B> {
    pub fn new(backend: &B, queue_type: QueueType) -> Result<Self> {
        Ok(Self {
            queue_type,
            native: backend.create_queue(queue_type)?,
            fence: Arc::new(Fence::new()),
            next_fence_value: Mutex::new(0),
            last_completed: AtomicU64::new(0),
        })
    }

    #[inline]
    #[must_use]
    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    #[inline]
    #[must_use]
    pub fn native(&self) -> &B::Queue {
        &self.native
    }

    #[inline]
    #[must_use]
    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    /// The most recently issued fence value.
    #[must_use]
    pub fn last_signalled_fence(&self) -> u64 {
        *self.next_fence_value.lock()
    }

    /// Signals the next fence value behind all submitted work and returns it.
    pub fn increment_fence(&self) -> u64 {
        let mut value = self.next_fence_value.lock();
        *value += 1;
        self.native.signal(&self.fence, *value);
        *value
    }

    /// Submits `streams` followed by a fence signal, returning the signalled value.
    pub fn execute(&self, streams: &[&[Command<B>]]) -> Result<u64> {
        let mut value = self.next_fence_value.lock();
        self.native.submit(streams)?;
        *value += 1;
        self.native.signal(&self.fence, *value);
        Ok(*value)
    }

    /// Refreshes and returns the completed value.
    pub fn last_completed_fence(&self) -> u64 {
        self.native.poll(false);
        let completed = self.fence.completed_value();
        self.last_completed.fetch_max(completed, Ordering::AcqRel).max(completed)
    }

    #[must_use]
    pub fn is_fence_complete(&self, value: u64) -> bool {
        if value <= self.last_completed.load(Ordering::Acquire) {
            return true;
        }
        value <= self.last_completed_fence()
    }

    /// Blocks until `value` completes on this queue.
    pub fn wait_for_fence(&self, value: u64) {
        if self.is_fence_complete(value) {
            return;
        }
        self.wait_on(&self.fence, value);
        self.last_completed.fetch_max(self.fence.completed_value(), Ordering::AcqRel);
    }

    /// Blocks until `fence` reaches `value`, driving this queue's completions.
    ///
    /// Used for fences signalled through this queue other than its own
    /// timeline, such as the device frame fence.
    pub fn wait_on(&self, fence: &Fence, value: u64) {
        while !fence.is_complete(value) {
            self.native.poll(true);
            if fence.wait_timeout(value, WAIT_SLICE) {
                break;
            }
        }
    }

    /// Signals an external fence behind all work submitted so far.
    pub fn signal(&self, fence: &Arc<Fence>, value: u64) {
        let _order = self.next_fence_value.lock();
        self.native.signal(fence, value);
    }

    /// Makes later work on this queue wait for `fence` to reach `value`.
    pub fn gpu_wait(&self, fence: &Arc<Fence>, value: u64) {
        let _order = self.next_fence_value.lock();
        self.native.wait(fence, value);
    }

    /// Blocks until everything submitted so far has retired.
    pub fn wait_for_idle(&self) -> u64 {
        let value = self.increment_fence();
        self.wait_for_fence(value);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::{NullBackend, TimelineMode};

    #[test]
    fn test_increment_fence_strictly_increases() {
        let backend = NullBackend::default();
        let queue = CommandQueue::new(&backend, QueueType::Graphics).unwrap();
        let mut last = 0;
        for _ in 0..16 {
            let value = queue.increment_fence();
            assert!(value > last);
            last = value;
        }
    }

    #[test]
    fn test_immediate_mode_completes_on_signal() {
        let backend = NullBackend::default();
        let queue = CommandQueue::new(&backend, QueueType::Copy).unwrap();
        let value = queue.execute(&[]).unwrap();
        assert!(queue.is_fence_complete(value));
        assert_eq!(queue.last_completed_fence(), value);
    }

    #[test]
    fn test_deferred_mode_waits_then_completes() {
        let backend = NullBackend::new(TimelineMode::Deferred);
        let queue = CommandQueue::new(&backend, QueueType::Graphics).unwrap();
        let value = queue.execute(&[]).unwrap();
        assert!(!queue.is_fence_complete(value));

        queue.wait_for_fence(value);
        assert!(queue.is_fence_complete(value));
    }

    #[test]
    fn test_concurrent_increments_are_unique() {
        let backend = NullBackend::default();
        let queue = Arc::new(CommandQueue::new(&backend, QueueType::Compute).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || (0..64).map(|_| queue.increment_fence()).collect::<Vec<_>>())
            })
            .collect();

        let mut values: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 256);
        assert_eq!(queue.last_signalled_fence(), 256);
    }
}
