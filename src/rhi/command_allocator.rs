//! Command Allocator Pool
//!
//! A [`CommandAllocator`] is the backing store a command list records into.
//! After submission it is discarded back to its pool tagged with the fence
//! value of that submission, and it is only reset and handed out again once
//! the queue reports that value complete.
//!
//! ```text
//!   discard(3, A)  discard(5, B)
//!        │              │
//!        ▼              ▼
//!   ┌─────────┬─────────┐
//!   │ (3, A)  │ (5, B)  │   FIFO: fences increase front to back
//!   └─────────┴─────────┘
//!        ▲
//!   request(completed = 4) pops A; request(4) again creates C
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::backend::Backend;
use crate::rhi::command::Command;

/// Recording memory checked out to one command list at a time.
#[derive(Debug)]
pub struct CommandAllocator<B: Backend> {
    id: u64,
    commands: Vec<Command<B>>,
}

impl<B: Backend> CommandAllocator<B> {
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn push(&mut self, command: Command<B>) {
        self.commands.push(command);
    }

    #[inline]
    #[must_use]
    pub fn commands(&self) -> &[Command<B>] {
        &self.commands
    }

    /// Drops recorded commands, releasing the native references they hold.
    /// Capacity is kept.
    pub fn reset(&mut self) {
        self.commands.clear();
    }
}

struct PoolState<B: Backend> {
    retired: VecDeque<(u64, CommandAllocator<B>)>,
    created: usize,
}

pub struct CommandAllocatorPool<B: Backend> {
    state: Mutex<PoolState<B>>,
    next_id: AtomicU64,
    label: &'static str,
}

impl<B: Backend> CommandAllocatorPool<B> {
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            state: Mutex::new(PoolState {
                retired: VecDeque::new(),
                created: 0,
            }),
            next_id: AtomicU64::new(0),
            label,
        }
    }

    /// Reuses the oldest retired allocator if its fence is within
    /// `completed_fence`, otherwise creates a new one.
    pub fn request(&self, completed_fence: u64) -> CommandAllocator<B> {
        let mut state = self.state.lock();

        if let Some((fence, _)) = state.retired.front()
            && *fence <= completed_fence
            && let Some((_, mut allocator)) = state.retired.pop_front()
        {
            allocator.reset();
            return allocator;
        }

        state.created += 1;
        log::debug!(
            "{}: created command allocator #{} (completed fence {completed_fence})",
            self.label,
            state.created
        );
        CommandAllocator {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            commands: Vec::new(),
        }
    }

    /// Returns `allocator` to the pool, reusable once `fence` completes.
    pub fn discard(&self, fence: u64, allocator: CommandAllocator<B>) {
        let mut state = self.state.lock();
        // Concurrent submitters may discard slightly out of order.
        let at = state
            .retired
            .iter()
            .rposition(|(last, _)| *last <= fence)
            .map_or(0, |i| i + 1);
        state.retired.insert(at, (fence, allocator));
    }

    /// Allocators ever created by this pool.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state.lock().created
    }

    /// Allocators currently waiting in the pool.
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.lock().retired.len()
    }
}
