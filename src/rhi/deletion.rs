//! Deferred Deletion
//!
//! Resources are never destroyed synchronously because in-flight command
//! lists may still reference them. `Delete*` calls enqueue a destructor
//! stamped with the current frame; garbage collection runs it once the
//! frame counter has retired past the stamp.
//!
//! [`InflightQueue`] does the same for the keep-alive sets of submitted
//! command lists, keyed by queue fence instead of frame.

use std::collections::VecDeque;

use parking_lot::Mutex;

type Destructor<C> = Box<dyn FnOnce(&C) + Send>;

struct DeleteItem<C> {
    frame: u64,
    destructor: Destructor<C>,
}

/// Frame-stamped destructors run against a context `C`.
pub struct DeferredDeleteQueue<C> {
    items: Mutex<VecDeque<DeleteItem<C>>>,
}

impl<C> Default for DeferredDeleteQueue<C> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }
}

impl<C> DeferredDeleteQueue<C> {
    pub fn push(&self, frame: u64, destructor: impl FnOnce(&C) + Send + 'static) {
        self.items.lock().push_back(DeleteItem {
            frame,
            destructor: Box::new(destructor),
        });
    }

    /// Runs every destructor stamped before `completed_frame`. Returns how
    /// many ran. The lock is released before any destructor executes.
    pub fn collect(&self, completed_frame: u64, context: &C) -> usize {
        let ready: Vec<DeleteItem<C>> = {
            let mut items = self.items.lock();
            let (ready, pending): (VecDeque<_>, VecDeque<_>) =
                items.drain(..).partition(|item| item.frame < completed_frame);
            *items = pending;
            ready.into()
        };

        let count = ready.len();
        for item in ready {
            (item.destructor)(context);
        }
        count
    }

    /// Runs everything regardless of stamp.
    pub fn flush(&self, context: &C) -> usize {
        self.collect(u64::MAX, context)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// Values held until a fence completes, in submission order.
pub struct InflightQueue<T> {
    entries: Mutex<VecDeque<(u64, T)>>,
}

impl<T> Default for InflightQueue<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }
}

impl<T> InflightQueue<T> {
    pub fn push(&self, fence: u64, value: T) {
        self.entries.lock().push_back((fence, value));
    }

    /// Drops entries whose fence is within `completed_fence`.
    pub fn collect(&self, completed_fence: u64) -> usize {
        let released: Vec<(u64, T)> = {
            let mut entries = self.entries.lock();
            let split = entries
                .iter()
                .position(|(fence, _)| *fence > completed_fence)
                .unwrap_or(entries.len());
            entries.drain(..split).collect()
        };
        released.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
