//! Fence
//!
//! A monotonically increasing 64-bit counter that the GPU advances as it
//! retires submitted work. The CPU compares it against a target value to
//! decide if memory tied to that work can be reused.
//!
//! Native backends signal the fence from their completion path; waiting
//! threads park on a condition variable until the value is reached.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub struct Fence {
    completed: AtomicU64,
    lock: Mutex<()>,
    signalled: Condvar,
}

impl Fence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The highest value signalled so far.
    #[inline]
    #[must_use]
    pub fn completed_value(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn is_complete(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// Advances the fence to `value`. Lower values never move it backwards.
    pub fn signal(&self, value: u64) {
        let previous = self.completed.fetch_max(value, Ordering::AcqRel);
        if value > previous {
            let _guard = self.lock.lock();
            self.signalled.notify_all();
        }
    }

    /// Parks the calling thread until `value` completes or `timeout` elapses.
    /// Returns whether the value completed.
    pub fn wait_timeout(&self, value: u64, timeout: Duration) -> bool {
        if self.is_complete(value) {
            return true;
        }

        let mut guard = self.lock.lock();
        if !self.is_complete(value) {
            let _ = self.signalled.wait_for(&mut guard, timeout);
        }
        self.is_complete(value)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_signal_is_monotonic() {
        let fence = Fence::new();
        fence.signal(5);
        fence.signal(3);
        assert_eq!(fence.completed_value(), 5);
        assert!(fence.is_complete(4));
        assert!(!fence.is_complete(6));
    }

    #[test]
    fn test_wait_returns_immediately_when_complete() {
        let fence = Fence::new();
        fence.signal(2);
        assert!(fence.wait_timeout(2, Duration::ZERO));
    }

    #[test]
    fn test_wait_times_out() {
        let fence = Fence::new();
        assert!(!fence.wait_timeout(1, Duration::from_millis(5)));
    }

    #[test]
    fn test_wait_wakes_on_signal_from_other_thread() {
        let fence = Arc::new(Fence::new());
        let signaller = Arc::clone(&fence);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaller.signal(1);
        });

        let mut done = false;
        for _ in 0..500 {
            if fence.wait_timeout(1, Duration::from_millis(10)) {
                done = true;
                break;
            }
        }
        handle.join().unwrap();
        assert!(done);
    }
}
