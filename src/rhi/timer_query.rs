//! Timer Queries
//!
//! A timer query is a pair of timestamp slots in the device query heap:
//! query `p` owns slots `2p` (begin) and `2p + 1` (end). The elapsed time is
//! resolved once the submission that ended the query has completed.

use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::core::bitset::BitSetAllocator;
use crate::core::pool::Pool;
use crate::errors::{Result, RhiError};
use crate::types::{ExecutionReceipt, TimerQuery, TimerQueryHandle};

#[derive(Debug, Clone, Default)]
pub(crate) struct TimerQueryRecord {
    pub pair: u32,
    /// Submission that recorded the end timestamp.
    pub pending: Option<ExecutionReceipt>,
    pub elapsed: Option<Duration>,
}

impl TimerQueryRecord {
    #[inline]
    pub fn begin_index(&self) -> u32 {
        self.pair * 2
    }

    #[inline]
    pub fn end_index(&self) -> u32 {
        self.pair * 2 + 1
    }
}

/// Converts a tick delta to wall time using the backend period (ns per tick).
#[must_use]
pub fn ticks_to_duration(begin: u64, end: u64, period_ns: f32) -> Duration {
    let ticks = end.saturating_sub(begin);
    Duration::from_nanos((ticks as f64 * f64::from(period_ns)).round() as u64)
}

pub(crate) struct TimerQueryPool {
    pairs: Mutex<BitSetAllocator>,
    pub records: RwLock<Pool<TimerQueryRecord, TimerQuery>>,
}

impl TimerQueryPool {
    /// `heap_capacity` timestamp slots, giving half as many queries.
    pub fn new(heap_capacity: u32) -> Self {
        Self {
            pairs: Mutex::new(BitSetAllocator::new(heap_capacity / 2)),
            records: RwLock::new(Pool::new(0)),
        }
    }

    pub fn create(&self) -> Result<TimerQueryHandle> {
        let mut pairs = self.pairs.lock();
        let Some(pair) = pairs.allocate() else {
            return Err(RhiError::QueryHeapExhausted {
                capacity: pairs.capacity() * 2,
            });
        };
        drop(pairs);

        Ok(self.records.write().insert(TimerQueryRecord {
            pair,
            ..Default::default()
        }))
    }

    pub fn release(&self, handle: TimerQueryHandle) {
        if let Some(record) = self.records.write().release(handle) {
            self.pairs.lock().release(record.pair);
        }
    }

    #[must_use]
    pub fn allocated(&self) -> u32 {
        self.pairs.lock().allocated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairs_map_to_adjacent_slots() {
        let pool = TimerQueryPool::new(8);
        let a = pool.create().unwrap();
        let b = pool.create().unwrap();
        let records = pool.records.read();
        let (ra, rb) = (records.get(a).unwrap(), records.get(b).unwrap());
        assert_eq!((ra.begin_index(), ra.end_index()), (0, 1));
        assert_eq!((rb.begin_index(), rb.end_index()), (2, 3));
    }

    #[test]
    fn test_exhaustion_and_release() {
        let pool = TimerQueryPool::new(4);
        let a = pool.create().unwrap();
        pool.create().unwrap();
        assert!(matches!(
            pool.create(),
            Err(RhiError::QueryHeapExhausted { capacity: 4 })
        ));

        pool.release(a);
        assert_eq!(pool.allocated(), 1);
        assert!(pool.create().is_ok());
    }

    #[test]
    fn test_ticks_to_duration() {
        assert_eq!(ticks_to_duration(100, 1100, 1.0), Duration::from_nanos(1000));
        assert_eq!(ticks_to_duration(0, 10, 2.5), Duration::from_nanos(25));
        assert_eq!(ticks_to_duration(50, 10, 1.0), Duration::ZERO);
    }
}
