//! Backend-independent containers used by the device.

pub mod bitset;
pub mod pool;

pub use bitset::BitSetAllocator;
pub use pool::{Handle, Pool};
