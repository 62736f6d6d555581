//! Ring buffer error types

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingError {
    #[error("Ring capacity {0} is not a power of two")]
    CapacityNotPowerOfTwo(usize),

    #[error("Ring capacity {capacity} is smaller than one {block}-byte block")]
    CapacityBelowBlock { capacity: usize, block: usize },

    /// The producer wrapped onto unread data
    #[error("Ring buffer overflow at head {head} after {produced} bytes")]
    Overflow { head: usize, produced: usize },
}
