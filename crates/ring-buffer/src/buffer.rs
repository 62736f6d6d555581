//! Block-Draining Ring Buffer Implementation

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use critical_section::Mutex;
use sd_protocol::{Block, BlockSource, BLOCK_SIZE};
use serde::Serialize;
use tracing::error;

use crate::error::RingError;
use crate::memory::{AddressableMemory, BusGuard};

struct Shared<M> {
    /// Backing memory; every access happens inside a critical section
    memory: Mutex<RefCell<M>>,
    capacity: usize,
    mask: usize,
    /// Write cursor, stored only by the producer
    head: AtomicUsize,
    /// Read cursor, stored only by the consumer
    tail: AtomicUsize,
    overflowed: AtomicBool,
    total_produced: AtomicUsize,
    blocks_consumed: AtomicUsize,
}

impl<M> Shared<M> {
    fn pending(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) & self.mask
    }

    fn stats(&self) -> RingStats {
        RingStats {
            capacity: self.capacity,
            head: self.head.load(Ordering::Acquire),
            tail: self.tail.load(Ordering::Acquire),
            pending: self.pending(),
            total_produced: self.total_produced.load(Ordering::Relaxed),
            blocks_consumed: self.blocks_consumed.load(Ordering::Relaxed),
            overflowed: self.overflowed.load(Ordering::Acquire),
        }
    }
}

/// Point-in-time view of the ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RingStats {
    pub capacity: usize,
    pub head: usize,
    pub tail: usize,
    pub pending: usize,
    pub total_produced: usize,
    pub blocks_consumed: usize,
    pub overflowed: bool,
}

/// Check that `capacity` can back a ring: a power of two holding at least
/// one block.
pub fn check_capacity(capacity: usize) -> Result<(), RingError> {
    if !capacity.is_power_of_two() {
        return Err(RingError::CapacityNotPowerOfTwo(capacity));
    }
    if capacity < BLOCK_SIZE {
        return Err(RingError::CapacityBelowBlock {
            capacity,
            block: BLOCK_SIZE,
        });
    }
    Ok(())
}

/// Ring buffer over an [`AddressableMemory`], before it is split into
/// its two halves. Cursors start at zero.
pub struct RingBuffer<M> {
    shared: Arc<Shared<M>>,
}

impl<M: AddressableMemory> RingBuffer<M> {
    /// Take ownership of `memory`; its whole capacity becomes the ring
    pub fn new(memory: M) -> Result<Self, RingError> {
        let capacity = memory.capacity();
        check_capacity(capacity)?;

        Ok(Self {
            shared: Arc::new(Shared {
                memory: Mutex::new(RefCell::new(memory)),
                capacity,
                mask: capacity - 1,
                head: AtomicUsize::new(0),
                tail: AtomicUsize::new(0),
                overflowed: AtomicBool::new(false),
                total_produced: AtomicUsize::new(0),
                blocks_consumed: AtomicUsize::new(0),
            }),
        })
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Split into the interrupt-side producer and the foreground consumer.
    /// Neither half is `Clone`, so each cursor keeps exactly one writer.
    pub fn split(self) -> (RingProducer<M>, RingConsumer<M>) {
        (
            RingProducer {
                shared: Arc::clone(&self.shared),
            },
            RingConsumer {
                shared: self.shared,
            },
        )
    }
}

/// Producer half, owned by the timer interrupt
pub struct RingProducer<M> {
    shared: Arc<Shared<M>>,
}

impl<M: AddressableMemory> RingProducer<M> {
    /// Append one byte. O(1), never waits.
    ///
    /// Returns [`RingError::Overflow`] when the write lands the head on the
    /// tail, meaning the consumer fell a full lap behind.
    pub fn produce(&mut self, value: u8) -> Result<(), RingError> {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Relaxed);

        critical_section::with(|cs| {
            let mut memory = shared.memory.borrow_ref_mut(cs);
            let mut bus = BusGuard::new(&mut *memory);
            bus.set_address(head);
            bus.write(value);
        });

        let next = (head + 1) & shared.mask;
        shared.head.store(next, Ordering::Release);
        let produced = shared.total_produced.fetch_add(1, Ordering::Relaxed) + 1;

        if next == shared.tail.load(Ordering::Acquire) {
            if !shared.overflowed.swap(true, Ordering::AcqRel) {
                error!(head = next, produced, "Ring buffer overflow, consumer fell behind");
            }
            return Err(RingError::Overflow {
                head: next,
                produced,
            });
        }
        Ok(())
    }

    /// Append a 16-bit sample, low byte first
    pub fn produce_sample(&mut self, sample: u16) -> Result<(), RingError> {
        let [low, high] = sample.to_le_bytes();
        self.produce(low)?;
        self.produce(high)
    }

    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }
}

/// Consumer half, owned by the foreground loop
pub struct RingConsumer<M> {
    shared: Arc<Shared<M>>,
}

impl<M: AddressableMemory> RingConsumer<M> {
    /// Bytes produced but not yet consumed
    pub fn pending(&self) -> usize {
        self.shared.pending()
    }

    /// Whether at least one full block is waiting
    pub fn available_to_consume(&self) -> bool {
        self.pending() >= BLOCK_SIZE
    }

    /// Whether the producer ever overran the consumer
    pub fn has_overflowed(&self) -> bool {
        self.shared.overflowed.load(Ordering::Acquire)
    }

    /// Hand the oldest full block to `sink`, then advance the tail by one
    /// block if the sink succeeded. Returns `None` when less than a block
    /// is pending.
    pub fn consume_block<T, E, F>(&mut self, sink: F) -> Option<Result<T, E>>
    where
        F: FnOnce(&mut BlockReader<'_, M>) -> Result<T, E>,
    {
        if !self.available_to_consume() {
            return None;
        }

        let shared = &*self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);
        let mut reader = BlockReader {
            shared,
            start: tail,
        };
        let result = sink(&mut reader);

        if result.is_ok() {
            shared
                .tail
                .store((tail + BLOCK_SIZE) & shared.mask, Ordering::Release);
            shared.blocks_consumed.fetch_add(1, Ordering::Relaxed);
        }
        Some(result)
    }

    pub fn stats(&self) -> RingStats {
        self.shared.stats()
    }
}

/// Reads one pending block straight out of ring memory
pub struct BlockReader<'a, M> {
    shared: &'a Shared<M>,
    start: usize,
}

impl<M: AddressableMemory> BlockReader<'_, M> {
    /// Ring offset of the block's first byte
    pub fn start(&self) -> usize {
        self.start
    }

    /// Copy the whole block out
    pub fn copy_to(&mut self, block: &mut Block) {
        for (index, byte) in block.iter_mut().enumerate() {
            *byte = self.byte_at(index);
        }
    }
}

impl<M: AddressableMemory> BlockSource for BlockReader<'_, M> {
    fn byte_at(&mut self, index: usize) -> u8 {
        let address = (self.start + index) & self.shared.mask;
        // Address and read must not be split by the producer.
        critical_section::with(|cs| {
            let mut memory = self.shared.memory.borrow_ref_mut(cs);
            memory.set_address(address);
            memory.read()
        })
    }
}
