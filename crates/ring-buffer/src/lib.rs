//! Block-Draining Ring Buffer
//!
//! Fixed-capacity, power-of-two byte ring stored in an external
//! addressable memory. An interrupt-context producer appends one byte per
//! call; a foreground consumer drains whole 512-byte blocks straight into
//! the card write path.

mod buffer;
mod error;
mod memory;
pub mod sram;

pub use buffer::{check_capacity, BlockReader, RingBuffer, RingConsumer, RingProducer, RingStats};
pub use error::RingError;
pub use memory::{AddressableMemory, BusGuard, BusState, InternalMemory};
pub use sram::{address_span, DataDirection, SimulatedSramBus, Sram, SramBus, MAX_ADDRESS_BITS};
