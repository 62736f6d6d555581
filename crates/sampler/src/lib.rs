//! Sample Producer
//!
//! Everything that runs in the sampling interrupts: the converter latch,
//! the sync handshake that swaps four samples for a marker pattern, and
//! the per-tick producer feeding the ring buffer.

mod latch;
mod marker;
mod producer;
mod sync;

pub use latch::{assemble_conversion, split_conversion, ConversionSource, RampSource, SampleLatch};
pub use marker::{GateOutput, SampleGate, MARKER_HIGH, MARKER_LEN, MARKER_LOW};
pub use producer::{SampleProducer, TickOutcome};
pub use sync::{HandshakePins, NoSync, SharedSyncLine, SyncSignal};
