//! Timer-tick sample producer

use std::sync::Arc;

use ring_buffer::{AddressableMemory, RingError, RingProducer, RingStats};

use crate::latch::{ConversionSource, SampleLatch};
use crate::marker::{GateOutput, SampleGate};
use crate::sync::SyncSignal;

/// Result of one timer tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Stored(GateOutput),
    Dropped,
}

/// Body of the sampling timer interrupt.
///
/// Each tick starts the next conversion and stores the one latched on the
/// previous tick, so the record lags the converter by one sample.
pub struct SampleProducer<M, C, S> {
    ring: RingProducer<M>,
    latch: Arc<SampleLatch>,
    source: C,
    sync: S,
    gate: SampleGate,
    ticks: u64,
}

impl<M, C, S> SampleProducer<M, C, S>
where
    M: AddressableMemory,
    C: ConversionSource,
    S: SyncSignal,
{
    pub fn new(ring: RingProducer<M>, latch: Arc<SampleLatch>, source: C, sync: S) -> Self {
        Self {
            ring,
            latch,
            source,
            sync,
            gate: SampleGate::new(),
            ticks: 0,
        }
    }

    /// Handle one timer period. Never waits.
    pub fn on_timer_tick(&mut self) -> Result<TickOutcome, RingError> {
        self.ticks += 1;
        let sample = self.latch.load();
        self.source.start_conversion(&self.latch);

        let asserted = self.sync.is_asserted();
        let output = self.gate.process(sample, asserted);
        self.sync.set_acknowledge(self.gate.acknowledging());

        match output.value() {
            Some(value) => {
                self.ring.produce_sample(value)?;
                Ok(TickOutcome::Stored(output))
            }
            None => Ok(TickOutcome::Dropped),
        }
    }

    /// Timer periods handled so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn ring_stats(&self) -> RingStats {
        self.ring.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::latch::RampSource;
    use crate::marker::{MARKER_HIGH, MARKER_LOW};
    use crate::sync::{NoSync, SharedSyncLine};
    use ring_buffer::{InternalMemory, RingBuffer, RingConsumer};
    use sd_protocol::{Block, BLOCK_SIZE};

    fn samples_of(consumer: &mut RingConsumer<InternalMemory>) -> Vec<u16> {
        let block = consumer
            .consume_block(|reader| {
                let mut block: Block = [0u8; BLOCK_SIZE];
                reader.copy_to(&mut block);
                Ok::<_, ()>(block)
            })
            .unwrap()
            .unwrap();
        block
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }

    #[test]
    fn test_one_sample_lag() {
        let (ring, mut consumer) = RingBuffer::new(InternalMemory::new(1024)).unwrap().split();
        let latch = Arc::new(SampleLatch::new());
        let mut producer = SampleProducer::new(ring, latch, RampSource::new(1, 1), NoSync);

        for _ in 0..BLOCK_SIZE / 2 {
            producer.on_timer_tick().unwrap();
        }
        let samples = samples_of(&mut consumer);
        // Nothing was latched before the first tick.
        assert_eq!(&samples[..4], &[0, 1, 2, 3]);
        assert_eq!(producer.ticks(), 256);
    }

    #[test]
    fn test_sync_request_inserts_marker() {
        let (ring, mut consumer) = RingBuffer::new(InternalMemory::new(1024)).unwrap().split();
        let latch = Arc::new(SampleLatch::new());
        let companion = SharedSyncLine::new();
        let mut producer =
            SampleProducer::new(ring, latch, RampSource::new(100, 1), companion.clone());

        producer.on_timer_tick().unwrap();
        companion.request(true);
        assert_eq!(producer.on_timer_tick().unwrap(), TickOutcome::Dropped);
        assert!(companion.acknowledged());
        companion.request(false);

        let mut stored = 1;
        while stored < BLOCK_SIZE / 2 {
            if let TickOutcome::Stored(_) = producer.on_timer_tick().unwrap() {
                stored += 1;
            }
        }
        assert!(!companion.acknowledged());

        let samples = samples_of(&mut consumer);
        assert_eq!(
            &samples[..6],
            &[0, MARKER_HIGH, MARKER_LOW, MARKER_HIGH, MARKER_LOW, 105]
        );
    }

    #[test]
    fn test_overflow_surfaces_from_tick() {
        let (ring, _consumer) = RingBuffer::new(InternalMemory::new(512)).unwrap().split();
        let latch = Arc::new(SampleLatch::new());
        let mut producer = SampleProducer::new(ring, latch, RampSource::new(0, 1), NoSync);

        for _ in 0..255 {
            producer.on_timer_tick().unwrap();
        }
        assert!(matches!(
            producer.on_timer_tick(),
            Err(RingError::Overflow { .. })
        ));
        assert!(producer.ring_stats().overflowed);
    }
}
