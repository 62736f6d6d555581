//! End-to-end recording against the simulated card and SRAM

use std::sync::Arc;

use recorder::{Recorder, RecorderConfig};
use ring_buffer::{SimulatedSramBus, Sram};
use sampler::{RampSource, SampleLatch, SampleProducer, SharedSyncLine, MARKER_HIGH, MARKER_LOW};
use sd_protocol::sim::{SimBehavior, SimulatedCard};
use sd_protocol::{CardTimeouts, SdCard, BLOCK_SIZE};

const SAMPLES_PER_BLOCK: usize = BLOCK_SIZE / 2;

fn config() -> RecorderConfig {
    RecorderConfig {
        init_retry_delay_ms: 0,
        start_block: 2048,
        buffer_capacity: 1 << 12,
        ..Default::default()
    }
}

fn decode(block: &[u8]) -> Vec<u16> {
    block
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

#[test]
fn records_ramp_with_sync_marker() {
    let config = config();
    let bits = config.address_bits();
    let card = SdCard::new(
        SimulatedCard::new(SimBehavior {
            ignored_go_idle: 2,
            app_init_busy_rounds: 2,
            ..Default::default()
        }),
        CardTimeouts::default(),
    );
    let memory = Sram::new(SimulatedSramBus::new(bits), bits);

    let (mut recorder, ring) = Recorder::start(card, memory, &config).unwrap();
    let companion = SharedSyncLine::new();
    let mut producer = SampleProducer::new(
        ring,
        Arc::new(SampleLatch::new()),
        RampSource::new(1, 1),
        companion.clone(),
    );

    // Interleave ticks and drains the way the interrupt and the loop would.
    let blocks = 6;
    let mut stored = 0;
    let mut tick = 0u64;
    while stored < blocks * SAMPLES_PER_BLOCK {
        tick += 1;
        companion.request(tick == 300);
        if producer.on_timer_tick().unwrap() != sampler::TickOutcome::Dropped {
            stored += 1;
        }
        if tick % 64 == 0 {
            recorder.poll_once().unwrap();
        }
    }
    while recorder.poll_once().unwrap() {}

    let (summary, card) = recorder.finish().unwrap();
    assert_eq!(summary.blocks_written, blocks as u64);
    assert_eq!(summary.ring.pending, 0);
    assert!(!summary.ring.overflowed);
    assert!(summary.pre_erase_applied);

    let mut samples = Vec::new();
    for block in 0..blocks as u32 {
        let data = card.link().block(config.start_block + block).unwrap();
        samples.extend(decode(data));
    }

    // Tick 300 is dropped; ticks 301-304 carry the marker.
    let marker_at = 299;
    assert_eq!(
        &samples[marker_at..marker_at + 4],
        &[MARKER_HIGH, MARKER_LOW, MARKER_HIGH, MARKER_LOW]
    );
    // Ramp with a one-sample lag: tick n stores n - 1.
    assert_eq!(samples[0], 0);
    assert_eq!(samples[marker_at - 1], 298);
    assert_eq!(samples[marker_at + 4], 304);
    for pair in samples[marker_at + 4..].windows(2) {
        assert_eq!(pair[1], pair[0] + 1);
    }

    let stats = card.link().stats();
    assert_eq!(stats.pre_erase, Some(config.pre_erase_blocks));
    assert_eq!(stats.app_init_frames, 3);
}

#[test]
fn card_that_never_wakes_halts_with_code_two() {
    let card = SdCard::new(
        SimulatedCard::new(SimBehavior {
            unresponsive: true,
            ..Default::default()
        }),
        CardTimeouts {
            go_idle_attempts: 4,
            ..Default::default()
        },
    );
    let memory = Sram::new(SimulatedSramBus::new(12), 12);

    let err = Recorder::start(card, memory, &config()).err().unwrap();
    assert_eq!(err.fatal_condition().code(), 2);
}

#[test]
fn stalled_drain_halts_with_code_three() {
    let config = config();
    let bits = config.address_bits();
    let card = SdCard::new(SimulatedCard::default(), CardTimeouts::default());
    let memory = Sram::new(SimulatedSramBus::new(bits), bits);

    let (mut recorder, ring) = Recorder::start(card, memory, &config).unwrap();
    let mut producer = SampleProducer::new(
        ring,
        Arc::new(SampleLatch::new()),
        RampSource::new(0, 1),
        sampler::NoSync,
    );

    let overflowed = (0..config.buffer_capacity)
        .map(|_| producer.on_timer_tick())
        .any(|outcome| outcome.is_err());
    assert!(overflowed);

    let err = recorder.poll_once().unwrap_err();
    assert_eq!(err.fatal_condition().code(), 3);
}
