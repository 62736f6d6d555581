//! Foreground recording loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ring_buffer::{AddressableMemory, RingBuffer, RingConsumer, RingProducer, RingStats};
use sd_protocol::{CardError, CardInfo, PreErase, SdCard, SpiLink};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RecorderConfig;
use crate::error::RecorderError;

/// Run the full card initialization up to `attempts` times
pub fn bring_up_card<L: SpiLink>(
    card: &mut SdCard<L>,
    attempts: u32,
    retry_delay: Duration,
) -> Result<CardInfo, RecorderError> {
    let mut last = CardError::NotInitialized;
    for attempt in 1..=attempts {
        match card.initialize() {
            Ok(info) => {
                info!(attempt, "SD card initialized");
                return Ok(info);
            }
            Err(err) => {
                warn!(
                    attempt,
                    attempts,
                    status = err.status_code(),
                    "Card initialization failed: {}",
                    err
                );
                last = err;
                if attempt < attempts && !retry_delay.is_zero() {
                    std::thread::sleep(retry_delay);
                }
            }
        }
    }
    Err(RecorderError::CardNotInitialized { attempts, last })
}

/// What a recording session has done so far
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordingSummary {
    pub start_block: u32,
    pub blocks_written: u64,
    /// Whether the card took the pre-erase hint
    pub pre_erase_applied: bool,
    pub ring: RingStats,
}

/// Drains the sample ring into an open multi-block write session.
///
/// Owns the card and the consumer half of the ring; the producer half goes
/// to the sampling interrupt.
pub struct Recorder<L, M> {
    card: SdCard<L>,
    consumer: RingConsumer<M>,
    start_block: u32,
    blocks_written: u64,
    max_blocks: Option<u64>,
    pre_erase_applied: bool,
}

impl<L, M> Recorder<L, M>
where
    L: SpiLink,
    M: AddressableMemory,
{
    /// Bring the card up and open the recording session.
    ///
    /// The pre-erase hint goes out before the ring is built, so recording
    /// always starts from fresh cursors.
    pub fn start(
        mut card: SdCard<L>,
        memory: M,
        config: &RecorderConfig,
    ) -> Result<(Self, RingProducer<M>), RecorderError> {
        bring_up_card(
            &mut card,
            config.init_attempts,
            Duration::from_millis(config.init_retry_delay_ms),
        )?;

        // Pre-erase only costs throughput when it fails.
        let pre_erase = card.pre_erase_blocks(config.pre_erase_blocks);
        if let PreErase::NotApplied(err) = &pre_erase {
            warn!(
                blocks = config.pre_erase_blocks,
                status = err.status_code(),
                "Recording without pre-erase: {}",
                err
            );
        }

        let (producer, consumer) = RingBuffer::new(memory)?.split();
        card.begin_write_session(config.start_block)?;

        info!(
            start_block = config.start_block,
            capacity = consumer.stats().capacity,
            "Recording started"
        );

        Ok((
            Self {
                card,
                consumer,
                start_block: config.start_block,
                blocks_written: 0,
                max_blocks: config.max_blocks,
                pre_erase_applied: pre_erase.is_applied(),
            },
            producer,
        ))
    }

    /// Write one block if a full one is pending. Returns whether it did.
    pub fn poll_once(&mut self) -> Result<bool, RecorderError> {
        if self.consumer.has_overflowed() {
            return Err(RecorderError::BufferOverflow {
                head: self.consumer.stats().head,
            });
        }

        let card = &mut self.card;
        match self.consumer.consume_block(|reader| card.write_segment(reader)) {
            None => Ok(false),
            Some(Ok(block)) => {
                self.blocks_written += 1;
                debug!(block, pending = self.consumer.pending(), "Block written");
                Ok(true)
            }
            Some(Err(err)) => Err(err.into()),
        }
    }

    /// Whether the configured block budget is used up
    pub fn budget_exhausted(&self) -> bool {
        self.max_blocks.is_some_and(|max| self.blocks_written >= max)
    }

    /// Drain until `stop` is raised or the block budget runs out
    pub fn run(&mut self, stop: &AtomicBool) -> Result<(), RecorderError> {
        while !self.budget_exhausted() {
            if self.poll_once()? {
                continue;
            }
            if stop.load(Ordering::Acquire) {
                break;
            }
            std::thread::yield_now();
        }
        Ok(())
    }

    pub fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            start_block: self.start_block,
            blocks_written: self.blocks_written,
            pre_erase_applied: self.pre_erase_applied,
            ring: self.consumer.stats(),
        }
    }

    pub fn card(&self) -> &SdCard<L> {
        &self.card
    }

    /// Close the write session and hand the card back
    pub fn finish(mut self) -> Result<(RecordingSummary, SdCard<L>), RecorderError> {
        self.card.end_write_session()?;
        let summary = self.summary();
        info!(
            blocks = summary.blocks_written,
            produced = summary.ring.total_produced,
            "Recording finished"
        );
        Ok((summary, self.card))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diagnostics::FatalCondition;
    use ring_buffer::InternalMemory;
    use sd_protocol::sim::{SimBehavior, SimulatedCard};
    use sd_protocol::{CardTimeouts, InitStep, BLOCK_SIZE};

    fn test_config() -> RecorderConfig {
        RecorderConfig {
            init_retry_delay_ms: 0,
            ..Default::default()
        }
    }

    fn card(behavior: SimBehavior) -> SdCard<SimulatedCard> {
        let timeouts = CardTimeouts {
            go_idle_attempts: 5,
            ..Default::default()
        };
        SdCard::new(SimulatedCard::new(behavior), timeouts)
    }

    type Started = (Recorder<SimulatedCard, InternalMemory>, RingProducer<InternalMemory>);

    fn start(behavior: SimBehavior, capacity: usize) -> Started {
        Recorder::start(card(behavior), InternalMemory::new(capacity), &test_config()).unwrap()
    }

    #[test]
    fn test_start_opens_session_after_pre_erase() {
        let (recorder, _producer) = start(SimBehavior::default(), 4096);
        let stats = recorder.card().link().stats();
        assert_eq!(stats.pre_erase, Some(8));
        assert!(recorder.summary().pre_erase_applied);
        assert!(!recorder.card().is_ready(), "session should be open");
    }

    #[test]
    fn test_refused_pre_erase_is_reported_and_recording_continues() {
        let behavior = SimBehavior {
            reject_pre_erase: true,
            ..Default::default()
        };
        let timeouts = CardTimeouts {
            pre_erase_attempts: 3,
            ..Default::default()
        };
        let card = SdCard::new(SimulatedCard::new(behavior), timeouts);
        let (mut recorder, mut producer) =
            Recorder::start(card, InternalMemory::new(4096), &test_config()).unwrap();

        assert!(!recorder.summary().pre_erase_applied);
        for _ in 0..BLOCK_SIZE {
            producer.produce(0xA5).unwrap();
        }
        assert!(recorder.poll_once().unwrap());

        let (summary, card) = recorder.finish().unwrap();
        assert!(!summary.pre_erase_applied);
        assert_eq!(summary.blocks_written, 1);
        assert_eq!(card.link().stats().pre_erase, None);
    }

    #[test]
    fn test_init_failure_is_card_not_initialized() {
        let behavior = SimBehavior {
            unresponsive: true,
            ..Default::default()
        };
        let err = Recorder::start(card(behavior), InternalMemory::new(4096), &test_config())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            RecorderError::CardNotInitialized {
                attempts: 3,
                last: CardError::InitTimeout {
                    step: InitStep::GoIdle,
                },
            }
        ));
        assert_eq!(err.fatal_condition(), FatalCondition::CardNotInitialized);
    }

    #[test]
    fn test_retry_recovers_flaky_card() {
        // Twelve ignored CMD0 frames use up the first two attempts.
        let behavior = SimBehavior {
            ignored_go_idle: 12,
            ..Default::default()
        };
        let mut card = card(behavior);
        assert!(bring_up_card(&mut card, 3, Duration::ZERO).is_ok());
    }

    #[test]
    fn test_bad_capacity_is_buffer_pointer() {
        let memory = InternalMemory::new(3000);
        let err = Recorder::start(card(SimBehavior::default()), memory, &test_config())
            .err()
            .unwrap();
        assert_eq!(err.fatal_condition(), FatalCondition::BufferPointer);
    }

    #[test]
    fn test_poll_writes_each_full_block() {
        let (mut recorder, mut producer) = start(SimBehavior::default(), 4096);

        for i in 0..(BLOCK_SIZE * 2 + 10) {
            producer.produce(i as u8).unwrap();
        }
        assert!(recorder.poll_once().unwrap());
        assert!(recorder.poll_once().unwrap());
        assert!(!recorder.poll_once().unwrap());

        let (summary, card) = recorder.finish().unwrap();
        assert_eq!(summary.blocks_written, 2);
        assert_eq!(summary.ring.pending, 10);
        assert_eq!(card.link().block(1).map(|b| b[0]), Some(0));
        assert!(card.is_ready());
    }

    #[test]
    fn test_overflow_is_fatal() {
        let (mut recorder, mut producer) = start(SimBehavior::default(), 1024);
        let errors = (0..1024).filter(|i| producer.produce(*i as u8).is_err()).count();
        assert_eq!(errors, 1);

        let err = recorder.poll_once().unwrap_err();
        assert_eq!(err.fatal_condition(), FatalCondition::BufferOverflow);
    }

    #[test]
    fn test_run_honours_block_budget() {
        let config = RecorderConfig {
            max_blocks: Some(1),
            ..test_config()
        };
        let memory = InternalMemory::new(4096);
        let (mut recorder, mut producer) =
            Recorder::start(card(SimBehavior::default()), memory, &config).unwrap();
        for _ in 0..BLOCK_SIZE * 3 {
            producer.produce(0x55).unwrap();
        }
        recorder.run(&AtomicBool::new(false)).unwrap();
        assert_eq!(recorder.summary().blocks_written, 1);
    }
}
