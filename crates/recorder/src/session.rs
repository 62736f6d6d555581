//! Host-side recording session on the tokio runtime
//!
//! An interval task plays the sampling timer interrupt; the foreground
//! drain loop runs on a blocking thread, as it busy-waits on the card.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ring_buffer::{AddressableMemory, RingError};
use sampler::{ConversionSource, SampleLatch, SampleProducer, SyncSignal};
use sd_protocol::{SdCard, SpiLink};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::recorder::{Recorder, RecordingSummary};

/// Record until `stop` is raised, the block budget runs out, or a fatal
/// condition occurs.
pub async fn run_session<L, M, C, S>(
    card: SdCard<L>,
    memory: M,
    source: C,
    sync: S,
    config: &RecorderConfig,
    stop: Arc<AtomicBool>,
) -> Result<(RecordingSummary, SdCard<L>), RecorderError>
where
    L: SpiLink + Send + 'static,
    M: AddressableMemory + Send + 'static,
    C: ConversionSource + Send + 'static,
    S: SyncSignal + Send + 'static,
{
    let start_config = config.clone();
    let (mut recorder, ring) =
        tokio::task::spawn_blocking(move || Recorder::start(card, memory, &start_config)).await??;

    let mut producer = SampleProducer::new(ring, Arc::new(SampleLatch::new()), source, sync);
    let period = Duration::from_micros(config.sample_period_us);
    let timer_stop = Arc::clone(&stop);
    let timer = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        while !timer_stop.load(Ordering::Acquire) {
            interval.tick().await;
            producer.on_timer_tick()?;
        }
        Ok::<u64, RingError>(producer.ticks())
    });

    let writer_stop = Arc::clone(&stop);
    let writer = tokio::task::spawn_blocking(move || {
        let drained = recorder.run(&writer_stop);
        // Sampling stops with the writer, whatever the outcome.
        writer_stop.store(true, Ordering::Release);
        drained.and_then(|()| recorder.finish())
    });

    let written = writer.await?;
    stop.store(true, Ordering::Release);

    match (timer.await?, written) {
        (_, Err(err)) => Err(err),
        (Ok(ticks), Ok(written)) => {
            info!(ticks, blocks = written.0.blocks_written, "Session complete");
            Ok(written)
        }
        (Err(err), Ok(written)) => {
            // The drain had already closed the session cleanly.
            warn!("Sampling overran after the session closed: {}", err);
            Ok(written)
        }
    }
}
