//! Data Logger - Host Simulation Entry Point
//!
//! Runs the recorder against a simulated card and SRAM. Usage:
//! `datalogger [config.toml]`, with `DATALOGGER__*` overrides.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use diagnostics::halt;
use recorder::{
    init_logging, run_session, MemoryKind, RecorderConfig, RecorderError, TracingIndicators,
};
use ring_buffer::{AddressableMemory, BusState, InternalMemory, SimulatedSramBus, Sram};
use sampler::{RampSource, SharedSyncLine};
use sd_protocol::sim::SimulatedCard;
use sd_protocol::SdCard;
use tracing::{error, info, warn};

/// Ring storage selected by configuration
enum HostMemory {
    Sram(Sram<SimulatedSramBus>),
    Internal(InternalMemory),
}

impl HostMemory {
    fn from_config(config: &RecorderConfig) -> Self {
        match config.memory {
            MemoryKind::Sram => {
                let bits = config.address_bits();
                HostMemory::Sram(Sram::new(SimulatedSramBus::new(bits), bits))
            }
            MemoryKind::Internal => {
                HostMemory::Internal(InternalMemory::new(config.buffer_capacity))
            }
        }
    }

    fn inner(&self) -> &dyn AddressableMemory {
        match self {
            HostMemory::Sram(sram) => sram,
            HostMemory::Internal(memory) => memory,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn AddressableMemory {
        match self {
            HostMemory::Sram(sram) => sram,
            HostMemory::Internal(memory) => memory,
        }
    }
}

impl AddressableMemory for HostMemory {
    fn capacity(&self) -> usize {
        self.inner().capacity()
    }

    fn bus_state(&self) -> BusState {
        self.inner().bus_state()
    }

    fn restore_bus(&mut self, state: BusState) {
        self.inner_mut().restore_bus(state)
    }

    fn set_address(&mut self, address: usize) {
        self.inner_mut().set_address(address)
    }

    fn read(&mut self) -> u8 {
        self.inner_mut().read()
    }

    fn write(&mut self, value: u8) {
        self.inner_mut().write(value)
    }
}

fn fatal(err: &RecorderError, config: &RecorderConfig) -> ! {
    error!("Fatal: {}", err);
    halt(&mut TracingIndicators::default(), err.fatal_condition(), config.blink)
}

/// Pulse the simulated sync request every `period`
fn spawn_sync_pulses(
    line: SharedSyncLine,
    period: Duration,
    hold: Duration,
    stop: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        while !stop.load(Ordering::Acquire) {
            tokio::time::sleep(period).await;
            line.request(true);
            tokio::time::sleep(hold).await;
            line.request(false);
        }
    });
}

#[tokio::main]
async fn main() {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let loaded = RecorderConfig::load(path.as_deref());
    let level = loaded
        .as_ref()
        .map(|config| config.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    if let Err(err) = init_logging(&level) {
        eprintln!("{}", err);
    }

    let config = match loaded {
        Ok(config) => config,
        Err(err) => fatal(&err, &RecorderConfig::default()),
    };

    info!("=== Data Logger v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        capacity = config.buffer_capacity,
        memory = ?config.memory,
        period_us = config.sample_period_us,
        "Starting recorder"
    );

    let stop = Arc::new(AtomicBool::new(false));
    let ctrl_c_stop = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, closing session");
            ctrl_c_stop.store(true, Ordering::Release);
        }
    });

    let sync = SharedSyncLine::new();
    if let Some(period_ms) = config.sync_period_ms {
        let hold = Duration::from_micros(config.sample_period_us * 3);
        spawn_sync_pulses(sync.clone(), Duration::from_millis(period_ms), hold, Arc::clone(&stop));
    }

    let card = SdCard::new(SimulatedCard::default(), config.timeouts);
    let memory = HostMemory::from_config(&config);
    let source = RampSource::new(0, 37);

    match run_session(card, memory, source, sync, &config, stop).await {
        Ok((summary, card)) => {
            info!(
                blocks = summary.blocks_written,
                produced = summary.ring.total_produced,
                stored = card.link().stored_blocks(),
                "Recorder stopped"
            );
        }
        Err(err) => fatal(&err, &config),
    }
}
