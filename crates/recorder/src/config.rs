//! Recorder configuration

use std::path::Path;

use config::{Config, Environment, File};
use diagnostics::BlinkTiming;
use ring_buffer::MAX_ADDRESS_BITS;
use sd_protocol::CardTimeouts;
use serde::{Deserialize, Serialize};

use crate::error::RecorderError;

/// Environment variable prefix, e.g. `DATALOGGER__PRE_ERASE_BLOCKS=16`
pub const ENV_PREFIX: &str = "DATALOGGER";

/// Backing store for the sample ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    /// External parallel SRAM
    Sram,
    /// On-chip RAM
    Internal,
}

/// Recorder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Full card initializations before giving up
    pub init_attempts: u32,
    /// Pause between initialization attempts
    pub init_retry_delay_ms: u64,
    /// Blocks announced with the pre-erase hint
    pub pre_erase_blocks: u32,
    /// Card block the recording starts at
    pub start_block: u32,
    /// Ring capacity in bytes (power of two)
    pub buffer_capacity: usize,
    pub memory: MemoryKind,
    /// Sampling timer period in microseconds
    pub sample_period_us: u64,
    /// Stop after this many blocks (host runs only)
    pub max_blocks: Option<u64>,
    /// Pulse the simulated sync line at this period (host runs only)
    pub sync_period_ms: Option<u64>,
    pub log_level: String,
    pub timeouts: CardTimeouts,
    pub blink: BlinkTiming,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            init_attempts: 3,
            init_retry_delay_ms: 100,
            pre_erase_blocks: 8,
            start_block: 0,
            buffer_capacity: 1 << 19,
            memory: MemoryKind::Sram,
            sample_period_us: 20,
            max_blocks: None,
            sync_period_ms: None,
            log_level: "info".to_string(),
            timeouts: CardTimeouts::default(),
            blink: BlinkTiming::default(),
        }
    }
}

impl RecorderConfig {
    /// Layer an optional file and `DATALOGGER__*` variables over the
    /// defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, RecorderError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: RecorderConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the recorder cannot run with
    pub fn validate(&self) -> Result<(), RecorderError> {
        if self.init_attempts == 0 {
            return Err(RecorderError::Config("init_attempts must be at least 1".into()));
        }
        if self.sample_period_us == 0 {
            return Err(RecorderError::Config("sample_period_us must be non-zero".into()));
        }
        ring_buffer::check_capacity(self.buffer_capacity)?;
        if self.memory == MemoryKind::Sram && self.address_bits() > MAX_ADDRESS_BITS {
            return Err(RecorderError::Config(format!(
                "buffer_capacity {} needs more than {} SRAM address lines",
                self.buffer_capacity, MAX_ADDRESS_BITS
            )));
        }
        Ok(())
    }

    /// Address lines covering the ring. Exact once [`validate`](Self::validate)
    /// has accepted the capacity.
    pub fn address_bits(&self) -> u32 {
        self.buffer_capacity.trailing_zeros()
    }
}
