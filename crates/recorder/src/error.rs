//! Recorder error types

use diagnostics::FatalCondition;
use ring_buffer::RingError;
use sd_protocol::CardError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("SD card failed to initialize after {attempts} attempts")]
    CardNotInitialized {
        attempts: u32,
        #[source]
        last: CardError,
    },

    #[error("Sample ring overflowed at head {head}")]
    BufferOverflow { head: usize },

    #[error("Sample ring misconfigured: {0}")]
    Buffer(RingError),

    #[error("Card error: {0}")]
    Card(#[from] CardError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Task failed: {0}")]
    Task(String),
}

impl RecorderError {
    /// Diagnostic code this error halts with
    pub fn fatal_condition(&self) -> FatalCondition {
        match self {
            RecorderError::CardNotInitialized { .. } => FatalCondition::CardNotInitialized,
            RecorderError::BufferOverflow { .. } => FatalCondition::BufferOverflow,
            RecorderError::Buffer(_) => FatalCondition::BufferPointer,
            RecorderError::Card(_)
            | RecorderError::Config(_)
            | RecorderError::Logging(_)
            | RecorderError::Task(_) => FatalCondition::Generic,
        }
    }
}

impl From<RingError> for RecorderError {
    fn from(err: RingError) -> Self {
        match err {
            RingError::Overflow { head, .. } => RecorderError::BufferOverflow { head },
            other => RecorderError::Buffer(other),
        }
    }
}

impl From<config::ConfigError> for RecorderError {
    fn from(err: config::ConfigError) -> Self {
        RecorderError::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for RecorderError {
    fn from(err: tokio::task::JoinError) -> Self {
        RecorderError::Task(err.to_string())
    }
}
