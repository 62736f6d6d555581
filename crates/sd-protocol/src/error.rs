//! Card Protocol Error Types

use crate::command::DataResponse;
use std::fmt;
use thiserror::Error;

/// Link-level faults reported by a [`SpiLink`](crate::SpiLink)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The SPI peripheral reported an error
    #[error("SPI bus error: {0}")]
    Bus(String),

    /// The chip-select line could not be driven
    #[error("Chip-select pin error: {0}")]
    Pin(String),
}

/// Steps of the initialization handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitStep {
    /// CMD0 software reset
    GoIdle,
    /// CMD8 interface condition probe
    InterfaceCondition,
    /// CMD58 OCR probe before application init
    ReadOcr,
    /// CMD55 escape preceding ACMD41
    AppCommand,
    /// ACMD41 application init
    AppInit,
    /// CMD58 OCR probe after the clock step-up
    ConfirmOcr,
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitStep::GoIdle => "CMD0",
            InitStep::InterfaceCondition => "CMD8",
            InitStep::ReadOcr => "CMD58",
            InitStep::AppCommand => "CMD55",
            InitStep::AppInit => "ACMD41",
            InitStep::ConfirmOcr => "CMD58 (post-init)",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while talking to the card
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    /// An initialization step exhausted its attempt ceiling
    #[error("{step} timed out during initialization")]
    InitTimeout { step: InitStep },

    /// The card never released the bus before an initialization step
    #[error("card not ready before {step}")]
    InitNotReady { step: InitStep },

    /// Operation requires a successfully initialized card
    #[error("card is not initialized")]
    NotInitialized,

    /// A multi-block write session is already open
    #[error("a write session is already open")]
    SessionAlreadyOpen,

    /// Segment or end requested with no open session
    #[error("no write session is open")]
    NoOpenSession,

    /// The card never released the bus before a command
    #[error("card not ready before CMD{command}")]
    NotReady { command: u8 },

    /// No R1 response arrived within the poll ceiling
    #[error("no response to CMD{command}")]
    ResponseTimeout { command: u8 },

    /// The card answered with a non-zero R1
    #[error("CMD{command} rejected with R1 {response:#04x}")]
    CommandRejected { command: u8, response: u8 },

    /// No start-block token after a read command
    #[error("timed out waiting for start-block token")]
    StartTokenTimeout,

    /// No data-response token after a block payload
    #[error("timed out waiting for data-response token")]
    DataResponseTimeout,

    /// The card refused a block payload
    #[error("block rejected by card: {0:?}")]
    DataRejected(DataResponse),

    /// The card held the line busy past the busy-poll ceiling
    #[error("card stayed busy past the poll ceiling")]
    BusyTimeout,

    /// The pre-erase exchange exhausted its attempt ceiling
    #[error("pre-erase hint timed out")]
    PreEraseTimeout,

    /// Link fault
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CardError {
    /// Numeric status of the failure point.
    ///
    /// Initialization failures keep the classic 1..=11 numbering so the
    /// first and later timeouts stay distinguishable; every other failure
    /// point has its own code above that range.
    pub fn status_code(&self) -> u8 {
        match self {
            CardError::InitTimeout { step } => match step {
                InitStep::GoIdle => 1,
                InitStep::InterfaceCondition => 3,
                InitStep::ReadOcr => 5,
                InitStep::AppCommand | InitStep::AppInit => 7,
                InitStep::ConfirmOcr => 10,
            },
            CardError::InitNotReady { step } => match step {
                InitStep::GoIdle => 2,
                InitStep::InterfaceCondition => 4,
                InitStep::ReadOcr => 6,
                InitStep::AppCommand => 8,
                InitStep::AppInit => 9,
                InitStep::ConfirmOcr => 11,
            },
            CardError::NotInitialized => 12,
            CardError::SessionAlreadyOpen => 13,
            CardError::NoOpenSession => 14,
            CardError::NotReady { .. } => 15,
            CardError::ResponseTimeout { .. } => 16,
            CardError::CommandRejected { .. } => 17,
            CardError::StartTokenTimeout => 18,
            CardError::DataResponseTimeout => 19,
            CardError::DataRejected(DataResponse::CrcError) => 20,
            CardError::DataRejected(DataResponse::WriteError) => 21,
            CardError::DataRejected(DataResponse::Accepted) => 22,
            CardError::BusyTimeout => 23,
            CardError::PreEraseTimeout => 24,
            CardError::Transport(_) => 25,
        }
    }

    /// Whether the error came out of the initialization handshake
    pub fn is_init_failure(&self) -> bool {
        matches!(
            self,
            CardError::InitTimeout { .. } | CardError::InitNotReady { .. }
        )
    }
}
