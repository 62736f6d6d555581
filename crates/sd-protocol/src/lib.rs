//! SD Card Protocol Engine
//!
//! Drives an SDHC card in SPI mode over a byte-wide full-duplex link:
//! power-up and initialization handshake, single-block reads and writes,
//! multi-block write sessions and the pre-erase hint. Every wait is a
//! bounded poll with its own failure status.

mod block;
mod card;
mod command;
mod error;
mod timeouts;
mod transport;

pub mod hal;
pub mod sim;

pub use block::{Block, BlockSource, BLOCK_SIZE};
pub use card::{CardInfo, PreErase, SdCard, SessionState};
pub use command::{apply_framing, CardCommand, DataResponse, CHECK_PATTERN, HCS_BIT, OCR_CCS, R1};
pub use error::{CardError, InitStep, TransportError};
pub use timeouts::CardTimeouts;
pub use transport::{BusClock, ByteTransport, SpiLink};

/// Wire-level constants
pub mod token {
    /// Value the bus idles at (MISO pulled high, filler for reads)
    pub const IDLE: u8 = 0xFF;
    /// Start token for a single-block read or write
    pub const START_BLOCK: u8 = 0xFE;
    /// Start token for each segment of a multi-block write
    pub const START_MULTI_BLOCK: u8 = 0xFC;
    /// Stop token ending a multi-block write
    pub const STOP_MULTI_BLOCK: u8 = 0xFD;
    /// Mask selecting the status bits of a data-response token
    pub const DATA_RESPONSE_MASK: u8 = 0x1F;
}

/// Command indices used by the engine
pub mod cmd {
    /// GO_IDLE_STATE - software reset
    pub const GO_IDLE_STATE: u8 = 0;
    /// SEND_IF_COND - voltage range probe with echo pattern
    pub const SEND_IF_COND: u8 = 8;
    /// READ_SINGLE_BLOCK
    pub const READ_SINGLE_BLOCK: u8 = 17;
    /// WRITE_BLOCK
    pub const WRITE_BLOCK: u8 = 24;
    /// WRITE_MULTIPLE_BLOCK
    pub const WRITE_MULTIPLE_BLOCK: u8 = 25;
    /// APP_CMD - next command is application specific
    pub const APP_CMD: u8 = 55;
    /// READ_OCR
    pub const READ_OCR: u8 = 58;
    /// ACMD23 SET_WR_BLK_ERASE_COUNT - pre-erase hint
    pub const SET_WR_BLK_ERASE_COUNT: u8 = 23;
    /// ACMD41 SD_SEND_OP_COND - start application initialization
    pub const SD_SEND_OP_COND: u8 = 41;
}
