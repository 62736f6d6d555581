//! Byte Transport over a full-duplex serial link

use crate::error::TransportError;
use crate::token;
use serde::{Deserialize, Serialize};

/// Serial clock setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusClock {
    /// Identification rate (at most 400 kHz) used until the card leaves idle
    Initialization,
    /// Maximum supported rate
    HighSpeed,
}

/// One full-duplex byte exchange per clock burst, plus the card's
/// chip-select line and the clock divider.
pub trait SpiLink {
    /// Clock `byte` out and return the byte clocked in at the same time
    fn exchange(&mut self, byte: u8) -> Result<u8, TransportError>;

    /// Drive chip-select; `true` selects the card (line low)
    fn set_chip_select(&mut self, selected: bool) -> Result<(), TransportError>;

    /// Reconfigure the serial clock
    fn set_clock(&mut self, clock: BusClock) -> Result<(), TransportError>;
}

/// Byte transport with a one-byte receive buffer.
///
/// A write leaves the byte clocked in during that write in the receive
/// buffer; the next read returns it without issuing a new clock. Reads
/// with an empty buffer clock out [`token::IDLE`].
#[derive(Debug)]
pub struct ByteTransport<L> {
    link: L,
    received: Option<u8>,
    selected: bool,
    clock: BusClock,
}

impl<L: SpiLink> ByteTransport<L> {
    /// Wrap a link. Chip-select state starts deselected.
    pub fn new(link: L) -> Self {
        Self {
            link,
            received: None,
            selected: false,
            clock: BusClock::Initialization,
        }
    }

    /// Clock out a byte
    pub fn write_byte(&mut self, byte: u8) -> Result<(), TransportError> {
        // Stale receive data is dropped before the next transmit.
        self.received = None;
        let inbound = self.link.exchange(byte)?;
        self.received = Some(inbound);
        Ok(())
    }

    /// Read a byte, returning the buffered one if present
    pub fn read_byte(&mut self) -> Result<u8, TransportError> {
        if let Some(byte) = self.received.take() {
            return Ok(byte);
        }
        self.link.exchange(token::IDLE)
    }

    /// Clock out `count` idle bytes
    pub fn idle_clocks(&mut self, count: usize) -> Result<(), TransportError> {
        for _ in 0..count {
            self.write_byte(token::IDLE)?;
        }
        Ok(())
    }

    /// Drive chip-select
    pub fn select(&mut self, selected: bool) -> Result<(), TransportError> {
        self.link.set_chip_select(selected)?;
        self.selected = selected;
        Ok(())
    }

    /// Current chip-select state
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Reconfigure the serial clock
    pub fn set_clock(&mut self, clock: BusClock) -> Result<(), TransportError> {
        self.link.set_clock(clock)?;
        self.clock = clock;
        Ok(())
    }

    /// Current serial clock
    pub fn clock(&self) -> BusClock {
        self.clock
    }

    /// Borrow the underlying link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Mutably borrow the underlying link
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Unwrap the underlying link
    pub fn into_link(self) -> L {
        self.link
    }
}
