//! [`SpiLink`] over `embedded-hal` 1.0 peripherals

use embedded_hal::digital::{Error as _, OutputPin};
use embedded_hal::spi::{Error as _, SpiBus};
use tracing::trace;

use crate::error::TransportError;
use crate::transport::{BusClock, SpiLink};

/// Serial clock control. Bus implementations differ on how the divider
/// is set, so the board supplies it.
pub trait ClockControl {
    /// Apply the given clock to the bus peripheral
    fn apply(&mut self, clock: BusClock) -> Result<(), TransportError>;
}

impl<F> ClockControl for F
where
    F: FnMut(BusClock) -> Result<(), TransportError>,
{
    fn apply(&mut self, clock: BusClock) -> Result<(), TransportError> {
        self(clock)
    }
}

/// Fixed-rate bus: clock requests are accepted and ignored
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedClock;

impl ClockControl for FixedClock {
    fn apply(&mut self, clock: BusClock) -> Result<(), TransportError> {
        trace!(?clock, "Clock change ignored on fixed-rate bus");
        Ok(())
    }
}

/// SPI bus plus a dedicated chip-select pin (active low)
pub struct HalLink<SPI, CS, C = FixedClock> {
    spi: SPI,
    cs: CS,
    clock: C,
}

impl<SPI, CS> HalLink<SPI, CS, FixedClock>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
{
    /// Link on a bus whose clock cannot be changed
    pub fn new(spi: SPI, cs: CS) -> Self {
        Self::with_clock(spi, cs, FixedClock)
    }
}

impl<SPI, CS, C> HalLink<SPI, CS, C>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    C: ClockControl,
{
    /// Link with a board-specific clock control
    pub fn with_clock(spi: SPI, cs: CS, clock: C) -> Self {
        Self { spi, cs, clock }
    }

    /// Release the peripherals
    pub fn release(self) -> (SPI, CS, C) {
        (self.spi, self.cs, self.clock)
    }
}

impl<SPI, CS, C> SpiLink for HalLink<SPI, CS, C>
where
    SPI: SpiBus<u8>,
    CS: OutputPin,
    C: ClockControl,
{
    fn exchange(&mut self, byte: u8) -> Result<u8, TransportError> {
        let mut buf = [byte];
        self.spi
            .transfer_in_place(&mut buf)
            .map_err(|e| TransportError::Bus(format!("{:?}", e.kind())))?;
        Ok(buf[0])
    }

    fn set_chip_select(&mut self, selected: bool) -> Result<(), TransportError> {
        // Chip-select must not move while a byte is still shifting.
        self.spi
            .flush()
            .map_err(|e| TransportError::Bus(format!("{:?}", e.kind())))?;
        let result = if selected {
            self.cs.set_low()
        } else {
            self.cs.set_high()
        };
        result.map_err(|e| TransportError::Pin(format!("{:?}", e.kind())))
    }

    fn set_clock(&mut self, clock: BusClock) -> Result<(), TransportError> {
        self.spi
            .flush()
            .map_err(|e| TransportError::Bus(format!("{:?}", e.kind())))?;
        self.clock.apply(clock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::digital::{self, ErrorType as PinErrorType};
    use embedded_hal::spi::{self, ErrorType as SpiErrorType};
    use std::collections::VecDeque;
    use std::convert::Infallible;

    #[derive(Debug)]
    struct Overrun;

    impl spi::Error for Overrun {
        fn kind(&self) -> spi::ErrorKind {
            spi::ErrorKind::Overrun
        }
    }

    #[derive(Default)]
    struct FakeBus {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
        flushes: usize,
        fail: bool,
    }

    impl SpiErrorType for FakeBus {
        type Error = Overrun;
    }

    impl SpiBus<u8> for FakeBus {
        fn read(&mut self, words: &mut [u8]) -> Result<(), Overrun> {
            for word in words.iter_mut() {
                *word = self.inbound.pop_front().unwrap_or(0xFF);
            }
            Ok(())
        }

        fn write(&mut self, words: &[u8]) -> Result<(), Overrun> {
            self.outbound.extend_from_slice(words);
            Ok(())
        }

        fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Overrun> {
            self.write(write)?;
            self.read(read)
        }

        fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Overrun> {
            if self.fail {
                return Err(Overrun);
            }
            for word in words.iter_mut() {
                self.outbound.push(*word);
                *word = self.inbound.pop_front().unwrap_or(0xFF);
            }
            Ok(())
        }

        fn flush(&mut self) -> Result<(), Overrun> {
            self.flushes += 1;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakePin {
        levels: Vec<bool>,
    }

    impl PinErrorType for FakePin {
        type Error = Infallible;
    }

    impl digital::OutputPin for FakePin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.levels.push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.levels.push(true);
            Ok(())
        }
    }

    #[test]
    fn test_exchange_is_full_duplex() {
        let bus = FakeBus {
            inbound: VecDeque::from(vec![0x01, 0xFE]),
            ..Default::default()
        };
        let mut link = HalLink::new(bus, FakePin::default());
        assert_eq!(link.exchange(0x40).unwrap(), 0x01);
        assert_eq!(link.exchange(0xFF).unwrap(), 0xFE);
        let (bus, _, _) = link.release();
        assert_eq!(bus.outbound, vec![0x40, 0xFF]);
    }

    #[test]
    fn test_chip_select_is_active_low_and_flushes() {
        let mut link = HalLink::new(FakeBus::default(), FakePin::default());
        link.set_chip_select(true).unwrap();
        link.set_chip_select(false).unwrap();
        let (bus, pin, _) = link.release();
        assert_eq!(pin.levels, vec![false, true]);
        assert_eq!(bus.flushes, 2);
    }

    #[test]
    fn test_clock_hook_receives_changes() {
        let mut seen = Vec::new();
        {
            let hook = |clock: BusClock| -> Result<(), TransportError> {
                seen.push(clock);
                Ok(())
            };
            let mut link = HalLink::with_clock(FakeBus::default(), FakePin::default(), hook);
            link.set_clock(BusClock::HighSpeed).unwrap();
        }
        assert_eq!(seen, vec![BusClock::HighSpeed]);
    }

    #[test]
    fn test_bus_error_maps_to_transport_error() {
        let bus = FakeBus {
            fail: true,
            ..Default::default()
        };
        let mut link = HalLink::new(bus, FakePin::default());
        assert_eq!(
            link.exchange(0x00),
            Err(TransportError::Bus("Overrun".to_string()))
        );
    }
}
