//! Parallel SRAM driver
//!
//! Drives an asynchronous SRAM (active-low chip-enable and write-enable,
//! 8-bit data port, up to 19 address lines) through a board-supplied
//! [`SramBus`].

use crate::memory::{AddressableMemory, BusState};

/// Widest address bus the driver drives
pub const MAX_ADDRESS_BITS: u32 = 24;

/// Bytes reachable through `address_bits` lines; zero past
/// [`MAX_ADDRESS_BITS`]
pub fn address_span(address_bits: u32) -> usize {
    if address_bits > MAX_ADDRESS_BITS {
        0
    } else {
        1usize << address_bits
    }
}

/// Direction of the shared data port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    Input,
    Output,
}

/// Pin-level access to an SRAM chip
pub trait SramBus {
    /// Drive the address lines
    fn drive_address(&mut self, address: u32);
    /// Read the address lines back
    fn address(&self) -> u32;
    fn set_data_direction(&mut self, direction: DataDirection);
    fn write_data(&mut self, value: u8);
    fn read_data(&mut self) -> u8;
    /// `true` asserts chip-enable (line low)
    fn set_chip_enable(&mut self, asserted: bool);
    /// `true` asserts write-enable (line low)
    fn set_write_enable(&mut self, asserted: bool);
}

/// [`AddressableMemory`] over an [`SramBus`]
#[derive(Debug)]
pub struct Sram<B> {
    bus: B,
    address_bits: u32,
    chip_enabled: bool,
}

impl<B: SramBus> Sram<B> {
    /// Driver for a chip with `address_bits` address lines
    pub fn new(bus: B, address_bits: u32) -> Self {
        Self {
            bus,
            address_bits,
            chip_enabled: false,
        }
    }

    fn address_mask(&self) -> u32 {
        if self.address_bits >= 32 {
            u32::MAX
        } else {
            (1u32 << self.address_bits) - 1
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn into_bus(self) -> B {
        self.bus
    }
}

impl<B: SramBus> AddressableMemory for Sram<B> {
    fn capacity(&self) -> usize {
        address_span(self.address_bits)
    }

    fn bus_state(&self) -> BusState {
        BusState {
            address: self.bus.address() as usize,
            chip_enabled: self.chip_enabled,
        }
    }

    fn restore_bus(&mut self, state: BusState) {
        self.set_address(state.address);
        self.bus.set_chip_enable(state.chip_enabled);
        self.chip_enabled = state.chip_enabled;
    }

    fn set_address(&mut self, address: usize) {
        let masked = (address as u32) & self.address_mask();
        self.bus.drive_address(masked);
    }

    fn read(&mut self) -> u8 {
        self.bus.set_data_direction(DataDirection::Input);
        self.bus.set_chip_enable(true);
        let value = self.bus.read_data();
        self.bus.set_chip_enable(false);
        self.chip_enabled = false;
        value
    }

    fn write(&mut self, value: u8) {
        self.bus.set_data_direction(DataDirection::Output);
        self.bus.write_data(value);
        self.bus.set_write_enable(true);
        self.bus.set_chip_enable(true);
        self.bus.set_chip_enable(false);
        self.bus.set_write_enable(false);
        self.chip_enabled = false;
    }
}

/// SRAM chip model: a write commits when chip-enable releases while
/// write-enable is still asserted.
#[derive(Debug, Clone)]
pub struct SimulatedSramBus {
    cells: Vec<u8>,
    address: u32,
    direction: DataDirection,
    data_out: u8,
    chip_enable: bool,
    write_enable: bool,
    commits: usize,
}

impl SimulatedSramBus {
    pub fn new(address_bits: u32) -> Self {
        Self {
            cells: vec![0u8; address_span(address_bits)],
            address: 0,
            direction: DataDirection::Input,
            data_out: 0,
            chip_enable: false,
            write_enable: false,
            commits: 0,
        }
    }

    /// Contents of one cell
    pub fn cell(&self, address: usize) -> Option<u8> {
        self.cells.get(address).copied()
    }

    /// Completed write cycles
    pub fn commits(&self) -> usize {
        self.commits
    }

    fn index(&self) -> usize {
        self.address as usize % self.cells.len().max(1)
    }
}

impl SramBus for SimulatedSramBus {
    fn drive_address(&mut self, address: u32) {
        self.address = address;
    }

    fn address(&self) -> u32 {
        self.address
    }

    fn set_data_direction(&mut self, direction: DataDirection) {
        self.direction = direction;
    }

    fn write_data(&mut self, value: u8) {
        self.data_out = value;
    }

    fn read_data(&mut self) -> u8 {
        // Floating port reads back as all ones.
        if !self.chip_enable || self.write_enable || self.direction != DataDirection::Input {
            return 0xFF;
        }
        let index = self.index();
        self.cells.get(index).copied().unwrap_or(0xFF)
    }

    fn set_chip_enable(&mut self, asserted: bool) {
        let releasing = self.chip_enable && !asserted;
        if releasing && self.write_enable && self.direction == DataDirection::Output {
            let index = self.index();
            if let Some(cell) = self.cells.get_mut(index) {
                *cell = self.data_out;
                self.commits += 1;
            }
        }
        self.chip_enable = asserted;
    }

    fn set_write_enable(&mut self, asserted: bool) {
        self.write_enable = asserted;
    }
}
