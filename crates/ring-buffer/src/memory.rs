//! External Addressable Memory contract

use std::ops::{Deref, DerefMut};

/// Address and chip-enable state of a memory bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusState {
    pub address: usize,
    pub chip_enabled: bool,
}

/// Byte-wide memory with a single live address register
pub trait AddressableMemory {
    /// Number of addressable bytes
    fn capacity(&self) -> usize;

    /// Snapshot of the address lines and chip-enable
    fn bus_state(&self) -> BusState;

    /// Put the bus back the way a snapshot found it
    fn restore_bus(&mut self, state: BusState);

    /// Drive the address lines
    fn set_address(&mut self, address: usize);

    /// Read the byte at the current address
    fn read(&mut self) -> u8;

    /// Write a byte at the current address
    fn write(&mut self, value: u8);
}

/// Scoped bus access. Snapshots the bus on creation and restores it when
/// dropped, so code it interrupts sees the bus exactly as it left it.
pub struct BusGuard<'a, M: AddressableMemory + ?Sized> {
    memory: &'a mut M,
    saved: BusState,
}

impl<'a, M: AddressableMemory + ?Sized> BusGuard<'a, M> {
    pub fn new(memory: &'a mut M) -> Self {
        let saved = memory.bus_state();
        Self { memory, saved }
    }

    /// State that will be restored on drop
    pub fn saved(&self) -> BusState {
        self.saved
    }
}

impl<M: AddressableMemory + ?Sized> Deref for BusGuard<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.memory
    }
}

impl<M: AddressableMemory + ?Sized> DerefMut for BusGuard<'_, M> {
    fn deref_mut(&mut self) -> &mut M {
        self.memory
    }
}

impl<M: AddressableMemory + ?Sized> Drop for BusGuard<'_, M> {
    fn drop(&mut self) {
        self.memory.restore_bus(self.saved);
    }
}

/// Ring storage in on-chip RAM, for reduced-footprint builds
#[derive(Debug, Clone)]
pub struct InternalMemory {
    cells: Box<[u8]>,
    address: usize,
    chip_enabled: bool,
}

impl InternalMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            cells: vec![0u8; capacity].into_boxed_slice(),
            address: 0,
            chip_enabled: false,
        }
    }

    /// Raw contents
    pub fn as_slice(&self) -> &[u8] {
        &self.cells
    }
}

impl AddressableMemory for InternalMemory {
    fn capacity(&self) -> usize {
        self.cells.len()
    }

    fn bus_state(&self) -> BusState {
        BusState {
            address: self.address,
            chip_enabled: self.chip_enabled,
        }
    }

    fn restore_bus(&mut self, state: BusState) {
        self.set_address(state.address);
        self.chip_enabled = state.chip_enabled;
    }

    fn set_address(&mut self, address: usize) {
        self.address = if self.cells.is_empty() {
            0
        } else {
            address % self.cells.len()
        };
    }

    fn read(&mut self) -> u8 {
        self.cells.get(self.address).copied().unwrap_or(0)
    }

    fn write(&mut self, value: u8) {
        if let Some(cell) = self.cells.get_mut(self.address) {
            *cell = value;
        }
    }
}
