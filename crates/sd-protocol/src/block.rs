//! Block unit of card I/O

/// Fixed card block size in bytes
pub const BLOCK_SIZE: usize = 512;

/// One card block
pub type Block = [u8; BLOCK_SIZE];

/// Supplies the payload of an outgoing block one byte at a time.
///
/// The write paths call `byte_at` exactly once for each index in
/// `0..BLOCK_SIZE`, in ascending order, while the payload is on the wire.
pub trait BlockSource {
    /// Byte at position `index` of the block
    fn byte_at(&mut self, index: usize) -> u8;
}

impl BlockSource for Block {
    fn byte_at(&mut self, index: usize) -> u8 {
        self[index]
    }
}

impl BlockSource for &Block {
    fn byte_at(&mut self, index: usize) -> u8 {
        self[index]
    }
}
