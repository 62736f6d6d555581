//! Command framing and response decoding

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::token;

/// Framing applied to every outgoing command: byte 0 bit 7 cleared and
/// bit 6 set, byte 5 bit 0 (stop bit) set. Other bits pass through.
pub fn apply_framing(mut frame: [u8; 6]) -> [u8; 6] {
    frame[0] |= 1 << 6;
    frame[0] &= !(1 << 7);
    frame[5] |= 1;
    frame
}

/// A 6-byte card command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardCommand {
    /// Command index (0..=63)
    pub index: u8,
    /// 32-bit argument, sent big-endian
    pub argument: u32,
    /// Trailing CRC byte. Only CMD0 and CMD8 need a real value while
    /// the card is still in CRC mode.
    pub crc: u8,
}

impl CardCommand {
    /// Create a command with a filler CRC byte
    pub const fn new(index: u8, argument: u32) -> Self {
        Self {
            index,
            argument,
            crc: 0xFF,
        }
    }

    /// Replace the trailing CRC byte
    pub const fn with_crc(mut self, crc: u8) -> Self {
        self.crc = crc;
        self
    }

    /// Wire bytes with framing bits forced
    pub fn frame(&self) -> [u8; 6] {
        let [a3, a2, a1, a0] = self.argument.to_be_bytes();
        apply_framing([self.index, a3, a2, a1, a0, self.crc])
    }

    /// CMD0 GO_IDLE_STATE
    pub const fn go_idle_state() -> Self {
        Self::new(crate::cmd::GO_IDLE_STATE, 0).with_crc(0x95)
    }

    /// CMD8 SEND_IF_COND for 2.7-3.6V with check pattern 0xAA
    pub const fn send_if_cond() -> Self {
        Self::new(crate::cmd::SEND_IF_COND, 0x0000_01AA).with_crc(0x87)
    }

    /// CMD58 READ_OCR
    pub const fn read_ocr() -> Self {
        Self::new(crate::cmd::READ_OCR, 0)
    }

    /// CMD55 APP_CMD
    pub const fn app_cmd() -> Self {
        Self::new(crate::cmd::APP_CMD, 0).with_crc(0x01)
    }

    /// ACMD41 SD_SEND_OP_COND with the high-capacity support bit set
    pub const fn sd_send_op_cond() -> Self {
        Self::new(crate::cmd::SD_SEND_OP_COND, HCS_BIT).with_crc(0x01)
    }

    /// ACMD23 SET_WR_BLK_ERASE_COUNT (23-bit block count)
    pub const fn set_wr_blk_erase_count(blocks: u32) -> Self {
        Self::new(crate::cmd::SET_WR_BLK_ERASE_COUNT, blocks & 0x007F_FFFF)
    }

    /// CMD17 READ_SINGLE_BLOCK
    pub const fn read_single_block(block: u32) -> Self {
        Self::new(crate::cmd::READ_SINGLE_BLOCK, block)
    }

    /// CMD24 WRITE_BLOCK
    pub const fn write_block(block: u32) -> Self {
        Self::new(crate::cmd::WRITE_BLOCK, block)
    }

    /// CMD25 WRITE_MULTIPLE_BLOCK
    pub const fn write_multiple_block(block: u32) -> Self {
        Self::new(crate::cmd::WRITE_MULTIPLE_BLOCK, block)
    }
}

/// Host capacity support flag in the ACMD41 argument
pub const HCS_BIT: u32 = 1 << 30;

/// Echo pattern in the CMD8 argument and its R7 response
pub const CHECK_PATTERN: u8 = 0xAA;

/// Card capacity status bit in the first OCR byte
pub const OCR_CCS: u32 = 1 << 30;

bitflags! {
    /// R1 response bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct R1: u8 {
        /// Card is in idle state and running its initialization process
        const IDLE = 1 << 0;
        /// An erase sequence was cleared before executing
        const ERASE_RESET = 1 << 1;
        /// Illegal command code detected
        const ILLEGAL_COMMAND = 1 << 2;
        /// CRC check of the last command failed
        const COM_CRC_ERROR = 1 << 3;
        /// Error in the sequence of erase commands
        const ERASE_SEQUENCE_ERROR = 1 << 4;
        /// Misaligned address
        const ADDRESS_ERROR = 1 << 5;
        /// Argument out of range for this card
        const PARAMETER_ERROR = 1 << 6;
    }
}

impl R1 {
    /// Top bit set means the card has not driven a response yet
    pub fn is_valid(raw: u8) -> bool {
        raw & 0x80 == 0
    }

    /// Whether any error bit is set (idle alone is not an error)
    pub fn has_error(self) -> bool {
        !self.difference(R1::IDLE).is_empty()
    }
}

/// Data-response token following a written block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataResponse {
    /// `0b00101` - data accepted
    Accepted,
    /// `0b01011` - rejected, CRC error
    CrcError,
    /// `0b01101` - rejected, write error
    WriteError,
}

impl DataResponse {
    /// Decode the low five bits of a token byte
    pub fn from_token(raw: u8) -> Option<Self> {
        match raw & token::DATA_RESPONSE_MASK {
            0b00101 => Some(DataResponse::Accepted),
            0b01011 => Some(DataResponse::CrcError),
            0b01101 => Some(DataResponse::WriteError),
            _ => None,
        }
    }

    /// Token byte as a card drives it (unused high bits set)
    pub fn token(self) -> u8 {
        let status = match self {
            DataResponse::Accepted => 0b00101,
            DataResponse::CrcError => 0b01011,
            DataResponse::WriteError => 0b01101,
        };
        0xE0 | status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_frame_bits_forced(index in 0u8..64, argument in any::<u32>(), crc in any::<u8>()) {
            let frame = CardCommand::new(index, argument).with_crc(crc).frame();
            prop_assert_eq!(frame[0] & 0x80, 0);
            prop_assert_eq!(frame[0] & 0x40, 0x40);
            prop_assert_eq!(frame[0] & 0x3F, index);
            prop_assert_eq!(frame[5] & 0x01, 0x01);
            prop_assert_eq!(&frame[1..5], &argument.to_be_bytes()[..]);
        }

        #[test]
        fn test_framing_overrides_caller_bits(raw in any::<[u8; 6]>()) {
            let framed = apply_framing(raw);
            prop_assert_eq!(framed[0] >> 6, 0b01);
            prop_assert_eq!(framed[5] & 1, 1);
            prop_assert_eq!(&framed[1..5], &raw[1..5]);
            prop_assert_eq!(framed[0] & 0x3F, raw[0] & 0x3F);
        }
    }

    #[test]
    fn test_well_known_frames() {
        assert_eq!(CardCommand::go_idle_state().frame(), [0x40, 0, 0, 0, 0, 0x95]);
        assert_eq!(CardCommand::send_if_cond().frame(), [0x48, 0, 0, 0x01, 0xAA, 0x87]);
        assert_eq!(CardCommand::read_ocr().frame(), [0x7A, 0, 0, 0, 0, 0xFF]);
        assert_eq!(CardCommand::app_cmd().frame(), [0x77, 0, 0, 0, 0, 0x01]);
        assert_eq!(CardCommand::sd_send_op_cond().frame(), [0x69, 0x40, 0, 0, 0, 0x01]);
        assert_eq!(
            CardCommand::write_multiple_block(0x0102_0304).frame(),
            [0x59, 0x01, 0x02, 0x03, 0x04, 0xFF]
        );
    }

    #[test]
    fn test_data_response_tokens() {
        assert_eq!(DataResponse::from_token(0xE5), Some(DataResponse::Accepted));
        assert_eq!(DataResponse::from_token(0x05), Some(DataResponse::Accepted));
        assert_eq!(DataResponse::from_token(0xEB), Some(DataResponse::CrcError));
        assert_eq!(DataResponse::from_token(0xED), Some(DataResponse::WriteError));
        assert_eq!(DataResponse::from_token(0xFF), None);
        for response in [DataResponse::Accepted, DataResponse::CrcError, DataResponse::WriteError] {
            assert_eq!(DataResponse::from_token(response.token()), Some(response));
        }
    }

    #[test]
    fn test_r1_bits() {
        assert!(!R1::IDLE.has_error());
        assert!(!R1::empty().has_error());
        assert!((R1::IDLE | R1::ILLEGAL_COMMAND).has_error());
        assert!(R1::is_valid(0x01));
        assert!(!R1::is_valid(0xFF));
    }
}
