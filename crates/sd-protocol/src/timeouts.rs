//! Iteration ceilings for every bounded wait

use serde::{Deserialize, Serialize};

/// Retry and poll ceilings used by [`SdCard`](crate::SdCard).
///
/// Attempt counts bound whole command exchanges; poll counts bound the
/// number of bytes read while waiting for a single response or token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardTimeouts {
    /// Idle bytes clocked with the card deselected at power-up
    pub power_up_clocks: usize,
    /// Reads waiting for the card to release the bus before a command
    pub ready_polls: usize,
    /// CMD0 exchanges before giving up
    pub go_idle_attempts: usize,
    /// Reads waiting for the CMD0 response
    pub go_idle_response_polls: usize,
    /// CMD8 exchanges before giving up
    pub interface_condition_attempts: usize,
    /// Reads waiting for the CMD8 response
    pub interface_condition_response_polls: usize,
    /// Pre-init CMD58 exchanges before giving up
    pub read_ocr_attempts: usize,
    /// Reads waiting for the CMD58 response
    pub read_ocr_response_polls: usize,
    /// Outer CMD55+ACMD41 iterations (about one second of card time)
    pub app_init_attempts: usize,
    /// CMD55 exchanges within one outer iteration
    pub app_command_attempts: usize,
    /// Reads waiting for a valid R1 after CMD55 or an application command
    pub r1_polls: usize,
    /// Post-init CMD58 exchanges before giving up
    pub confirm_ocr_attempts: usize,
    /// Reads waiting for the post-init CMD58 response
    pub confirm_ocr_response_polls: usize,
    /// Reads waiting for R1 after a framed command
    pub command_response_polls: usize,
    /// Reads waiting for the start-block token of a read
    pub start_block_polls: usize,
    /// Reads waiting for the data-response token of a single-block write
    pub data_response_polls: usize,
    /// Reads waiting for the data-response token of a multi-block segment
    pub segment_response_polls: usize,
    /// Reads waiting for the CMD25 response
    pub session_response_polls: usize,
    /// Outer CMD55+ACMD23 iterations
    pub pre_erase_attempts: usize,
    /// Reads while the card holds the line busy after a write
    pub busy_polls: usize,
}

impl Default for CardTimeouts {
    fn default() -> Self {
        Self {
            power_up_clocks: 20,
            ready_polls: 5000,
            go_idle_attempts: 500,
            go_idle_response_polls: 100,
            interface_condition_attempts: 500,
            interface_condition_response_polls: 10,
            read_ocr_attempts: 200,
            read_ocr_response_polls: 10,
            app_init_attempts: 1000,
            app_command_attempts: 20,
            r1_polls: 20,
            confirm_ocr_attempts: 1000,
            confirm_ocr_response_polls: 20,
            command_response_polls: 100,
            start_block_polls: 10_000,
            data_response_polls: 100,
            segment_response_polls: 1000,
            session_response_polls: 20,
            pre_erase_attempts: 1000,
            busy_polls: 500_000,
        }
    }
}
