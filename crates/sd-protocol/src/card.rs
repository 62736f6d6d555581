//! SD Card Protocol Engine
//!
//! Every exchange below is a bounded loop. Attempt ceilings come from
//! [`CardTimeouts`]; exhausting one returns the failure status of that
//! exact step.

use crate::block::{Block, BlockSource, BLOCK_SIZE};
use crate::command::{CardCommand, DataResponse, CHECK_PATTERN, OCR_CCS, R1};
use crate::error::{CardError, InitStep, TransportError};
use crate::timeouts::CardTimeouts;
use crate::transport::{BusClock, ByteTransport, SpiLink};
use crate::{cmd, token};
use tracing::{debug, info, warn};

/// Protocol session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake not run, or the last one failed
    Uninitialized,
    /// Initialized with no write session open
    Ready,
    /// A CMD25 multi-block write is open
    Writing {
        /// First block of the session
        start_block: u32,
        /// Block the next segment lands on
        next_block: u32,
    },
}

/// Card details captured during initialization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardInfo {
    /// Operating conditions register from the post-init CMD58
    pub ocr: u32,
}

impl CardInfo {
    /// Card capacity status bit: block-addressed (SDHC/SDXC) card
    pub fn is_high_capacity(&self) -> bool {
        self.ocr & OCR_CCS != 0
    }
}

/// Outcome of the pre-erase hint. A hint that did not take only costs
/// write throughput, so it is reported apart from protocol failures.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreErase {
    /// The card accepted the block count
    Applied { blocks: u32 },
    /// The hint was not applied
    NotApplied(CardError),
}

impl PreErase {
    /// Whether the card accepted the hint
    pub fn is_applied(&self) -> bool {
        matches!(self, PreErase::Applied { .. })
    }
}

/// SD card driven over a [`ByteTransport`]
pub struct SdCard<L> {
    transport: ByteTransport<L>,
    timeouts: CardTimeouts,
    state: SessionState,
    info: Option<CardInfo>,
}

impl<L: SpiLink> SdCard<L> {
    /// Create an uninitialized card on the given link
    pub fn new(link: L, timeouts: CardTimeouts) -> Self {
        Self {
            transport: ByteTransport::new(link),
            timeouts,
            state: SessionState::Uninitialized,
            info: None,
        }
    }

    /// Run the full initialization handshake.
    ///
    /// Safe to call repeatedly: CMD0 resets the card each time, and any
    /// open write session is forgotten.
    pub fn initialize(&mut self) -> Result<CardInfo, CardError> {
        info!("Initializing SD card");
        self.state = SessionState::Uninitialized;
        self.info = None;

        match self.run_init() {
            Ok(info) => {
                info!(
                    ocr = format_args!("{:#010x}", info.ocr),
                    high_capacity = info.is_high_capacity(),
                    "SD card ready"
                );
                self.state = SessionState::Ready;
                self.info = Some(info);
                Ok(info)
            }
            Err(err) => {
                warn!(status = err.status_code(), "SD card initialization failed: {}", err);
                // The handshake status is what the caller needs to see.
                if let Err(deselect) = self.transport.select(false) {
                    warn!("Deselect after failed initialization: {}", deselect);
                }
                Err(err)
            }
        }
    }

    fn run_init(&mut self) -> Result<CardInfo, CardError> {
        let t = self.timeouts;

        self.transport.set_clock(BusClock::Initialization)?;
        self.transport.select(false)?;
        self.transport.idle_clocks(t.power_up_clocks)?;
        self.transport.select(true)?;

        self.go_idle()?;
        self.transport.idle_clocks(2)?;

        self.check_interface_condition()?;
        self.transport.idle_clocks(2)?;

        self.read_ocr(
            InitStep::ReadOcr,
            R1::IDLE.bits(),
            t.read_ocr_attempts,
            t.read_ocr_response_polls,
        )?;
        self.transport.idle_clocks(2)?;

        self.app_init()?;

        // Only point where the transport is reconfigured mid-session.
        self.transport.select(false)?;
        self.transport.set_clock(BusClock::HighSpeed)?;
        self.transport.select(true)?;

        let ocr = self.read_ocr(
            InitStep::ConfirmOcr,
            R1::empty().bits(),
            t.confirm_ocr_attempts,
            t.confirm_ocr_response_polls,
        )?;
        self.transport.idle_clocks(2)?;
        self.transport.select(false)?;

        Ok(CardInfo { ocr })
    }

    fn go_idle(&mut self) -> Result<(), CardError> {
        let t = self.timeouts;
        for attempt in 1..=t.go_idle_attempts {
            self.reselect()?;
            if !self.wait_ready()? {
                return Err(CardError::InitNotReady {
                    step: InitStep::GoIdle,
                });
            }
            self.send_frame(CardCommand::go_idle_state())?;

            let response = self.poll_response(t.go_idle_response_polls, |b| b != token::IDLE)?;
            if response == Some(R1::IDLE.bits()) {
                debug!(attempt, "CMD0 accepted, card in idle state");
                return Ok(());
            }
        }
        Err(CardError::InitTimeout {
            step: InitStep::GoIdle,
        })
    }

    fn check_interface_condition(&mut self) -> Result<(), CardError> {
        let t = self.timeouts;
        for attempt in 1..=t.interface_condition_attempts {
            self.reselect()?;
            if !self.wait_ready()? {
                return Err(CardError::InitNotReady {
                    step: InitStep::InterfaceCondition,
                });
            }
            self.transport.write_byte(token::IDLE)?;
            self.send_frame(CardCommand::send_if_cond())?;

            let mut echo = None;
            for _ in 0..t.interface_condition_response_polls {
                if self.transport.read_byte()? == R1::IDLE.bits() {
                    // R7 tail: two reserved bytes, accepted voltage, echo
                    for _ in 0..3 {
                        self.transport.read_byte()?;
                    }
                    echo = Some(self.transport.read_byte()?);
                    break;
                }
            }

            if echo == Some(CHECK_PATTERN) {
                debug!(attempt, "CMD8 echo matched");
                return Ok(());
            }
            debug!(attempt, ?echo, "CMD8 echo mismatch, retrying");
        }
        Err(CardError::InitTimeout {
            step: InitStep::InterfaceCondition,
        })
    }

    fn read_ocr(
        &mut self,
        step: InitStep,
        expected: u8,
        attempts: usize,
        polls: usize,
    ) -> Result<u32, CardError> {
        for attempt in 1..=attempts {
            self.reselect()?;
            if !self.wait_ready()? {
                return Err(CardError::InitNotReady { step });
            }
            self.transport.write_byte(token::IDLE)?;
            self.send_frame(CardCommand::read_ocr())?;

            for _ in 0..polls {
                if self.transport.read_byte()? == expected {
                    let mut ocr = [0u8; 4];
                    for byte in ocr.iter_mut() {
                        *byte = self.transport.read_byte()?;
                    }
                    let ocr = u32::from_be_bytes(ocr);
                    debug!(%step, attempt, ocr = format_args!("{:#010x}", ocr), "OCR read");
                    return Ok(ocr);
                }
            }
        }
        Err(CardError::InitTimeout { step })
    }

    fn app_init(&mut self) -> Result<(), CardError> {
        let t = self.timeouts;
        for iteration in 1..=t.app_init_attempts {
            if !self.app_command(CardError::InitNotReady {
                step: InitStep::AppCommand,
            })? {
                debug!(iteration, "CMD55 not acknowledged, sending ACMD41 anyway");
            }

            self.between_app_commands()?;
            if !self.wait_ready()? {
                return Err(CardError::InitNotReady {
                    step: InitStep::AppInit,
                });
            }
            self.send_frame(CardCommand::sd_send_op_cond())?;

            if self.poll_valid_r1()? == Some(R1::empty().bits()) {
                info!(iterations = iteration, "Card left idle state");
                return Ok(());
            }
        }
        Err(CardError::InitTimeout {
            step: InitStep::AppInit,
        })
    }

    /// CMD55 with its own inner retry. Returns whether the card
    /// acknowledged; callers send the application command either way.
    fn app_command(&mut self, not_ready: CardError) -> Result<bool, CardError> {
        for _ in 0..self.timeouts.app_command_attempts {
            self.reselect()?;
            if !self.wait_ready()? {
                return Err(not_ready);
            }
            self.send_frame(CardCommand::app_cmd())?;

            if let Some(status) = self.poll_valid_r1()? {
                if !R1::from_bits_retain(status).has_error() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn between_app_commands(&mut self) -> Result<(), TransportError> {
        self.transport.select(false)?;
        self.transport.idle_clocks(2)?;
        self.transport.select(true)?;
        self.transport.write_byte(token::IDLE)
    }

    /// Read one block (CMD17) into `buf`
    pub fn read_block(&mut self, block: u32, buf: &mut Block) -> Result<(), CardError> {
        self.require_ready()?;
        self.transport.select(true)?;
        let result = self.read_block_inner(block, buf);
        self.release()?;
        result
    }

    fn read_block_inner(&mut self, block: u32, buf: &mut Block) -> Result<(), CardError> {
        let response = self.command(CardCommand::read_single_block(block))?;
        if response != 0 {
            // A bad R1 on a read is a hard error, not retried.
            return Err(CardError::CommandRejected {
                command: cmd::READ_SINGLE_BLOCK,
                response,
            });
        }

        let token = self.poll_response(self.timeouts.start_block_polls, |b| {
            b == token::START_BLOCK
        })?;
        if token.is_none() {
            return Err(CardError::StartTokenTimeout);
        }

        for byte in buf.iter_mut() {
            *byte = self.transport.read_byte()?;
        }
        // CRC is read off the wire but not checked in SPI non-CRC mode.
        self.transport.read_byte()?;
        self.transport.read_byte()?;

        debug!(block, "Block read");
        Ok(())
    }

    /// Write one block (CMD24)
    pub fn write_block<S>(&mut self, block: u32, source: &mut S) -> Result<(), CardError>
    where
        S: BlockSource + ?Sized,
    {
        self.require_ready()?;
        self.transport.select(true)?;
        let result = self.write_block_inner(block, source);
        self.release()?;
        result
    }

    fn write_block_inner<S>(&mut self, block: u32, source: &mut S) -> Result<(), CardError>
    where
        S: BlockSource + ?Sized,
    {
        let response = self.command(CardCommand::write_block(block))?;
        if response != 0 {
            return Err(CardError::CommandRejected {
                command: cmd::WRITE_BLOCK,
                response,
            });
        }

        self.transport.write_byte(token::START_BLOCK)?;
        self.send_payload(source)?;
        self.await_data_response(self.timeouts.data_response_polls)?;
        self.wait_not_busy()?;

        debug!(block, "Block written");
        Ok(())
    }

    /// Open a multi-block write session (CMD25) at `start_block`
    pub fn begin_write_session(&mut self, start_block: u32) -> Result<(), CardError> {
        self.require_ready()?;

        self.reselect()?;
        if !self.wait_ready()? {
            self.release()?;
            return Err(CardError::NotReady {
                command: cmd::WRITE_MULTIPLE_BLOCK,
            });
        }
        self.send_frame(CardCommand::write_multiple_block(start_block))?;

        match self.poll_response(self.timeouts.session_response_polls, |b| b != token::IDLE)? {
            Some(0) => {
                info!(start_block, "Multi-block write session opened");
                self.state = SessionState::Writing {
                    start_block,
                    next_block: start_block,
                };
                Ok(())
            }
            Some(response) => {
                self.release()?;
                Err(CardError::CommandRejected {
                    command: cmd::WRITE_MULTIPLE_BLOCK,
                    response,
                })
            }
            None => {
                self.release()?;
                Err(CardError::ResponseTimeout {
                    command: cmd::WRITE_MULTIPLE_BLOCK,
                })
            }
        }
    }

    /// Stream one segment of the open session; returns the block it
    /// landed on. Segments are sequential from the session start.
    pub fn write_segment<S>(&mut self, source: &mut S) -> Result<u32, CardError>
    where
        S: BlockSource + ?Sized,
    {
        let SessionState::Writing {
            start_block,
            next_block,
        } = self.state
        else {
            return Err(CardError::NoOpenSession);
        };

        self.transport.select(true)?;
        self.transport.write_byte(token::START_MULTI_BLOCK)?;
        self.send_payload(source)?;
        self.await_data_response(self.timeouts.segment_response_polls)?;
        self.wait_not_busy()?;

        self.state = SessionState::Writing {
            start_block,
            next_block: next_block.wrapping_add(1),
        };
        Ok(next_block)
    }

    /// Close the open session; returns how many segments it wrote
    pub fn end_write_session(&mut self) -> Result<u32, CardError> {
        let SessionState::Writing {
            start_block,
            next_block,
        } = self.state
        else {
            return Err(CardError::NoOpenSession);
        };

        self.transport.select(true)?;
        self.transport.write_byte(token::STOP_MULTI_BLOCK)?;
        self.transport.idle_clocks(2)?;
        let busy = self.wait_not_busy();
        self.release()?;
        self.state = SessionState::Ready;
        busy?;

        let blocks = next_block.wrapping_sub(start_block);
        info!(start_block, blocks, "Multi-block write session closed");
        Ok(blocks)
    }

    /// Tell the card how many blocks the next multi-block write will
    /// cover (CMD55 + ACMD23).
    pub fn pre_erase_blocks(&mut self, blocks: u32) -> PreErase {
        let outcome = match self.require_ready() {
            Ok(()) => self.run_pre_erase(blocks),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => {
                debug!(blocks, "Pre-erase hint applied");
                PreErase::Applied { blocks }
            }
            Err(err) => {
                warn!(blocks, "Pre-erase hint not applied, continuing without it: {}", err);
                PreErase::NotApplied(err)
            }
        }
    }

    fn run_pre_erase(&mut self, blocks: u32) -> Result<(), CardError> {
        let result = self.pre_erase_exchange(blocks);
        self.release()?;
        result
    }

    fn pre_erase_exchange(&mut self, blocks: u32) -> Result<(), CardError> {
        for _ in 0..self.timeouts.pre_erase_attempts {
            self.app_command(CardError::NotReady {
                command: cmd::APP_CMD,
            })?;

            self.between_app_commands()?;
            if !self.wait_ready()? {
                return Err(CardError::NotReady {
                    command: cmd::SET_WR_BLK_ERASE_COUNT,
                });
            }
            self.send_frame(CardCommand::set_wr_blk_erase_count(blocks))?;

            if self.poll_response(self.timeouts.r1_polls, |b| b == 0x00)?.is_some() {
                return Ok(());
            }
        }
        Err(CardError::PreEraseTimeout)
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the card is initialized with no session open
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Details captured by the last successful initialization
    pub fn info(&self) -> Option<CardInfo> {
        self.info
    }

    /// Configured ceilings
    pub fn timeouts(&self) -> &CardTimeouts {
        &self.timeouts
    }

    /// Borrow the underlying link
    pub fn link(&self) -> &L {
        self.transport.link()
    }

    /// Mutably borrow the underlying link
    pub fn link_mut(&mut self) -> &mut L {
        self.transport.link_mut()
    }

    /// Unwrap the underlying link
    pub fn into_link(self) -> L {
        self.transport.into_link()
    }

    fn require_ready(&self) -> Result<(), CardError> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Uninitialized => Err(CardError::NotInitialized),
            SessionState::Writing { .. } => Err(CardError::SessionAlreadyOpen),
        }
    }

    /// Send a framed command and return its R1. Chip-select is restored to
    /// its prior state afterwards, followed by one settle clock.
    fn command(&mut self, command: CardCommand) -> Result<u8, CardError> {
        let was_selected = self.transport.is_selected();

        self.transport.select(true)?;
        self.send_frame(command)?;
        let response =
            self.poll_response(self.timeouts.command_response_polls, |b| b != token::IDLE)?;

        self.transport.select(false)?;
        self.transport.write_byte(token::IDLE)?;
        self.transport.select(was_selected)?;

        response.ok_or(CardError::ResponseTimeout {
            command: command.index,
        })
    }

    fn send_frame(&mut self, command: CardCommand) -> Result<(), TransportError> {
        for byte in command.frame() {
            self.transport.write_byte(byte)?;
        }
        Ok(())
    }

    fn send_payload<S>(&mut self, source: &mut S) -> Result<(), TransportError>
    where
        S: BlockSource + ?Sized,
    {
        for index in 0..BLOCK_SIZE {
            self.transport.write_byte(source.byte_at(index))?;
        }
        // Filler CRC
        self.transport.write_byte(0xFF)?;
        self.transport.write_byte(0xFF)
    }

    /// Deselect, then toggle chip-select with a clock on each side
    fn reselect(&mut self) -> Result<(), TransportError> {
        self.transport.select(false)?;
        self.transport.write_byte(token::IDLE)?;
        self.transport.select(true)?;
        self.transport.write_byte(token::IDLE)
    }

    /// Deselect and emit the trailing clock the card needs to finish up
    fn release(&mut self) -> Result<(), TransportError> {
        self.transport.select(false)?;
        self.transport.write_byte(token::IDLE)
    }

    /// Wait for the card to release the bus (reads back the idle value)
    fn wait_ready(&mut self) -> Result<bool, TransportError> {
        Ok(self
            .poll_response(self.timeouts.ready_polls, |b| b == token::IDLE)?
            .is_some())
    }

    /// Read until `done` accepts a byte or `polls` reads have been made
    fn poll_response(
        &mut self,
        polls: usize,
        done: impl Fn(u8) -> bool,
    ) -> Result<Option<u8>, TransportError> {
        for _ in 0..polls {
            let byte = self.transport.read_byte()?;
            if done(byte) {
                return Ok(Some(byte));
            }
        }
        Ok(None)
    }

    /// Read until a byte with the top bit clear arrives
    fn poll_valid_r1(&mut self) -> Result<Option<u8>, TransportError> {
        self.poll_response(self.timeouts.r1_polls, R1::is_valid)
    }

    fn await_data_response(&mut self, polls: usize) -> Result<(), CardError> {
        for _ in 0..polls {
            match DataResponse::from_token(self.transport.read_byte()?) {
                Some(DataResponse::Accepted) => return Ok(()),
                Some(rejected) => return Err(CardError::DataRejected(rejected)),
                None => continue,
            }
        }
        Err(CardError::DataResponseTimeout)
    }

    /// The card holds the data line low while it commits a block
    fn wait_not_busy(&mut self) -> Result<(), CardError> {
        match self.poll_response(self.timeouts.busy_polls, |b| b != 0x00)? {
            Some(_) => Ok(()),
            None => Err(CardError::BusyTimeout),
        }
    }
}
