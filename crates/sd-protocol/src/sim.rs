//! Simulated SD card
//!
//! A byte-accurate SPI-mode card model for host-side testing of the
//! protocol engine and the recorder. The model follows the card side of
//! the exchange: it only drives MISO while selected, answers each framed
//! command after one Ncr filler byte, holds the line low while a write
//! commits, and stores accepted blocks in memory.

use std::collections::{HashMap, VecDeque};

use crate::block::{Block, BLOCK_SIZE};
use crate::command::{DataResponse, R1};
use crate::error::TransportError;
use crate::transport::{BusClock, SpiLink};
use crate::{cmd, token};

/// Deselected idle bytes a card needs after power-up (74+ clocks)
const WAKE_CLOCKS: usize = 10;

/// OCR the model reports: 3.2-3.4V window, power-up done
const OCR_BASE: u32 = 0x80FF_8000;

/// Point from which the card holds MISO low for good
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusHold {
    /// From power-up
    PowerUp,
    /// Once the given command has been answered
    After { index: u8, application: bool },
}

/// How the simulated card misbehaves
#[derive(Debug, Clone)]
pub struct SimBehavior {
    /// CMD0 frames dropped before the card starts answering
    pub ignored_go_idle: u32,
    /// ACMD41 answers that still report idle
    pub app_init_busy_rounds: u32,
    /// CMD8 answers with a corrupted echo pattern
    pub echo_faults: u32,
    /// Never answer anything
    pub unresponsive: bool,
    /// ACMD41 never completes
    pub stuck_idle: bool,
    /// ACMD23 is refused as illegal
    pub reject_pre_erase: bool,
    /// Hold the line busy forever after a write
    pub stuck_busy: bool,
    /// CMD58 goes unanswered while the card is idle
    pub silent_idle_ocr: bool,
    /// CMD58 goes unanswered once the card is initialized
    pub silent_ready_ocr: bool,
    /// Hold the bus low so no further command can be sent
    pub hold_bus: Option<BusHold>,
    /// Reads answer R1 but never start the data phase
    pub drop_start_token: bool,
    /// Committed blocks get no data-response token
    pub silent_data_response: bool,
    /// CMD25 goes unanswered
    pub ignore_session_open: bool,
    /// Busy bytes after each committed block
    pub busy_bytes: u32,
    /// Filler bytes between a read's R1 and its start token
    pub read_latency: usize,
    /// Addressable blocks
    pub capacity_blocks: u32,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            ignored_go_idle: 0,
            app_init_busy_rounds: 0,
            echo_faults: 0,
            unresponsive: false,
            stuck_idle: false,
            reject_pre_erase: false,
            stuck_busy: false,
            silent_idle_ocr: false,
            silent_ready_ocr: false,
            hold_bus: None,
            drop_start_token: false,
            silent_data_response: false,
            ignore_session_open: false,
            busy_bytes: 4,
            read_latency: 8,
            capacity_blocks: 1 << 16,
        }
    }
}

/// One framed command the card received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRecord {
    pub index: u8,
    pub argument: u32,
    /// Preceded by CMD55
    pub application: bool,
}

/// A clock reconfiguration and how far initialization had got
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockChange {
    pub clock: BusClock,
    /// ACMD41 frames seen before the change
    pub app_init_frames: usize,
}

/// Observations recorded by the model
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    pub commands: Vec<CommandRecord>,
    pub app_init_frames: usize,
    pub clock_changes: Vec<ClockChange>,
    /// Last block count accepted through ACMD23
    pub pre_erase: Option<u32>,
    pub blocks_committed: usize,
}

impl SimStats {
    /// Frames received for a standard (non-application) command index
    pub fn frames(&self, index: u8) -> usize {
        self.commands
            .iter()
            .filter(|record| record.index == index && !record.application)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CardState {
    Unreset,
    Idle,
    Ready,
}

#[derive(Debug)]
struct WritePhase {
    block: u32,
    /// `None` while waiting for the start token
    payload: Option<Vec<u8>>,
}

impl WritePhase {
    fn awaiting(block: u32) -> Self {
        Self {
            block,
            payload: None,
        }
    }
}

#[derive(Debug)]
enum Mode {
    Command,
    SingleWrite(WritePhase),
    MultiWrite(WritePhase),
}

/// In-memory SD card implementing [`SpiLink`]
#[derive(Debug)]
pub struct SimulatedCard {
    behavior: SimBehavior,
    selected: bool,
    clock: BusClock,
    deselected_clocks: usize,
    state: CardState,
    mode: Mode,
    frame: Vec<u8>,
    output: VecDeque<u8>,
    busy: u32,
    bus_held: bool,
    app_command: bool,
    ignored_go_idle: u32,
    app_init_pending: u32,
    echo_faults: u32,
    data_responses: VecDeque<DataResponse>,
    blocks: HashMap<u32, Block>,
    stats: SimStats,
}

impl Default for SimulatedCard {
    fn default() -> Self {
        Self::new(SimBehavior::default())
    }
}

impl SimulatedCard {
    /// Power up a card with the given behavior
    pub fn new(behavior: SimBehavior) -> Self {
        Self {
            selected: false,
            clock: BusClock::Initialization,
            deselected_clocks: 0,
            state: CardState::Unreset,
            mode: Mode::Command,
            frame: Vec::with_capacity(6),
            output: VecDeque::new(),
            busy: 0,
            bus_held: behavior.hold_bus == Some(BusHold::PowerUp),
            app_command: false,
            ignored_go_idle: behavior.ignored_go_idle,
            app_init_pending: behavior.app_init_busy_rounds,
            echo_faults: behavior.echo_faults,
            data_responses: VecDeque::new(),
            blocks: HashMap::new(),
            stats: SimStats::default(),
            behavior,
        }
    }

    /// Behavior in effect
    pub fn behavior(&self) -> &SimBehavior {
        &self.behavior
    }

    /// Script the data-response token for the next committed block
    pub fn queue_data_response(&mut self, response: DataResponse) {
        self.data_responses.push_back(response);
    }

    /// Stored contents of a block, if it was ever written
    pub fn block(&self, block: u32) -> Option<&Block> {
        self.blocks.get(&block)
    }

    /// Number of distinct blocks holding data
    pub fn stored_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the host currently selects the card
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Clock the host last configured
    pub fn clock(&self) -> BusClock {
        self.clock
    }

    /// Recorded observations
    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    fn receive(&mut self, byte: u8) {
        match std::mem::replace(&mut self.mode, Mode::Command) {
            Mode::Command => self.receive_command_byte(byte),
            Mode::SingleWrite(phase) => self.receive_data_byte(byte, phase, false),
            Mode::MultiWrite(phase) => self.receive_data_byte(byte, phase, true),
        }
    }

    fn receive_command_byte(&mut self, byte: u8) {
        // Frames start with a 0b01 prefix; anything else is filler.
        if self.frame.is_empty() && byte & 0xC0 != 0x40 {
            return;
        }
        self.frame.push(byte);
        if self.frame.len() == 6 {
            let frame = std::mem::take(&mut self.frame);
            self.execute(&frame);
        }
    }

    fn receive_data_byte(&mut self, byte: u8, mut phase: WritePhase, multi: bool) {
        let finished = match phase.payload.as_mut() {
            None => {
                match byte {
                    token::START_BLOCK if !multi => {
                        phase.payload = Some(Vec::with_capacity(BLOCK_SIZE + 2))
                    }
                    token::START_MULTI_BLOCK if multi => {
                        phase.payload = Some(Vec::with_capacity(BLOCK_SIZE + 2))
                    }
                    token::STOP_MULTI_BLOCK if multi => {
                        self.start_busy();
                        return;
                    }
                    _ => {}
                }
                None
            }
            Some(payload) => {
                payload.push(byte);
                (payload.len() == BLOCK_SIZE + 2).then(|| std::mem::take(payload))
            }
        };

        if let Some(payload) = finished {
            self.commit(phase.block, &payload[..BLOCK_SIZE]);
            if !multi {
                return;
            }
            phase = WritePhase::awaiting(phase.block.wrapping_add(1));
        }

        self.mode = if multi {
            Mode::MultiWrite(phase)
        } else {
            Mode::SingleWrite(phase)
        };
    }

    fn commit(&mut self, block: u32, data: &[u8]) {
        let response = self
            .data_responses
            .pop_front()
            .unwrap_or(DataResponse::Accepted);

        if response == DataResponse::Accepted {
            let mut stored = [0u8; BLOCK_SIZE];
            stored.copy_from_slice(data);
            self.blocks.insert(block, stored);
            self.stats.blocks_committed += 1;
        }
        if self.behavior.silent_data_response {
            return;
        }
        self.output.push_back(response.token());
        self.start_busy();
    }

    fn start_busy(&mut self) {
        self.busy = if self.behavior.stuck_busy {
            u32::MAX
        } else {
            self.behavior.busy_bytes
        };
    }

    fn execute(&mut self, frame: &[u8]) {
        let index = frame[0] & 0x3F;
        let argument = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let application = std::mem::take(&mut self.app_command);

        self.stats.commands.push(CommandRecord {
            index,
            argument,
            application,
        });
        self.output.clear();

        if self.behavior.unresponsive || self.deselected_clocks < WAKE_CLOCKS {
            return;
        }
        if let Some(response) = self.respond(index, argument, application) {
            // Ncr
            self.output.push_back(token::IDLE);
            self.output.extend(response);
            if self.behavior.hold_bus == Some(BusHold::After { index, application }) {
                self.bus_held = true;
            }
        }
    }

    fn respond(&mut self, index: u8, argument: u32, application: bool) -> Option<Vec<u8>> {
        if index == cmd::GO_IDLE_STATE && !application {
            if self.ignored_go_idle > 0 {
                self.ignored_go_idle -= 1;
                return None;
            }
            self.state = CardState::Idle;
            self.mode = Mode::Command;
            self.busy = 0;
            self.app_init_pending = self.behavior.app_init_busy_rounds;
            return Some(vec![R1::IDLE.bits()]);
        }

        let r1 = match self.state {
            CardState::Unreset => return None,
            CardState::Idle => R1::IDLE,
            CardState::Ready => R1::empty(),
        };
        let illegal = (r1 | R1::ILLEGAL_COMMAND).bits();

        let response = match (application, index) {
            (_, cmd::SEND_IF_COND) => {
                let pattern = argument as u8;
                let echo = if self.echo_faults > 0 {
                    self.echo_faults -= 1;
                    !pattern
                } else {
                    pattern
                };
                vec![r1.bits(), 0x00, 0x00, ((argument >> 8) & 0x0F) as u8, echo]
            }
            (_, cmd::READ_OCR) => {
                let silent = match self.state {
                    CardState::Ready => self.behavior.silent_ready_ocr,
                    _ => self.behavior.silent_idle_ocr,
                };
                if silent {
                    return None;
                }
                let ocr = if self.state == CardState::Ready {
                    OCR_BASE | crate::command::OCR_CCS
                } else {
                    OCR_BASE & !(1 << 31)
                };
                let mut response = vec![r1.bits()];
                response.extend(ocr.to_be_bytes());
                response
            }
            (_, cmd::APP_CMD) => {
                self.app_command = true;
                vec![r1.bits()]
            }
            (true, cmd::SD_SEND_OP_COND) => {
                self.stats.app_init_frames += 1;
                if self.behavior.stuck_idle || self.app_init_pending > 0 {
                    self.app_init_pending = self.app_init_pending.saturating_sub(1);
                    vec![R1::IDLE.bits()]
                } else {
                    self.state = CardState::Ready;
                    vec![R1::empty().bits()]
                }
            }
            (true, cmd::SET_WR_BLK_ERASE_COUNT) => {
                if self.state == CardState::Ready && !self.behavior.reject_pre_erase {
                    self.stats.pre_erase = Some(argument);
                    vec![R1::empty().bits()]
                } else {
                    vec![illegal]
                }
            }
            (false, cmd::READ_SINGLE_BLOCK) => match self.check_data_command(argument, illegal) {
                Err(code) => vec![code],
                Ok(()) if self.behavior.drop_start_token => vec![R1::empty().bits()],
                Ok(()) => {
                    let data = self
                        .blocks
                        .get(&argument)
                        .copied()
                        .unwrap_or([0u8; BLOCK_SIZE]);
                    let latency = self.behavior.read_latency;
                    let mut response = Vec::with_capacity(BLOCK_SIZE + latency + 4);
                    response.push(R1::empty().bits());
                    response.extend(std::iter::repeat(token::IDLE).take(latency));
                    response.push(token::START_BLOCK);
                    response.extend_from_slice(&data);
                    response.extend([0x00, 0x00]);
                    response
                }
            },
            (false, cmd::WRITE_BLOCK) => match self.check_data_command(argument, illegal) {
                Err(code) => vec![code],
                Ok(()) => {
                    self.mode = Mode::SingleWrite(WritePhase::awaiting(argument));
                    vec![R1::empty().bits()]
                }
            },
            (false, cmd::WRITE_MULTIPLE_BLOCK) if self.behavior.ignore_session_open => return None,
            (false, cmd::WRITE_MULTIPLE_BLOCK) => match self.check_data_command(argument, illegal) {
                Err(code) => vec![code],
                Ok(()) => {
                    self.mode = Mode::MultiWrite(WritePhase::awaiting(argument));
                    vec![R1::empty().bits()]
                }
            },
            _ => vec![illegal],
        };
        Some(response)
    }

    fn check_data_command(&self, block: u32, illegal: u8) -> Result<(), u8> {
        if self.state != CardState::Ready {
            return Err(illegal);
        }
        if block >= self.behavior.capacity_blocks {
            return Err(R1::ADDRESS_ERROR.bits());
        }
        Ok(())
    }
}

impl SpiLink for SimulatedCard {
    fn exchange(&mut self, byte: u8) -> Result<u8, TransportError> {
        if !self.selected {
            self.deselected_clocks = self.deselected_clocks.saturating_add(1);
            return Ok(token::IDLE);
        }

        let miso = match self.output.pop_front() {
            Some(out) => out,
            None if self.bus_held => 0x00,
            None if self.busy > 0 => {
                if !self.behavior.stuck_busy {
                    self.busy -= 1;
                }
                0x00
            }
            None => token::IDLE,
        };
        self.receive(byte);
        Ok(miso)
    }

    fn set_chip_select(&mut self, selected: bool) -> Result<(), TransportError> {
        self.selected = selected;
        Ok(())
    }

    fn set_clock(&mut self, clock: BusClock) -> Result<(), TransportError> {
        self.clock = clock;
        self.stats.clock_changes.push(ClockChange {
            clock,
            app_init_frames: self.stats.app_init_frames,
        });
        Ok(())
    }
}
