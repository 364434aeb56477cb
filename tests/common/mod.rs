//! Simulated buses shared by the behaviour tests.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};

use hex_literal::hex;

use sensorlog_bus::spi::{SpiConfig, SpiSpeed, Transceiver};
use sensorlog_bus::twi::status;
use sensorlog_bus::twi::{Prescaler, Pullups, TwiPeripheral};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ****************************************************************************
//
// Two-wire
//
// ****************************************************************************

/// What the simulated peripheral saw on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Address(u8),
    Data(u8),
    Receive(bool),
    Stop,
}

/// A two-wire peripheral with one register-file slave attached.
///
/// The first byte written after addressing the slave selects a register;
/// further writes store there and reads fetch from there, incrementing as
/// they go.
pub struct SimTwi {
    pub events: Vec<Event>,
    pub registers: [u8; 256],
    pub slave: u8,
    /// Acknowledge this many data bytes per transaction, then refuse.
    pub nack_data_after: Option<usize>,
    pub lose_arbitration: bool,
    /// Polls of `phase_complete` that report the phase still running.
    pub latency: u8,
    pub enabled: bool,
    pub interrupt: bool,
    pub pullups: Pullups,
    pub bit_rate: u8,
    pub prescaler: Prescaler,
    countdown: Cell<u8>,
    pending: bool,
    code: u8,
    data: u8,
    pointer: u8,
    expect_address: bool,
    expect_pointer: bool,
    in_transaction: bool,
    data_written: usize,
}

impl SimTwi {
    pub fn new(slave: u8) -> Self {
        SimTwi {
            events: Vec::new(),
            registers: [0; 256],
            slave,
            nack_data_after: None,
            lose_arbitration: false,
            latency: 0,
            enabled: false,
            interrupt: false,
            pullups: Pullups::empty(),
            bit_rate: 0,
            prescaler: Prescaler::Div1,
            countdown: Cell::new(0),
            pending: false,
            code: status::NO_INFO,
            data: 0,
            pointer: 0,
            expect_address: false,
            expect_pointer: false,
            in_transaction: false,
            data_written: 0,
        }
    }

    pub fn data_bytes(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Data(b) => Some(*b),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, event: Event) -> usize {
        self.events.iter().filter(|e| **e == event).count()
    }

    fn phase(&mut self, code: u8) {
        self.code = code;
        self.pending = true;
        self.countdown.set(self.latency);
    }
}

impl TwiPeripheral for SimTwi {
    fn configure(&mut self, bit_rate: u8, prescaler: Prescaler) {
        self.bit_rate = bit_rate;
        self.prescaler = prescaler;
    }

    fn enable(&mut self, enable: bool) {
        self.enabled = enable;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable_interrupt(&mut self, enable: bool) {
        self.interrupt = enable;
    }

    fn set_pullups(&mut self, pullups: Pullups) {
        self.pullups = pullups;
    }

    fn send_start(&mut self) {
        self.events.push(Event::Start);
        self.expect_address = true;
        self.data_written = 0;
        let code = if self.in_transaction {
            status::REP_START
        } else {
            status::START
        };
        self.in_transaction = true;
        self.phase(code);
    }

    fn send_stop(&mut self) {
        self.events.push(Event::Stop);
        self.in_transaction = false;
        self.pending = false;
        self.code = status::NO_INFO;
    }

    fn transmit(&mut self, byte: u8) {
        if self.expect_address {
            self.events.push(Event::Address(byte));
            self.expect_address = false;
            let read = byte & 0x01 != 0;
            let code = if self.lose_arbitration {
                status::ARB_LOST
            } else if byte >> 1 != self.slave {
                if read {
                    status::MR_SLA_NACK
                } else {
                    status::MT_SLA_NACK
                }
            } else if read {
                status::MR_SLA_ACK
            } else {
                self.expect_pointer = true;
                status::MT_SLA_ACK
            };
            self.phase(code);
        } else {
            self.events.push(Event::Data(byte));
            let refuse = self
                .nack_data_after
                .map_or(false, |n| self.data_written >= n);
            self.data_written += 1;
            if refuse {
                self.phase(status::MT_DATA_NACK);
                return;
            }
            if self.expect_pointer {
                self.pointer = byte;
                self.expect_pointer = false;
            } else {
                self.registers[usize::from(self.pointer)] = byte;
                self.pointer = self.pointer.wrapping_add(1);
            }
            self.phase(status::MT_DATA_ACK);
        }
    }

    fn receive(&mut self, ack: bool) {
        self.events.push(Event::Receive(ack));
        self.data = self.registers[usize::from(self.pointer)];
        self.pointer = self.pointer.wrapping_add(1);
        self.phase(if ack {
            status::MR_DATA_ACK
        } else {
            status::MR_DATA_NACK
        });
    }

    fn phase_complete(&self) -> bool {
        if !self.pending {
            return false;
        }
        let left = self.countdown.get();
        if left > 0 {
            self.countdown.set(left - 1);
            false
        } else {
            true
        }
    }

    fn status(&self) -> u8 {
        // The prescaler shares the register with the status code.
        self.code | self.prescaler.bits()
    }

    fn data(&self) -> u8 {
        self.data
    }
}

// ****************************************************************************
//
// SD card
//
// ****************************************************************************

/// CSD of a 256 MiB standard capacity card.
pub const CSD_V1: [u8; 16] = hex!("00 26 00 32 5F 59 80 FF C0 38 00 00 00 00 00 00");
pub const CSD_V1_BYTES: u64 = 512 * 512 * 1024;

/// CSD of a high capacity card with C_SIZE 0x3B37.
pub const CSD_V2: [u8; 16] = hex!("40 0E 00 32 5B 59 00 00 3B 37 7F 80 0A 40 00 8B");
pub const CSD_V2_BYTES: u64 = 15_160 * 512 * 1024;

/// CSD with the largest C_SIZE a high capacity card can report: 2 TiB.
pub const CSD_V2_MAX: [u8; 16] = hex!("40 0E 00 32 5B 59 00 3F FF FF 7F 80 0A 40 00 8B");
pub const CSD_V2_MAX_BYTES: u64 = 1 << 41;

#[derive(Debug)]
enum Rx {
    Command,
    WriteToken(u32),
    WriteData(u32, Vec<u8>),
}

/// A card speaking the SPI-mode command protocol, byte by byte.
pub struct SimCard {
    /// Answers CMD8.
    pub v2: bool,
    /// Sets CCS in the OCR and takes block numbers as addresses.
    pub high_capacity: bool,
    pub csd: [u8; 16],
    pub blocks: HashMap<u32, Vec<u8>>,
    pub block_len: usize,
    /// Initialization polls that still report idle.
    pub idle_polls: u32,
    /// Replaces the CMD8 echo.
    pub echo_override: Option<u32>,
    /// Sent after each written block.
    pub data_response: u8,
    /// Sent instead of the data start token on reads.
    pub read_error_token: Option<u8>,
    /// Busy bytes after a written block.
    pub busy_bytes: usize,
    /// Never answers anything.
    pub absent: bool,
    /// Replaces the R1 answer to CMD8.
    pub cmd8_r1: Option<u8>,
    /// Holds the line low for good once a block has been sent or received.
    pub stuck_busy: bool,
    /// Answers reads without ever sending the data start token.
    pub withhold_data_token: bool,
    pub selected: bool,
    pub select_calls: usize,
    pub deselect_calls: usize,
    pub transfers: usize,
    pub commands: Vec<(u8, u32)>,
    pub config: Option<SpiConfig>,
    pub speed: Option<SpiSpeed>,
    pub crc_disabled: bool,
    out: VecDeque<u8>,
    fill: u8,
    frame: Vec<u8>,
    rx: Rx,
    in_idle: bool,
    app_cmd: bool,
    received: Option<u8>,
}

impl SimCard {
    pub fn new_v1() -> Self {
        SimCard {
            v2: false,
            high_capacity: false,
            csd: CSD_V1,
            blocks: HashMap::new(),
            block_len: 512,
            idle_polls: 3,
            echo_override: None,
            data_response: 0xE5,
            read_error_token: None,
            busy_bytes: 3,
            absent: false,
            cmd8_r1: None,
            stuck_busy: false,
            withhold_data_token: false,
            selected: false,
            select_calls: 0,
            deselect_calls: 0,
            transfers: 0,
            commands: Vec::new(),
            config: None,
            speed: None,
            crc_disabled: false,
            out: VecDeque::new(),
            fill: 0xFF,
            frame: Vec::new(),
            rx: Rx::Command,
            in_idle: false,
            app_cmd: false,
            received: None,
        }
    }

    pub fn new_v2() -> Self {
        SimCard {
            v2: true,
            high_capacity: true,
            csd: CSD_V2,
            ..SimCard::new_v1()
        }
    }

    pub fn command_indices(&self) -> Vec<u8> {
        self.commands.iter().map(|(c, _)| *c).collect()
    }

    fn r1(&self, flags: u8) -> u8 {
        flags | if self.in_idle { 0x01 } else { 0x00 }
    }

    fn reply(&mut self, bytes: &[u8]) {
        // One byte of command response latency.
        self.out.push_back(0xFF);
        self.out.extend(bytes.iter().copied());
    }

    fn block_index(&self, arg: u32) -> u32 {
        if self.high_capacity {
            arg
        } else {
            arg / self.block_len as u32
        }
    }

    fn leave_idle(&mut self) -> u8 {
        if self.idle_polls > 0 {
            self.idle_polls -= 1;
        } else {
            self.in_idle = false;
        }
        self.r1(0)
    }

    fn command(&mut self, frame: [u8; 6]) {
        let index = frame[0] & 0x3F;
        let arg = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]);
        self.commands.push((index, arg));
        if self.absent {
            return;
        }
        let app_cmd = std::mem::replace(&mut self.app_cmd, false);
        match index {
            0 => {
                if frame[5] != 0x95 {
                    let r1 = self.r1(0x08);
                    self.reply(&[r1]);
                } else {
                    self.in_idle = true;
                    self.reply(&[0x01]);
                }
            }
            1 => {
                let r1 = self.leave_idle();
                self.reply(&[r1]);
            }
            8 if self.cmd8_r1.is_some() => {
                let r1 = self.cmd8_r1.unwrap_or(0x01);
                self.reply(&[r1]);
            }
            8 if self.v2 => {
                let echo = self.echo_override.unwrap_or(arg & 0xFFF).to_be_bytes();
                let r1 = self.r1(0);
                self.reply(&[r1, echo[0], echo[1], echo[2], echo[3]]);
            }
            9 => {
                let r1 = self.r1(0);
                let mut bytes = vec![r1, 0xFF, 0xFE];
                bytes.extend_from_slice(&self.csd);
                bytes.extend_from_slice(&[0x00, 0x00]);
                self.reply(&bytes);
            }
            16 => {
                let r1 = if arg == 0 || arg > 512 {
                    self.r1(0x40)
                } else {
                    self.block_len = arg as usize;
                    self.r1(0)
                };
                self.reply(&[r1]);
            }
            17 => {
                let idx = self.block_index(arg);
                let mut bytes = vec![self.r1(0), 0xFF];
                match self.read_error_token {
                    _ if self.withhold_data_token => {}
                    Some(token) => bytes.push(token),
                    None => {
                        bytes.push(0xFE);
                        let block_len = self.block_len;
                        let data = self
                            .blocks
                            .get(&idx)
                            .cloned()
                            .unwrap_or_else(|| vec![0; block_len]);
                        bytes.extend_from_slice(&data);
                        bytes.extend_from_slice(&[0x00, 0x00]);
                        if self.stuck_busy {
                            self.fill = 0x00;
                        }
                    }
                }
                self.reply(&bytes);
            }
            24 => {
                let idx = self.block_index(arg);
                let r1 = self.r1(0);
                self.reply(&[r1]);
                self.rx = Rx::WriteToken(idx);
            }
            41 if app_cmd => {
                let r1 = self.leave_idle();
                self.reply(&[r1]);
            }
            55 => {
                self.app_cmd = true;
                let r1 = self.r1(0);
                self.reply(&[r1]);
            }
            58 => {
                let mut ocr = 0x80FF_8000u32;
                if self.high_capacity {
                    ocr |= 0x4000_0000;
                }
                let ocr = ocr.to_be_bytes();
                let r1 = self.r1(0);
                self.reply(&[r1, ocr[0], ocr[1], ocr[2], ocr[3]]);
            }
            59 => {
                self.crc_disabled = arg & 0x01 == 0;
                let r1 = self.r1(0);
                self.reply(&[r1]);
            }
            _ => {
                let r1 = self.r1(0x04);
                self.reply(&[r1]);
            }
        }
    }

    fn clock(&mut self, byte: u8) {
        match std::mem::replace(&mut self.rx, Rx::Command) {
            Rx::Command => {
                if self.frame.is_empty() && byte & 0xC0 != 0x40 {
                    return;
                }
                self.frame.push(byte);
                if self.frame.len() == 6 {
                    let mut frame = [0u8; 6];
                    frame.copy_from_slice(&self.frame);
                    self.frame.clear();
                    self.command(frame);
                }
            }
            Rx::WriteToken(idx) => {
                self.rx = if byte == 0xFE {
                    Rx::WriteData(idx, Vec::new())
                } else {
                    Rx::WriteToken(idx)
                };
            }
            Rx::WriteData(idx, mut data) => {
                data.push(byte);
                if data.len() == self.block_len + 2 {
                    data.truncate(self.block_len);
                    if self.data_response & 0x1F == 0x05 {
                        self.blocks.insert(idx, data);
                    }
                    self.out.push_back(self.data_response);
                    for _ in 0..self.busy_bytes {
                        self.out.push_back(0x00);
                    }
                    if self.stuck_busy {
                        self.fill = 0x00;
                    }
                } else {
                    self.rx = Rx::WriteData(idx, data);
                }
            }
        }
    }
}

impl Transceiver for SimCard {
    type Error = ();

    fn configure(&mut self, config: &SpiConfig) -> Result<(), ()> {
        self.config = Some(*config);
        self.speed = Some(config.speed);
        Ok(())
    }

    fn enable(&mut self, _enable: bool) {}

    fn enable_interrupt(&mut self, _enable: bool) {}

    fn select(&mut self) -> Result<(), ()> {
        self.select_calls += 1;
        self.selected = true;
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), ()> {
        self.deselect_calls += 1;
        self.selected = false;
        Ok(())
    }

    fn write(&mut self, byte: u8) -> Result<(), ()> {
        self.transfers += 1;
        if !self.selected {
            self.received = Some(0xFF);
            return Ok(());
        }
        let answer = self.out.pop_front().unwrap_or(self.fill);
        self.clock(byte);
        self.received = Some(answer);
        Ok(())
    }

    fn complete(&mut self) -> bool {
        self.received.is_some()
    }

    fn read(&mut self) -> u8 {
        self.received.take().unwrap_or(0xFF)
    }

    fn set_speed(&mut self, speed: SpiSpeed) -> Result<(), ()> {
        self.speed = Some(speed);
        Ok(())
    }
}
