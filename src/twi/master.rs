//! The master transaction automaton.

use heapless::spsc::Queue;

#[cfg(feature = "log")]
use log::{trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{trace, warn};

use super::status::{self, Status, STATUS_MASK};
use super::{Direction, Error, TwiConfig, TwiPeripheral};

/// Largest register payload, not counting the register address byte.
pub const MAX_PAYLOAD: usize = 16;

/// Largest transaction the automaton can carry.
pub const MAX_TRANSFER: usize = MAX_PAYLOAD + 1;

// The queue keeps one slot free.
const NOTIFY_SLOTS: usize = 5;

/// One state of the transaction automaton. `None` and `Stop` are idle.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    None,
    Start,
    AddressRead,
    AddressWrite,
    ReadAck,
    ReadNack,
    Write,
    Stop,
}

impl Step {
    pub fn is_idle(self) -> bool {
        matches!(self, Step::None | Step::Stop)
    }
}

/// How a transaction is going, or how it ended.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Outcome {
    Working,
    Success,
    Nack,
    Error,
}

impl Outcome {
    /// Map a terminal outcome onto a `Result`.
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Outcome::Success => Ok(()),
            Outcome::Nack => Err(Error::Nack),
            Outcome::Working | Outcome::Error => Err(Error::Bus),
        }
    }
}

/// The answer the master gives after the byte it is about to receive.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Acknowledge {
    Ack,
    Nack,
}

#[derive(Debug)]
struct Transaction {
    direction: Direction,
    slave: u8,
    buffer: [u8; MAX_TRANSFER],
    len: usize,
    cursor: usize,
}

impl Transaction {
    const fn new() -> Self {
        Transaction {
            direction: Direction::Write,
            slave: 0,
            buffer: [0; MAX_TRANSFER],
            len: 0,
            cursor: 0,
        }
    }
}

/// Owns a two-wire peripheral and the one transaction that may be in
/// flight on it.
///
/// Transactions are started with [`TwiMaster::start_write`] or
/// [`TwiMaster::start_read`] and moved along by [`TwiMaster::advance`]. When
/// the automaton is driven from the interrupt handler, the foreground polls
/// [`TwiMaster::completion`] instead, or drains
/// [`TwiMaster::next_notification`] once notifications are switched on.
pub struct TwiMaster<P>
where
    P: TwiPeripheral,
{
    peripheral: P,
    step: Step,
    transaction: Transaction,
    complete: Outcome,
    notify: bool,
    notifications: Queue<Outcome, NOTIFY_SLOTS>,
}

impl<P> TwiMaster<P>
where
    P: TwiPeripheral,
{
    /// Take over `peripheral` and set it up as a bus master.
    pub fn new(peripheral: P, config: &TwiConfig) -> Self {
        let mut master = TwiMaster {
            peripheral,
            step: Step::None,
            transaction: Transaction::new(),
            complete: Outcome::Error,
            notify: false,
            notifications: Queue::new(),
        };
        master.init_master(config);
        master
    }

    /// Configure bus clock and pull-ups, enable the peripheral and reset the
    /// automaton to idle. Also the way out of a wedged bus.
    pub fn init_master(&mut self, config: &TwiConfig) {
        self.peripheral.configure(config.bit_rate, config.prescaler);
        self.peripheral.enable(true);
        self.peripheral.enable_interrupt(config.interrupt);
        self.peripheral.set_pullups(config.pullups);
        self.step = Step::None;
        self.complete = Outcome::Error;
    }

    /// Switch the peripheral off and hand it back.
    pub fn release(mut self) -> P {
        self.peripheral.enable_interrupt(false);
        self.peripheral.enable(false);
        self.peripheral
    }

    pub fn peripheral(&self) -> &P {
        &self.peripheral
    }

    pub fn peripheral_mut(&mut self) -> &mut P {
        &mut self.peripheral
    }

    /// Current automaton step.
    pub fn step(&self) -> Step {
        self.step
    }

    /// Bytes moved so far in the current transaction.
    pub fn cursor(&self) -> usize {
        self.transaction.cursor
    }

    /// How the last transaction ended, or `Working` while one is in flight.
    /// `Error` before the first transaction.
    pub fn completion(&self) -> Outcome {
        self.complete
    }

    /// The bytes of the last read transaction.
    pub fn received(&self) -> &[u8] {
        &self.transaction.buffer[..self.transaction.len]
    }

    /// Queue every terminal outcome for [`TwiMaster::next_notification`].
    pub fn set_notifications(&mut self, enable: bool) {
        self.notify = enable;
        if !enable {
            while self.notifications.dequeue().is_some() {}
        }
    }

    /// Oldest queued outcome, if any.
    pub fn next_notification(&mut self) -> Option<Outcome> {
        self.notifications.dequeue()
    }

    // ------------------------------------------------------------------------
    // Single phases
    // ------------------------------------------------------------------------

    /// Emit a start condition.
    pub fn start(&mut self) {
        self.peripheral.send_start();
        self.step = Step::Start;
    }

    /// Send the 7-bit `slave` address with the direction bit.
    pub fn address(&mut self, slave: u8, direction: Direction) {
        self.peripheral.transmit(direction.address_byte(slave));
        self.step = match direction {
            Direction::Write => Step::AddressWrite,
            Direction::Read => Step::AddressRead,
        };
    }

    /// Send one data byte.
    pub fn write(&mut self, byte: u8) {
        self.peripheral.transmit(byte);
        self.step = Step::Write;
    }

    /// Receive one byte, answering it with `ack`.
    pub fn read_ack(&mut self, ack: Acknowledge) {
        match ack {
            Acknowledge::Ack => {
                self.peripheral.receive(true);
                self.step = Step::ReadAck;
            }
            Acknowledge::Nack => {
                self.peripheral.receive(false);
                self.step = Step::ReadNack;
            }
        }
    }

    /// Emit a stop condition.
    pub fn stop(&mut self) {
        self.peripheral.send_stop();
        self.step = Step::Stop;
    }

    /// Status code of the phase that just finished.
    pub fn raw_status(&self) -> u8 {
        self.peripheral.status() & STATUS_MASK
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Begin writing `bytes` to `slave`.
    pub fn start_write(&mut self, slave: u8, bytes: &[u8]) -> Result<(), Error> {
        self.check_start(bytes.len())?;
        self.transaction.buffer[..bytes.len()].copy_from_slice(bytes);
        self.begin(slave, Direction::Write, bytes.len());
        Ok(())
    }

    /// Begin reading `len` bytes from `slave`. The bytes are available from
    /// [`TwiMaster::received`] once the transaction succeeded.
    pub fn start_read(&mut self, slave: u8, len: usize) -> Result<(), Error> {
        self.check_start(len)?;
        self.begin(slave, Direction::Read, len);
        Ok(())
    }

    fn check_start(&self, len: usize) -> Result<(), Error> {
        if !self.step.is_idle() {
            return Err(Error::Busy);
        }
        if len == 0 {
            return Err(Error::EmptyTransfer);
        }
        if len > MAX_TRANSFER {
            return Err(Error::PayloadTooLong(len));
        }
        Ok(())
    }

    fn begin(&mut self, slave: u8, direction: Direction, len: usize) {
        trace!("twi {:?} {} bytes, slave {:x}", direction, len, slave);
        self.transaction.slave = slave;
        self.transaction.direction = direction;
        self.transaction.len = len;
        self.transaction.cursor = 0;
        self.complete = Outcome::Working;
        self.start();
    }

    /// Check the phase that just finished and issue the next one.
    ///
    /// Safe to call from the phase-complete interrupt. Returns `Working`
    /// while the transaction goes on, the terminal outcome on the call that
    /// ends it, and `Error` without touching anything when no transaction
    /// is in flight.
    pub fn advance(&mut self) -> Outcome {
        if self.step.is_idle() || !self.peripheral.is_enabled() {
            return Outcome::Error;
        }
        if !self.peripheral.phase_complete() {
            return Outcome::Working;
        }

        let code = self.raw_status();
        match self.step {
            Step::Start => match status::started(code) {
                Status::Success => {
                    let (slave, direction) = (self.transaction.slave, self.transaction.direction);
                    self.address(slave, direction);
                    Outcome::Working
                }
                _ => self.fail(code),
            },
            Step::AddressRead => match status::address_ack(code) {
                Status::Ack => {
                    self.transaction.cursor = 0;
                    if self.transaction.len < 2 {
                        self.read_ack(Acknowledge::Nack);
                    } else {
                        self.read_ack(Acknowledge::Ack);
                    }
                    Outcome::Working
                }
                Status::Nack => self.refused(),
                _ => self.fail(code),
            },
            Step::AddressWrite => match status::address_ack(code) {
                Status::Ack => {
                    self.transaction.cursor = 0;
                    let first = self.transaction.buffer[0];
                    self.write(first);
                    Outcome::Working
                }
                Status::Nack => self.refused(),
                _ => self.fail(code),
            },
            Step::ReadAck => match status::read(code) {
                Status::Success => {
                    let cursor = self.transaction.cursor;
                    self.transaction.buffer[cursor] = self.peripheral.data();
                    self.transaction.cursor += 1;
                    if self.transaction.cursor == self.transaction.len - 1 {
                        self.read_ack(Acknowledge::Nack);
                    } else {
                        self.read_ack(Acknowledge::Ack);
                    }
                    Outcome::Working
                }
                _ => self.fail(code),
            },
            Step::ReadNack => match status::read(code) {
                Status::Success => {
                    let cursor = self.transaction.cursor;
                    self.transaction.buffer[cursor] = self.peripheral.data();
                    self.step = Step::None;
                    self.finish(Outcome::Success)
                }
                _ => self.fail(code),
            },
            Step::Write => match status::write_ack(code) {
                Status::Ack => {
                    self.transaction.cursor += 1;
                    if self.transaction.cursor == self.transaction.len {
                        self.step = Step::None;
                        self.finish(Outcome::Success)
                    } else {
                        let next = self.transaction.buffer[self.transaction.cursor];
                        self.write(next);
                        Outcome::Working
                    }
                }
                Status::Nack => self.refused(),
                _ => self.fail(code),
            },
            Step::None | Step::Stop => self.fail(code),
        }
    }

    /// The slave said no: release the bus.
    fn refused(&mut self) -> Outcome {
        self.stop();
        self.finish(Outcome::Nack)
    }

    fn fail(&mut self, code: u8) -> Outcome {
        warn!("twi {:?} failed with status {:x}", self.step, code);
        self.step = Step::None;
        self.finish(Outcome::Error)
    }

    fn finish(&mut self, outcome: Outcome) -> Outcome {
        trace!("twi done: {:?}", outcome);
        self.complete = outcome;
        if self.notify && self.notifications.enqueue(outcome).is_err() {
            warn!("twi notification queue full, dropping {:?}", outcome);
        }
        outcome
    }
}
