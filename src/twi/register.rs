//! Blocking register access for sensor drivers.
//!
//! Sensor drivers talk to their device registers through
//! [`RegisterBus::read_register`] and [`RegisterBus::write_register`], or
//! through the embedded-hal blocking I2C traits, which [`RegisterBus`] also
//! implements.
//!
//! In [`Mode::Polling`] the calling loop advances the automaton itself. In
//! [`Mode::Interrupt`] the phase-complete interrupt does, and the caller only
//! watches the completion status. For that the automaton lives in a
//! blocking mutex that both sides lock for each access:
//!
//! ```rust,ignore
//! // Set up once at start-up, reachable from the handler.
//! let twi: &'static Mutex<CriticalSectionRawMutex, RefCell<TwiMaster<Twi0>>> = ...;
//!
//! // Phase-complete interrupt handler.
//! twi.lock(|m| m.borrow_mut().advance());
//!
//! // Foreground.
//! let mut sensors = RegisterBus::new(twi);
//! sensors.read_register(0x68, 0x75, &mut id, Mode::Interrupt)?;
//! ```
//!
//! With a [`CriticalSectionRawMutex`] the interrupt cannot fire while the
//! foreground holds the automaton. A plain `&RefCell` is only for sharing
//! within one execution context.
//!
//! [`CriticalSectionRawMutex`]: embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::blocking::i2c::{Read, Write, WriteRead};

use super::master::{Outcome, TwiMaster, MAX_PAYLOAD, MAX_TRANSFER};
use super::{Error, TwiPeripheral};

/// Who advances the automaton while a register call waits.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Mode {
    Polling,
    Interrupt,
}

/// Short-lived access to a [`TwiMaster`].
pub trait MasterAccess {
    type Peripheral: TwiPeripheral;

    /// Run `f` with exclusive access to the automaton.
    fn with_master<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut TwiMaster<Self::Peripheral>) -> R;
}

impl<P> MasterAccess for TwiMaster<P>
where
    P: TwiPeripheral,
{
    type Peripheral = P;

    fn with_master<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut TwiMaster<Self::Peripheral>) -> R,
    {
        f(self)
    }
}

impl<P> MasterAccess for &mut TwiMaster<P>
where
    P: TwiPeripheral,
{
    type Peripheral = P;

    fn with_master<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut TwiMaster<Self::Peripheral>) -> R,
    {
        f(&mut **self)
    }
}

impl<P> MasterAccess for &RefCell<TwiMaster<P>>
where
    P: TwiPeripheral,
{
    type Peripheral = P;

    fn with_master<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut TwiMaster<Self::Peripheral>) -> R,
    {
        let mut master = self.borrow_mut();
        f(&mut *master)
    }
}

impl<P, R> MasterAccess for &Mutex<R, RefCell<TwiMaster<P>>>
where
    P: TwiPeripheral,
    R: RawMutex,
{
    type Peripheral = P;

    fn with_master<R2, F>(&mut self, f: F) -> R2
    where
        F: FnOnce(&mut TwiMaster<Self::Peripheral>) -> R2,
    {
        self.lock(|cell| {
            let mut master = cell.borrow_mut();
            f(&mut *master)
        })
    }
}

/// Register reads and writes on top of a [`TwiMaster`].
///
/// `idle` runs between two polls of a waiting call; the default just spins.
pub struct RegisterBus<A, W = fn()>
where
    A: MasterAccess,
    W: FnMut(),
{
    access: A,
    idle: W,
    mode: Mode,
}

impl<A> RegisterBus<A>
where
    A: MasterAccess,
{
    pub fn new(access: A) -> Self {
        RegisterBus {
            access,
            idle: core::hint::spin_loop,
            mode: Mode::Polling,
        }
    }
}

impl<A, W> RegisterBus<A, W>
where
    A: MasterAccess,
    W: FnMut(),
{
    /// Like [`RegisterBus::new`], running `idle` whenever a call has to wait
    /// for the bus, e.g. to sleep until the next interrupt.
    pub fn with_idle(access: A, idle: W) -> Self {
        RegisterBus {
            access,
            idle,
            mode: Mode::Polling,
        }
    }

    /// The mode used by the embedded-hal trait implementations.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn free(self) -> A {
        self.access
    }

    /// Write `data` to consecutive registers starting at `register`.
    ///
    /// At most [`MAX_PAYLOAD`] bytes; anything longer is refused before the
    /// bus is touched.
    pub fn write_register(
        &mut self,
        slave: u8,
        register: u8,
        data: &[u8],
        mode: Mode,
    ) -> Result<(), Error> {
        if data.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLong(data.len()));
        }
        let mut frame = [0u8; MAX_TRANSFER];
        frame[0] = register;
        frame[1..=data.len()].copy_from_slice(data);
        self.write_transaction(slave, &frame[..=data.len()], mode)?;
        self.access.with_master(|m| m.stop());
        Ok(())
    }

    /// Read `buffer.len()` consecutive registers starting at `register`.
    ///
    /// The register address goes out in its own write, followed by a
    /// repeated start for the read.
    pub fn read_register(
        &mut self,
        slave: u8,
        register: u8,
        buffer: &mut [u8],
        mode: Mode,
    ) -> Result<(), Error> {
        if buffer.is_empty() {
            return Err(Error::EmptyTransfer);
        }
        if buffer.len() > MAX_TRANSFER {
            return Err(Error::PayloadTooLong(buffer.len()));
        }
        self.write_transaction(slave, &[register], mode)?;
        self.read_transaction(slave, buffer, mode)?;
        self.access.with_master(|m| m.stop());
        Ok(())
    }

    fn write_transaction(&mut self, slave: u8, bytes: &[u8], mode: Mode) -> Result<(), Error> {
        self.access.with_master(|m| m.start_write(slave, bytes))?;
        self.wait(mode).into_result()
    }

    fn read_transaction(&mut self, slave: u8, buffer: &mut [u8], mode: Mode) -> Result<(), Error> {
        self.access.with_master(|m| m.start_read(slave, buffer.len()))?;
        self.wait(mode).into_result()?;
        self.access.with_master(|m| buffer.copy_from_slice(m.received()));
        Ok(())
    }

    fn wait(&mut self, mode: Mode) -> Outcome {
        loop {
            let outcome = match mode {
                Mode::Polling => self.access.with_master(|m| m.advance()),
                Mode::Interrupt => self.access.with_master(|m| m.completion()),
            };
            if outcome != Outcome::Working {
                return outcome;
            }
            (self.idle)();
        }
    }
}

impl<A, W> Write for RegisterBus<A, W>
where
    A: MasterAccess,
    W: FnMut(),
{
    type Error = Error;

    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), Error> {
        let mode = self.mode;
        self.write_transaction(address, bytes, mode)?;
        self.access.with_master(|m| m.stop());
        Ok(())
    }
}

impl<A, W> Read for RegisterBus<A, W>
where
    A: MasterAccess,
    W: FnMut(),
{
    type Error = Error;

    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Error> {
        let mode = self.mode;
        self.read_transaction(address, buffer, mode)?;
        self.access.with_master(|m| m.stop());
        Ok(())
    }
}

impl<A, W> WriteRead for RegisterBus<A, W>
where
    A: MasterAccess,
    W: FnMut(),
{
    type Error = Error;

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<(), Error> {
        let mode = self.mode;
        self.write_transaction(address, bytes, mode)?;
        self.read_transaction(address, buffer, mode)?;
        self.access.with_master(|m| m.stop());
        Ok(())
    }
}
