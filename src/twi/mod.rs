//! sensorlog-bus - Two-Wire Master
//!
//! A master-only two-wire (I2C-style) transaction automaton. It is kept very
//! simple: single master, no arbitration beyond noticing it was lost, and
//! any failure gives up on the whole transaction straight away. Retrying is
//! the caller's business.
//!
//! The automaton is advanced one bus phase at a time by
//! [`TwiMaster::advance`], either from a polling loop or from the
//! peripheral's interrupt handler. [`register::RegisterBus`] builds blocking
//! register reads and writes on top of it.

pub mod master;
pub mod register;
pub mod status;

pub use master::{Acknowledge, Outcome, Step, TwiMaster, MAX_PAYLOAD, MAX_TRANSFER};
pub use register::{MasterAccess, Mode, RegisterBus};

/// The possible errors the two-wire layer can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The slave did not acknowledge its address or a data byte
    Nack,
    /// Unexpected bus status, chiefly lost arbitration
    Bus,
    /// More bytes than a register transfer can carry
    PayloadTooLong(usize),
    /// Transactions must move at least one byte
    EmptyTransfer,
    /// A transaction is already in flight on this bus
    Busy,
}

/// Data direction, sent as the R/W bit after the 7-bit address.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    /// The address byte for `slave` in this direction.
    pub fn address_byte(self, slave: u8) -> u8 {
        match self {
            Direction::Write => slave << 1,
            Direction::Read => (slave << 1) | 0x01,
        }
    }
}

/// Bit rate prescaler.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Prescaler {
    Div1,
    Div4,
    Div16,
    Div64,
}

impl Prescaler {
    /// Value of the two prescaler bits in the status register.
    pub fn bits(self) -> u8 {
        match self {
            Prescaler::Div1 => 0,
            Prescaler::Div4 => 1,
            Prescaler::Div16 => 2,
            Prescaler::Div64 => 3,
        }
    }

    pub fn factor(self) -> u32 {
        1 << (2 * self.bits())
    }
}

bitflags::bitflags! {
    /// Bus lines with the internal pull-up enabled.
    pub struct Pullups: u8 {
        const SCL = 0x01;
        const SDA = 0x02;
    }
}

/// Master configuration, applied by [`TwiMaster::init_master`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct TwiConfig {
    /// Bit rate register value (the clock divider).
    pub bit_rate: u8,
    pub prescaler: Prescaler,
    pub pullups: Pullups,
    /// Drive the automaton from the phase-complete interrupt.
    pub interrupt: bool,
}

impl TwiConfig {
    /// Resulting SCL frequency in Hz.
    ///
    /// At 8 MHz, a bit rate of 2 gives 400 kHz and 32 gives 100 kHz.
    pub fn scl_frequency(&self, cpu_hz: u32) -> u32 {
        cpu_hz / (16 + 2 * u32::from(self.bit_rate) * self.prescaler.factor())
    }
}

impl Default for TwiConfig {
    fn default() -> Self {
        TwiConfig {
            bit_rate: 32,
            prescaler: Prescaler::Div1,
            pullups: Pullups::empty(),
            interrupt: false,
        }
    }
}

/// The primitive phases a two-wire peripheral has to offer.
///
/// Every phase-issuing method hands the bus to the hardware and returns at
/// once; [`TwiPeripheral::phase_complete`] turns true when it is done and
/// [`TwiPeripheral::status`] then tells how it went.
pub trait TwiPeripheral {
    /// Apply bit rate and prescaler.
    fn configure(&mut self, bit_rate: u8, prescaler: Prescaler);
    fn enable(&mut self, enable: bool);
    fn is_enabled(&self) -> bool;
    fn enable_interrupt(&mut self, enable: bool);
    fn set_pullups(&mut self, pullups: Pullups);
    /// Emit a (repeated) start condition.
    fn send_start(&mut self);
    /// Emit a stop condition.
    fn send_stop(&mut self);
    /// Clock out an address or data byte.
    fn transmit(&mut self, byte: u8);
    /// Clock in a byte, answering it with ACK when `ack` is set, NACK
    /// otherwise.
    fn receive(&mut self, ack: bool);
    /// Has the hardware finished the last phase?
    fn phase_complete(&self) -> bool;
    /// Raw status register, prescaler bits included.
    fn status(&self) -> u8;
    /// Last byte clocked in.
    fn data(&self) -> u8;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scl_frequency() {
        let mut config = TwiConfig {
            bit_rate: 2,
            ..TwiConfig::default()
        };
        assert_eq!(config.scl_frequency(8_000_000), 400_000);
        config.bit_rate = 32;
        assert_eq!(config.scl_frequency(8_000_000), 100_000);
        config.prescaler = Prescaler::Div4;
        assert_eq!(config.scl_frequency(8_000_000), 8_000_000 / 272);
    }

    #[test]
    fn address_byte() {
        assert_eq!(Direction::Write.address_byte(0x68), 0xD0);
        assert_eq!(Direction::Read.address_byte(0x68), 0xD1);
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
