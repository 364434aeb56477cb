//! sensorlog-bus - Serial Transceiver
//!
//! The minimal capability a synchronous serial (SPI-style) peripheral has to
//! offer for the card engine to run on it. The bus is full-duplex: every byte
//! clocked out clocks one byte in, so a [`Transceiver::write`] must always be
//! followed by spinning on [`Transceiver::complete`] before the paired
//! [`Transceiver::read`].

mod hal;
pub use hal::HalTransceiver;

use core::fmt::Debug;

/// Which end of the link drives the clock.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpiRole {
    Master,
    Slave,
}

/// Clock polarity / phase combination.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpiMode {
    /// CPOL = 0, CPHA = 0
    Mode0,
    /// CPOL = 0, CPHA = 1
    Mode1,
    /// CPOL = 1, CPHA = 0
    Mode2,
    /// CPOL = 1, CPHA = 1
    Mode3,
}

/// Serial clock as a divisor of the system clock.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpiSpeed {
    Div2,
    Div4,
    Div8,
    Div16,
    Div32,
    Div64,
    Div128,
}

impl SpiSpeed {
    /// The divisor applied to the system clock.
    pub fn divisor(self) -> u32 {
        match self {
            SpiSpeed::Div2 => 2,
            SpiSpeed::Div4 => 4,
            SpiSpeed::Div8 => 8,
            SpiSpeed::Div16 => 16,
            SpiSpeed::Div32 => 32,
            SpiSpeed::Div64 => 64,
            SpiSpeed::Div128 => 128,
        }
    }

    /// Resulting serial clock in Hz for a given system clock.
    pub fn frequency(self, cpu_hz: u32) -> u32 {
        cpu_hz / self.divisor()
    }

    /// The fastest divisor whose clock does not exceed `max_hz`, falling back
    /// to the slowest one.
    pub fn for_max_frequency(cpu_hz: u32, max_hz: u32) -> SpiSpeed {
        const ALL: [SpiSpeed; 7] = [
            SpiSpeed::Div2,
            SpiSpeed::Div4,
            SpiSpeed::Div8,
            SpiSpeed::Div16,
            SpiSpeed::Div32,
            SpiSpeed::Div64,
            SpiSpeed::Div128,
        ];
        ALL.iter()
            .copied()
            .find(|speed| speed.frequency(cpu_hz) <= max_hz)
            .unwrap_or(SpiSpeed::Div128)
    }
}

/// Which bit of a byte goes on the wire first.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

bitflags::bitflags! {
    /// Input lines that get their internal pull-up enabled.
    pub struct SpiPins: u8 {
        const SS = 0x01;
        const MISO = 0x02;
        const MOSI = 0x04;
        const SCK = 0x08;
    }
}

/// Full transceiver configuration, applied by [`Transceiver::configure`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SpiConfig {
    pub role: SpiRole,
    pub mode: SpiMode,
    pub speed: SpiSpeed,
    pub order: BitOrder,
    /// Only the input lines of the chosen role are affected.
    pub pullups: SpiPins,
    pub interrupt: bool,
}

impl Default for SpiConfig {
    fn default() -> Self {
        SpiConfig {
            role: SpiRole::Master,
            mode: SpiMode::Mode0,
            speed: SpiSpeed::Div128,
            order: BitOrder::MsbFirst,
            pullups: SpiPins::empty(),
            interrupt: false,
        }
    }
}

/// A full-duplex byte exchanger with a chip-select line.
pub trait Transceiver {
    /// The errors the transceiver can report. Must be debug formattable.
    type Error: Debug;

    /// Stop the peripheral, apply `config` and re-enable it.
    fn configure(&mut self, config: &SpiConfig) -> Result<(), Self::Error>;
    /// Turn the peripheral on or off.
    fn enable(&mut self, enable: bool);
    /// Turn the transfer-complete interrupt on or off.
    fn enable_interrupt(&mut self, enable: bool);
    /// Assert chip select.
    fn select(&mut self) -> Result<(), Self::Error>;
    /// Deassert chip select.
    fn deselect(&mut self) -> Result<(), Self::Error>;
    /// Start clocking out one byte. Does not wait.
    fn write(&mut self, byte: u8) -> Result<(), Self::Error>;
    /// Has the last byte finished clocking?
    fn complete(&mut self) -> bool;
    /// The byte clocked in during the last transfer. Only valid once
    /// [`Transceiver::complete`] has returned true.
    fn read(&mut self) -> u8;
    /// Change the serial clock without touching the rest of the setup.
    fn set_speed(&mut self, speed: SpiSpeed) -> Result<(), Self::Error>;

    /// Send one byte and receive one byte, spinning until the transfer ends.
    fn exchange(&mut self, byte: u8) -> Result<u8, Self::Error> {
        self.write(byte)?;
        while !self.complete() {
            core::hint::spin_loop();
        }
        Ok(self.read())
    }
}

impl<T> Transceiver for &mut T
where
    T: Transceiver,
{
    type Error = T::Error;

    fn configure(&mut self, config: &SpiConfig) -> Result<(), Self::Error> {
        (*self).configure(config)
    }

    fn enable(&mut self, enable: bool) {
        (*self).enable(enable)
    }

    fn enable_interrupt(&mut self, enable: bool) {
        (*self).enable_interrupt(enable)
    }

    fn select(&mut self) -> Result<(), Self::Error> {
        (*self).select()
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        (*self).deselect()
    }

    fn write(&mut self, byte: u8) -> Result<(), Self::Error> {
        (*self).write(byte)
    }

    fn complete(&mut self) -> bool {
        (*self).complete()
    }

    fn read(&mut self) -> u8 {
        (*self).read()
    }

    fn set_speed(&mut self, speed: SpiSpeed) -> Result<(), Self::Error> {
        (*self).set_speed(speed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn speed_for_max_frequency() {
        // 16 MHz part, 400 kHz negotiation limit.
        assert_eq!(SpiSpeed::for_max_frequency(16_000_000, 400_000), SpiSpeed::Div64);
        assert_eq!(SpiSpeed::for_max_frequency(8_000_000, 25_000_000), SpiSpeed::Div2);
        assert_eq!(SpiSpeed::for_max_frequency(20_000_000, 1_000), SpiSpeed::Div128);
        assert_eq!(SpiSpeed::Div4.frequency(8_000_000), 2_000_000);
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
