use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

#[cfg(feature = "log")]
use log::trace;

#[cfg(feature = "defmt-log")]
use defmt::trace;

use super::{SpiConfig, SpiSpeed, Transceiver};

/// The errors a [`HalTransceiver`] can report.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HalError {
    /// The SPI peripheral failed a transfer
    Transport,
    /// Couldn't set the chip select pin
    GpioError,
    /// A byte was written while the transceiver was switched off
    Disabled,
}

/// Binds [`Transceiver`] to an embedded-hal blocking SPI bus and a chip
/// select pin.
///
/// A blocking `Transfer` finishes inside [`Transceiver::write`], so
/// [`Transceiver::complete`] is true as soon as a byte has been written.
/// Clock and mode changes are recorded but have to be applied by whoever
/// built the HAL bus; embedded-hal has no way to reclock a running bus.
/// While switched off with [`Transceiver::enable`], writes fail with
/// [`HalError::Disabled`] and never reach the bus.
pub struct HalTransceiver<SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    spi: SPI,
    cs: CS,
    config: SpiConfig,
    enabled: bool,
    received: Option<u8>,
}

impl<SPI, CS> HalTransceiver<SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    /// Wrap a raw SPI bus and its chip select line.
    pub fn new(spi: SPI, cs: CS) -> Self {
        HalTransceiver {
            spi,
            cs,
            config: SpiConfig::default(),
            enabled: true,
            received: None,
        }
    }

    /// The configuration last requested through the [`Transceiver`] API.
    pub fn config(&self) -> &SpiConfig {
        &self.config
    }

    /// Give back the bus and pin.
    pub fn free(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

impl<SPI, CS> Transceiver for HalTransceiver<SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    type Error = HalError;

    fn configure(&mut self, config: &SpiConfig) -> Result<(), Self::Error> {
        trace!("spi configure: {:?} {:?}", config.mode, config.speed);
        self.config = *config;
        self.received = None;
        self.enabled = true;
        self.deselect()
    }

    fn enable(&mut self, enable: bool) {
        self.enabled = enable;
    }

    fn enable_interrupt(&mut self, enable: bool) {
        self.config.interrupt = enable;
    }

    fn select(&mut self) -> Result<(), Self::Error> {
        self.cs.set_low().map_err(|_| HalError::GpioError)
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        self.cs.set_high().map_err(|_| HalError::GpioError)
    }

    fn write(&mut self, byte: u8) -> Result<(), Self::Error> {
        if !self.enabled {
            return Err(HalError::Disabled);
        }
        let received = self
            .spi
            .transfer(&mut [byte])
            .map(|b| b[0])
            .map_err(|_e| HalError::Transport)?;
        self.received = Some(received);
        Ok(())
    }

    fn complete(&mut self) -> bool {
        self.received.is_some()
    }

    fn read(&mut self) -> u8 {
        self.received.take().unwrap_or(0xFF)
    }

    fn set_speed(&mut self, speed: SpiSpeed) -> Result<(), Self::Error> {
        trace!("spi speed -> {:?}", speed);
        self.config.speed = speed;
        Ok(())
    }
}
