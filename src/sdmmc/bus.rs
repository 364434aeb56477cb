use crate::sdmmc_proto::*;
use crate::spi::{SpiConfig, SpiSpeed, Transceiver};

#[cfg(feature = "log")]
use log::warn;

#[cfg(feature = "defmt-log")]
use defmt::warn;

use super::{Attempts, Error};

/// Command and response handling on top of a [`Transceiver`].
///
/// Remembers the last command issued, so that its extended response can be
/// collected, and the 32-bit payload of that response.
pub(crate) struct CardBus<T>
where
    T: Transceiver,
{
    transceiver: T,
    command: u8,
    returned: u32,
    response_retries: u16,
}

impl<T> CardBus<T>
where
    T: Transceiver,
{
    pub fn new(transceiver: T) -> Self {
        CardBus {
            transceiver,
            command: 0,
            returned: 0,
            response_retries: 100,
        }
    }

    pub fn into_inner(self) -> T {
        self.transceiver
    }

    pub fn set_response_retries(&mut self, retries: u16) {
        self.response_retries = retries;
    }

    pub fn configure(&mut self, config: &SpiConfig) -> Result<(), Error> {
        self.transceiver
            .configure(config)
            .map_err(|_e| Error::Transport)
    }

    pub fn set_speed(&mut self, speed: SpiSpeed) -> Result<(), Error> {
        self.transceiver
            .set_speed(speed)
            .map_err(|_e| Error::Transport)
    }

    pub fn select(&mut self) -> Result<(), Error> {
        self.transceiver.select().map_err(|_| Error::GpioError)
    }

    pub fn deselect(&mut self) -> Result<(), Error> {
        self.transceiver.deselect().map_err(|_| Error::GpioError)
    }

    /// Run `f` with chip select asserted.
    ///
    /// Chip select is always deasserted, even if an error occured in `f`.
    pub fn with_chip_select<F, R>(&mut self, f: F) -> Result<R, Error>
    where
        F: FnOnce(&mut Self) -> Result<R, Error>,
    {
        self.select()?;
        let result = f(self);
        let deselected = self.deselect();
        let value = result?;
        deselected?;
        Ok(value)
    }

    /// Send one byte and receive one byte.
    fn transfer(&mut self, out: u8) -> Result<u8, Error> {
        self.transceiver
            .exchange(out)
            .map_err(|_e| Error::Transport)
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    pub fn receive(&mut self) -> Result<u8, Error> {
        self.transfer(FILLER)
    }

    /// Send a byte to the SD card.
    pub fn send(&mut self, out: u8) -> Result<(), Error> {
        let _ = self.transfer(out)?;
        Ok(())
    }

    /// The 32-bit payload of the last CMD8 or CMD58.
    pub fn returned(&self) -> u32 {
        self.returned
    }

    /// Send a command frame, preceded by two padding bytes.
    pub fn issue_command(&mut self, command: u8, arg: u32) -> Result<(), Error> {
        self.command = command;
        self.send(FILLER)?;
        self.send(FILLER)?;
        for b in command_frame(command, arg).iter() {
            self.send(*b)?;
        }
        Ok(())
    }

    /// Wait for the R1 answer to the last command, and collect the
    /// extended payload if it has one.
    ///
    /// The answer is the first byte with bit 7 clear. Anything else, not
    /// just 0xFF, counts as the line still idling.
    pub fn await_response(&mut self) -> Result<R1, Error> {
        let mut response = None;
        for _ in 0..self.response_retries {
            let result = self.receive()?;
            if (result & 0x80) == 0 {
                response = Some(result);
                break;
            }
        }
        let response = match response {
            Some(r) => r,
            None => {
                warn!("no response to CMD{}", self.command);
                return Err(Error::TimeoutCommand(self.command));
            }
        };

        if has_extended_response(self.command) {
            let mut payload = [0u8; 4];
            for b in payload.iter_mut() {
                *b = self.receive()?;
            }
            self.returned = u32::from_be_bytes(payload);
        }

        Ok(R1::from_bits_truncate(response))
    }

    /// Perform a command.
    pub fn card_command(&mut self, command: u8, arg: u32) -> Result<R1, Error> {
        self.issue_command(command, arg)?;
        self.await_response()
    }

    /// Perform an application-specific command.
    pub fn card_acmd(&mut self, command: u8, arg: u32) -> Result<R1, Error> {
        self.card_command(CMD55, 0)?;
        self.card_command(command, arg)
    }

    /// Clock in bytes until one is not [`FILLER`], and return it.
    pub fn wait_token(&mut self, limit: Option<u32>) -> Result<u8, Error> {
        let mut attempts = Attempts::new(limit);
        loop {
            let token = self.receive()?;
            if token != FILLER {
                return Ok(token);
            }
            attempts.next(Error::TimeoutReadBuffer)?;
        }
    }

    /// Clock in bytes for as long as they read `busy`.
    pub fn wait_while(&mut self, busy: u8, limit: Option<u32>) -> Result<(), Error> {
        let mut attempts = Attempts::new(limit);
        while self.receive()? == busy {
            attempts.next(Error::TimeoutWaitNotBusy)?;
        }
        Ok(())
    }

    /// Clock in bytes until the card lets go of the line.
    pub fn wait_not_busy(&mut self, limit: Option<u32>) -> Result<(), Error> {
        let mut attempts = Attempts::new(limit);
        while self.receive()? != FILLER {
            attempts.next(Error::TimeoutWaitNotBusy)?;
        }
        Ok(())
    }
}
