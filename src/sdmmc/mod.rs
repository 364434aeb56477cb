//! sensorlog-bus - SDMMC Protocol
//!
//! Implements the SD/MMC protocol on a [`Transceiver`].
//!
//! This is optimised for a small memory footprint: blocks are streamed
//! through the [`BlockDevice`] primitives one byte at a time and never
//! buffered here.

mod bus;
use bus::CardBus;

use crate::sdmmc_proto::*;
use crate::spi::{BitOrder, SpiConfig, SpiMode, SpiPins, SpiRole, SpiSpeed, Transceiver};
use crate::{AddressingMode, BlockDevice, BlockIdx};

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

/// Filler bytes clocked with chip select deasserted at power-up. Ten bytes
/// give the 74 clock cycles the card needs to enter SPI mode.
const POWER_UP_BYTES: usize = 10;

/// Represents an SD Card interface.
/// Built from a [`Transceiver`], which also owns chip select so that bytes
/// can be clocked out without selecting the card.
pub struct SdMmcSpi<T, State>
where
    T: Transceiver,
{
    bus: CardBus<T>,
    options: AcquireOpts,
    session: CardSession,
    transfer: Transfer,
    state: State,
}

/// The possible errors `SdMmcSpi` can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// We got an error from the SPI peripheral
    Transport,
    /// Couldn't set the chip select line
    GpioError,
    /// We didn't get a response when executing this command
    TimeoutCommand(u8),
    /// We didn't get a response when executing this application-specific command
    TimeoutACommand(u8),
    /// We didn't get a response when waiting for the card to not be busy
    TimeoutWaitNotBusy,
    /// We didn't get a data token when reading from the card
    TimeoutReadBuffer,
    /// The card did not go idle on CMD0
    CardNotFound,
    /// We got a bad response from Command 8
    Cmd8Error(u8),
    /// The card did not echo the CMD8 check pattern
    IfCondMismatch(u32),
    /// The card reported an error while leaving the idle state
    InitError(u8),
    /// We got a bad response from Command 58
    Cmd58Error(u8),
    /// The card refused the block length
    BlockLengthRejected(u8),
    /// We failed to read the Card Specific Data register
    RegisterReadError,
    /// The card sent this error token instead of data
    ReadError(u8),
    /// The card did not accept the data; this was its data response
    WriteError(u8),
    /// The card refused this command with this R1 response
    CommandRejected(u8, u8),
    /// Can't perform this operation with the card in this state
    BadState,
    /// The requested window does not fit in a block
    OutOfBounds,
    /// The block is beyond the end of the card
    AddressOutOfRange,
}

/// The state of an SdMmcSpi if it is not initialized
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct NotInit;

/// The state of an SdMmcSpi if it is initialized
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
pub struct Initialized;

/// Protocol version spoken by the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardVersion {
    /// Rejected CMD8: legacy card.
    V1,
    /// Answered CMD8.
    V2,
}

/// What card initialization found out.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardSession {
    pub version: CardVersion,
    pub addressing: AddressingMode,
    pub block_size: u16,
    pub capacity_bytes: u64,
}

impl CardSession {
    fn new(block_size: u16) -> Self {
        CardSession {
            version: CardVersion::V1,
            addressing: AddressingMode::Byte,
            block_size,
            capacity_bytes: 0,
        }
    }
}

/// Options for acquiring the card.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AcquireOpts {
    /// Block length set with CMD16.
    pub block_size: u16,
    /// Clock used until the card is up. Cards want 400 kHz or less.
    pub negotiation_speed: SpiSpeed,
    /// Clock used once the card is up.
    pub operating_speed: SpiSpeed,
    pub pullups: SpiPins,
    /// Bytes to clock in while waiting for a command response.
    pub response_retries: u16,
    /// How often to ask the card to leave the idle state. `None` asks
    /// forever.
    pub init_attempts: Option<u32>,
    /// Bytes to clock in while waiting on a busy card or a data token.
    /// `None` waits as long as the card says it is busy.
    pub busy_limit: Option<u32>,
    /// Send CRC_ON_OFF(0) so that the card ignores the checksums we never
    /// compute.
    pub disable_crc: bool,
}

impl Default for AcquireOpts {
    fn default() -> Self {
        AcquireOpts {
            block_size: 512,
            negotiation_speed: SpiSpeed::Div128,
            operating_speed: SpiSpeed::Div2,
            pullups: SpiPins::empty(),
            response_retries: 100,
            init_attempts: Some(32_000),
            busy_limit: None,
            disable_crc: true,
        }
    }
}

/// Block transfer in progress, with the number of bytes moved so far.
#[derive(Debug, Copy, Clone, PartialEq)]
enum Transfer {
    Idle,
    Writing(u16),
    Reading(u16),
}

/// Bounded or unbounded retry counter.
pub(crate) struct Attempts(Option<u32>);

impl Attempts {
    pub fn new(limit: Option<u32>) -> Attempts {
        Attempts(limit)
    }

    /// Use up one attempt, failing with `err` when none are left.
    pub fn next(&mut self, err: Error) -> Result<(), Error> {
        match self.0.as_mut() {
            None => Ok(()),
            Some(0) => Err(err),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
        }
    }
}

impl<T, State> SdMmcSpi<T, State>
where
    T: Transceiver,
{
    /// Give back the transceiver.
    pub fn free(self) -> T {
        self.bus.into_inner()
    }
}

impl<T> SdMmcSpi<T, NotInit>
where
    T: Transceiver,
{
    /// Create a new SD/MMC controller on a transceiver.
    pub fn new(transceiver: T) -> Self {
        let options = AcquireOpts::default();
        SdMmcSpi {
            bus: CardBus::new(transceiver),
            session: CardSession::new(options.block_size),
            options,
            transfer: Transfer::Idle,
            state: NotInit {},
        }
    }

    /// Initializes the card into a known state
    pub fn acquire(self) -> Result<SdMmcSpi<T, Initialized>, (Error, Self)> {
        self.acquire_with_opts(Default::default())
    }

    /// Initializes the card into a known state
    ///
    /// Blocks until the card is up, and gives up on the first thing that
    /// goes wrong. Any previous transceiver setup is overwritten.
    pub fn acquire_with_opts(
        mut self,
        options: AcquireOpts,
    ) -> Result<SdMmcSpi<T, Initialized>, (Error, Self)> {
        debug!("acquiring card, block size {}", options.block_size);
        self.options = options;
        self.bus.set_response_retries(options.response_retries);

        match Self::bring_up(&mut self.bus, &options) {
            Ok(session) => Ok(SdMmcSpi {
                bus: self.bus,
                options: self.options,
                session,
                transfer: Transfer::Idle,
                state: Initialized {},
            }),
            Err(e) => Err((e, self)),
        }
    }

    fn bring_up(bus: &mut CardBus<T>, options: &AcquireOpts) -> Result<CardSession, Error> {
        if options.block_size == 0 {
            return Err(Error::BlockLengthRejected(0));
        }

        trace!("Reset card..");
        bus.configure(&SpiConfig {
            role: SpiRole::Master,
            mode: SpiMode::Mode0,
            speed: options.negotiation_speed,
            order: BitOrder::MsbFirst,
            pullups: options.pullups,
            interrupt: false,
        })?;

        // Supply minimum of 74 clock cycles without CS asserted.
        bus.deselect()?;
        for _ in 0..POWER_UP_BYTES {
            bus.receive()?;
        }

        bus.with_chip_select(|bus| Self::negotiate(bus, options))
    }

    fn negotiate(bus: &mut CardBus<T>, options: &AcquireOpts) -> Result<CardSession, Error> {
        trace!("Enter SPI mode..");
        let r1 = bus.card_command(CMD0, 0)?;
        if r1 != R1::IDLE_STATE {
            warn!("CMD0 answered {:x}", r1.bits());
            return Err(Error::CardNotFound);
        }

        if options.disable_crc {
            let r1 = bus.card_command(CMD59, 0)?;
            if r1 != R1::IDLE_STATE {
                warn!("CRC_ON_OFF answered {:x}, carrying on", r1.bits());
            }
        }

        trace!("Check card version..");
        let r1 = bus.card_command(CMD8, IF_COND_PATTERN)?;
        let version = if r1.contains(R1::ILLEGAL_COMMAND) {
            let mut attempts = Attempts::new(options.init_attempts);
            loop {
                let r1 = bus.card_command(CMD1, 0)?;
                if !r1.contains(R1::IDLE_STATE) {
                    Self::check_ready(r1)?;
                    break;
                }
                attempts.next(Error::TimeoutCommand(CMD1))?;
            }
            CardVersion::V1
        } else if r1 == R1::IDLE_STATE {
            let echo = bus.returned();
            if echo & IF_COND_MASK != IF_COND_PATTERN {
                warn!("CMD8 echoed {:x}", echo);
                return Err(Error::IfCondMismatch(echo));
            }
            let mut attempts = Attempts::new(options.init_attempts);
            loop {
                let r1 = bus.card_acmd(ACMD41, ACMD41_HCS)?;
                if !r1.contains(R1::IDLE_STATE) {
                    Self::check_ready(r1)?;
                    break;
                }
                attempts.next(Error::TimeoutACommand(ACMD41))?;
            }
            CardVersion::V2
        } else {
            return Err(Error::Cmd8Error(r1.bits()));
        };
        debug!("Card version: {:?}", version);

        let r1 = bus.card_command(CMD58, 0)?;
        if !r1.is_empty() {
            return Err(Error::Cmd58Error(r1.bits()));
        }
        let addressing = if bus.returned() & OCR_CCS != 0 {
            AddressingMode::Block
        } else {
            AddressingMode::Byte
        };
        debug!("Card addressing: {:?}", addressing);

        bus.set_speed(options.operating_speed)?;

        let r1 = bus.card_command(CMD16, u32::from(options.block_size))?;
        if !r1.is_empty() {
            return Err(Error::BlockLengthRejected(r1.bits()));
        }

        let capacity_bytes = read_csd(bus, options.busy_limit)?.card_capacity_bytes();
        debug!("Card capacity: {} bytes", capacity_bytes);

        Ok(CardSession {
            version,
            addressing,
            block_size: options.block_size,
            capacity_bytes,
        })
    }

    /// After leaving the idle state, anything but a clean R1 is fatal.
    fn check_ready(r1: R1) -> Result<(), Error> {
        if r1.is_empty() {
            Ok(())
        } else {
            warn!("card left idle with {:x}", r1.bits());
            Err(Error::InitError(r1.bits()))
        }
    }
}

/// Read the 'card specific data' register. Chip select must be asserted.
fn read_csd<T>(bus: &mut CardBus<T>, busy_limit: Option<u32>) -> Result<Csd, Error>
where
    T: Transceiver,
{
    if !bus.card_command(CMD9, 0)?.is_empty() {
        return Err(Error::RegisterReadError);
    }
    let token = bus.wait_token(busy_limit)?;
    if token & DATA_TOKEN_OK == 0 {
        return Err(Error::RegisterReadError);
    }
    let mut data = [0u8; 16];
    for b in data.iter_mut() {
        *b = bus.receive()?;
    }
    // CRC
    bus.receive()?;
    bus.receive()?;
    Ok(Csd::new(data))
}

impl<T> SdMmcSpi<T, Initialized>
where
    T: Transceiver,
{
    /// Mark the card as unused.
    /// This should be kept infallible, because Drop is unable to fail.
    /// See https://github.com/rust-lang/rfcs/issues/814
    pub fn deinit(self) -> SdMmcSpi<T, NotInit> {
        SdMmcSpi {
            bus: self.bus,
            options: self.options,
            session: self.session,
            transfer: Transfer::Idle,
            state: NotInit {},
        }
    }

    /// Everything learned while acquiring the card.
    pub fn session(&self) -> &CardSession {
        &self.session
    }

    pub fn version(&self) -> CardVersion {
        self.session.version
    }

    /// Read the 'card specific data' register again.
    pub fn read_csd(&mut self) -> Result<Csd, Error> {
        if self.transfer != Transfer::Idle {
            return Err(Error::BadState);
        }
        let busy_limit = self.options.busy_limit;
        self.bus.with_chip_select(|bus| read_csd(bus, busy_limit))
    }

    /// The command argument for `block_idx`.
    fn card_address(&self, block_idx: BlockIdx) -> Result<u32, Error> {
        if !self.num_blocks().contains(block_idx) {
            return Err(Error::AddressOutOfRange);
        }
        self.session
            .addressing
            .argument(block_idx, self.session.block_size)
            .ok_or(Error::AddressOutOfRange)
    }

    /// Select the card and issue a block command, leaving the card selected
    /// only if it accepted.
    fn start_command(&mut self, command: u8, block_idx: BlockIdx) -> Result<(), Error> {
        if self.transfer != Transfer::Idle {
            return Err(Error::BadState);
        }
        let address = self.card_address(block_idx)?;
        self.bus.select()?;
        let accepted = match self.bus.card_command(command, address) {
            Ok(r1) if r1.is_empty() => Ok(()),
            Ok(r1) => {
                warn!("CMD{} refused with {:x}", command, r1.bits());
                Err(Error::CommandRejected(command, r1.bits()))
            }
            Err(e) => Err(e),
        };
        if accepted.is_err() {
            let _ = self.bus.deselect();
        }
        accepted
    }

    fn finish_write(&mut self, written: u16) -> Result<(), Error> {
        if written < self.session.block_size {
            warn!("short block, padding {} bytes", self.session.block_size - written);
            for _ in written..self.session.block_size {
                self.bus.send(0x00)?;
            }
        }
        self.bus.send(DATA_CRC_PLACEHOLDER)?;
        self.bus.send(DATA_CRC_PLACEHOLDER)?;
        let data_response = self.bus.receive()?;
        self.bus.wait_while(BUSY, self.options.busy_limit)?;
        if (data_response & DATA_RES_MASK) == DATA_RES_ACCEPTED {
            Ok(())
        } else {
            warn!("write rejected: {:x}", data_response);
            Err(Error::WriteError(data_response))
        }
    }

    fn finish_read(&mut self, read: u16) -> Result<(), Error> {
        for _ in read..self.session.block_size {
            self.bus.receive()?;
        }
        // CRC
        self.bus.receive()?;
        self.bus.receive()?;
        self.bus.wait_not_busy(self.options.busy_limit)
    }

    fn window_check(&self, len: usize, offset: usize) -> Result<(), Error> {
        match offset.checked_add(len) {
            Some(end) if end <= usize::from(self.session.block_size) => Ok(()),
            _ => Err(Error::OutOfBounds),
        }
    }
}

impl<T> BlockDevice for SdMmcSpi<T, Initialized>
where
    T: Transceiver,
{
    type Error = Error;

    fn block_size(&self) -> u16 {
        self.session.block_size
    }

    fn capacity_bytes(&self) -> u64 {
        self.session.capacity_bytes
    }

    fn addressing_mode(&self) -> AddressingMode {
        self.session.addressing
    }

    fn start_block_write(&mut self, block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.start_command(CMD24, block_idx)?;
        let started = self
            .bus
            .send(FILLER)
            .and_then(|_| self.bus.send(DATA_START_BLOCK));
        match started {
            Ok(()) => {
                self.transfer = Transfer::Writing(0);
                Ok(())
            }
            Err(e) => {
                let _ = self.bus.deselect();
                Err(e)
            }
        }
    }

    fn step_write(&mut self, byte: u8) -> Result<(), Self::Error> {
        match self.transfer {
            Transfer::Writing(written) if written < self.session.block_size => {
                self.bus.send(byte)?;
                self.transfer = Transfer::Writing(written + 1);
                Ok(())
            }
            _ => Err(Error::BadState),
        }
    }

    fn stop_write(&mut self) -> Result<(), Self::Error> {
        let written = match self.transfer {
            Transfer::Writing(written) => written,
            _ => return Err(Error::BadState),
        };
        self.transfer = Transfer::Idle;
        let result = self.finish_write(written);
        let deselected = self.bus.deselect();
        result?;
        deselected
    }

    fn start_block_read(&mut self, block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.start_command(CMD17, block_idx)?;
        let token = match self.bus.wait_token(self.options.busy_limit) {
            Ok(token) if token & DATA_TOKEN_OK != 0 => token,
            Ok(token) => {
                warn!("read error token {:x}", token);
                let _ = self.bus.deselect();
                return Err(Error::ReadError(token));
            }
            Err(e) => {
                let _ = self.bus.deselect();
                return Err(e);
            }
        };
        trace!("data token {:x}", token);
        self.transfer = Transfer::Reading(0);
        Ok(())
    }

    fn step_read(&mut self) -> Result<u8, Self::Error> {
        match self.transfer {
            Transfer::Reading(read) if read < self.session.block_size => {
                let byte = self.bus.receive()?;
                self.transfer = Transfer::Reading(read + 1);
                Ok(byte)
            }
            _ => Err(Error::BadState),
        }
    }

    fn stop_read(&mut self) -> Result<(), Self::Error> {
        let read = match self.transfer {
            Transfer::Reading(read) => read,
            _ => return Err(Error::BadState),
        };
        self.transfer = Transfer::Idle;
        let result = self.finish_read(read);
        let deselected = self.bus.deselect();
        result?;
        deselected
    }

    fn block_write(
        &mut self,
        block_idx: BlockIdx,
        data: &[u8],
        offset: usize,
    ) -> Result<(), Self::Error> {
        self.window_check(data.len(), offset)?;
        self.start_block_write(block_idx)?;
        let mut streamed = Ok(());
        for i in 0..usize::from(self.session.block_size) {
            let byte = if i >= offset && i - offset < data.len() {
                data[i - offset]
            } else {
                0x00
            };
            streamed = self.step_write(byte);
            if streamed.is_err() {
                break;
            }
        }
        let stopped = self.stop_write();
        streamed?;
        stopped
    }

    fn block_read(
        &mut self,
        block_idx: BlockIdx,
        data: &mut [u8],
        offset: usize,
    ) -> Result<(), Self::Error> {
        self.window_check(data.len(), offset)?;
        self.start_block_read(block_idx)?;
        let mut streamed = Ok(());
        for i in 0..usize::from(self.session.block_size) {
            match self.step_read() {
                Ok(byte) => {
                    if i >= offset && i - offset < data.len() {
                        data[i - offset] = byte;
                    }
                }
                Err(e) => {
                    streamed = Err(e);
                    break;
                }
            }
        }
        let stopped = self.stop_read();
        streamed?;
        stopped
    }
}


// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
