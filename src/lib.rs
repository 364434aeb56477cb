//! # sensorlog-bus
//!
//! > Bus plumbing for a small sensor datalogger, written in Embedded Rust
//!
//! This crate drives the two buses of a logger board: a two-wire (I2C-style)
//! master that sensor drivers use to read and write device registers, and a
//! serial (SPI-style) link to an SD card used as block storage. It is
//! `#![no_std]` and does not use `alloc`; every buffer has a fixed size.
//!
//! ## Using the crate
//!
//! Sensor registers go through a [`RegisterBus`] built on a [`TwiMaster`],
//! which in turn owns anything implementing [`TwiPeripheral`]. The card is
//! reached through [`SdMmcSpi`] on anything implementing [`Transceiver`];
//! [`HalTransceiver`] adapts an embedded-hal SPI bus and chip select pin.
//!
//! ```rust,ignore
//! let transceiver = sensorlog_bus::HalTransceiver::new(sdmmc_spi, sdmmc_cs);
//! match sensorlog_bus::SdMmcSpi::new(transceiver).acquire() {
//!     Ok(mut card) => {
//!         writeln!(uart, "Card size: {}", card.capacity_bytes()).unwrap();
//!         card.block_write(BlockIdx(0), b"hello", 0).unwrap();
//!     }
//!     Err((e, _card)) => writeln!(uart, "{:?}!", e).unwrap(),
//! };
//!
//! let mut sensors = sensorlog_bus::RegisterBus::new(TwiMaster::new(twi, &TwiConfig::default()));
//! let mut id = [0u8; 1];
//! sensors.read_register(0x68, 0x75, &mut id, Mode::Polling).unwrap();
//! ```
//!
//! ## Features
//!
//! * `defmt-log`: By turning off the default features and enabling the `defmt-log` feature you can
//! configure this crate to log messages over defmt instead.
//! * `refcell-blockdevice`: implements [`BlockDevice`] for `RefCell`s of block
//! devices, so that one card can be shared.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.

#![cfg_attr(not(test), no_std)]
// #![deny(missing_docs)]

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

#[macro_use]
mod structure;

pub mod block_device;
pub mod sdmmc;
pub mod sdmmc_proto;
pub mod spi;
pub mod twi;

pub use crate::block_device::{AddressingMode, BlockCount, BlockDevice, BlockIdx};
pub use crate::sdmmc::Error as SdMmcError;
pub use crate::sdmmc::{AcquireOpts, SdMmcSpi};
pub use crate::spi::{HalTransceiver, Transceiver};
pub use crate::twi::Error as TwiError;
pub use crate::twi::{RegisterBus, TwiConfig, TwiMaster, TwiPeripheral};

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
