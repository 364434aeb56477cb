//! sensorlog-bus - Block Device support
//!
//! The interface the filesystem library uses to reach the storage. A block
//! is streamed one byte at a time, so nothing above this layer has to keep a
//! whole block in RAM.

#[cfg(feature = "refcell-blockdevice")]
mod refcell;

mod block;
pub use block::*;

/// Represents a block device - a device which can read and write blocks (or
/// sectors) of a fixed size.
///
/// A write is `start_block_write`, exactly [`BlockDevice::block_size`] calls
/// to `step_write`, then `stop_write`. Reads work the same way.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;

    /// Bytes per block.
    fn block_size(&self) -> u16;
    /// Total capacity.
    fn capacity_bytes(&self) -> u64;
    /// How the device wants blocks addressed on the wire.
    fn addressing_mode(&self) -> AddressingMode;

    /// Determine how many blocks this device can hold.
    fn num_blocks(&self) -> BlockCount {
        BlockCount::from_capacity(self.capacity_bytes(), self.block_size())
    }

    /// Open block `block_idx` for writing.
    fn start_block_write(&mut self, block_idx: BlockIdx) -> Result<(), Self::Error>;
    /// Write the next byte of the open block.
    fn step_write(&mut self, byte: u8) -> Result<(), Self::Error>;
    /// Close the open block and wait until the device has stored it.
    fn stop_write(&mut self) -> Result<(), Self::Error>;

    /// Open block `block_idx` for reading.
    fn start_block_read(&mut self, block_idx: BlockIdx) -> Result<(), Self::Error>;
    /// Read the next byte of the open block.
    fn step_read(&mut self) -> Result<u8, Self::Error>;
    /// Close the open block.
    fn stop_read(&mut self) -> Result<(), Self::Error>;

    /// Write `data` at `offset` within block `block_idx`. The rest of the
    /// block is written as zeros.
    fn block_write(
        &mut self,
        block_idx: BlockIdx,
        data: &[u8],
        offset: usize,
    ) -> Result<(), Self::Error>;
    /// Fill `data` from `offset` within block `block_idx`.
    fn block_read(
        &mut self,
        block_idx: BlockIdx,
        data: &mut [u8],
        offset: usize,
    ) -> Result<(), Self::Error>;
}

impl<T> BlockDevice for &mut T
where
    T: BlockDevice,
{
    type Error = T::Error;

    fn block_size(&self) -> u16 {
        (**self).block_size()
    }

    fn capacity_bytes(&self) -> u64 {
        (**self).capacity_bytes()
    }

    fn addressing_mode(&self) -> AddressingMode {
        (**self).addressing_mode()
    }

    fn start_block_write(&mut self, block_idx: BlockIdx) -> Result<(), Self::Error> {
        (*self).start_block_write(block_idx)
    }

    fn step_write(&mut self, byte: u8) -> Result<(), Self::Error> {
        (*self).step_write(byte)
    }

    fn stop_write(&mut self) -> Result<(), Self::Error> {
        (*self).stop_write()
    }

    fn start_block_read(&mut self, block_idx: BlockIdx) -> Result<(), Self::Error> {
        (*self).start_block_read(block_idx)
    }

    fn step_read(&mut self) -> Result<u8, Self::Error> {
        (*self).step_read()
    }

    fn stop_read(&mut self) -> Result<(), Self::Error> {
        (*self).stop_read()
    }

    fn block_write(
        &mut self,
        block_idx: BlockIdx,
        data: &[u8],
        offset: usize,
    ) -> Result<(), Self::Error> {
        (*self).block_write(block_idx, data, offset)
    }

    fn block_read(
        &mut self,
        block_idx: BlockIdx,
        data: &mut [u8],
        offset: usize,
    ) -> Result<(), Self::Error> {
        (*self).block_read(block_idx, data, offset)
    }
}
