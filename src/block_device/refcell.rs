use core::cell::RefCell;

use super::{AddressingMode, BlockDevice, BlockIdx};

impl<T> BlockDevice for RefCell<T>
where
    T: BlockDevice,
{
    type Error = T::Error;

    fn block_size(&self) -> u16 {
        self.borrow().block_size()
    }

    fn capacity_bytes(&self) -> u64 {
        self.borrow().capacity_bytes()
    }

    fn addressing_mode(&self) -> AddressingMode {
        self.borrow().addressing_mode()
    }

    fn start_block_write(&mut self, block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.get_mut().start_block_write(block_idx)
    }

    fn step_write(&mut self, byte: u8) -> Result<(), Self::Error> {
        self.get_mut().step_write(byte)
    }

    fn stop_write(&mut self) -> Result<(), Self::Error> {
        self.get_mut().stop_write()
    }

    fn start_block_read(&mut self, block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.get_mut().start_block_read(block_idx)
    }

    fn step_read(&mut self) -> Result<u8, Self::Error> {
        self.get_mut().step_read()
    }

    fn stop_read(&mut self) -> Result<(), Self::Error> {
        self.get_mut().stop_read()
    }

    fn block_write(
        &mut self,
        block_idx: BlockIdx,
        data: &[u8],
        offset: usize,
    ) -> Result<(), Self::Error> {
        self.get_mut().block_write(block_idx, data, offset)
    }

    fn block_read(
        &mut self,
        block_idx: BlockIdx,
        data: &mut [u8],
        offset: usize,
    ) -> Result<(), Self::Error> {
        self.get_mut().block_read(block_idx, data, offset)
    }
}

impl<T> BlockDevice for &RefCell<T>
where
    T: BlockDevice,
{
    type Error = T::Error;

    fn block_size(&self) -> u16 {
        self.borrow().block_size()
    }

    fn capacity_bytes(&self) -> u64 {
        self.borrow().capacity_bytes()
    }

    fn addressing_mode(&self) -> AddressingMode {
        self.borrow().addressing_mode()
    }

    fn start_block_write(&mut self, block_idx: BlockIdx) -> Result<(), Self::Error> {
        let mut underlying = self.borrow_mut();
        underlying.start_block_write(block_idx)
    }

    fn step_write(&mut self, byte: u8) -> Result<(), Self::Error> {
        let mut underlying = self.borrow_mut();
        underlying.step_write(byte)
    }

    fn stop_write(&mut self) -> Result<(), Self::Error> {
        let mut underlying = self.borrow_mut();
        underlying.stop_write()
    }

    fn start_block_read(&mut self, block_idx: BlockIdx) -> Result<(), Self::Error> {
        let mut underlying = self.borrow_mut();
        underlying.start_block_read(block_idx)
    }

    fn step_read(&mut self) -> Result<u8, Self::Error> {
        let mut underlying = self.borrow_mut();
        underlying.step_read()
    }

    fn stop_read(&mut self) -> Result<(), Self::Error> {
        let mut underlying = self.borrow_mut();
        underlying.stop_read()
    }

    fn block_write(
        &mut self,
        block_idx: BlockIdx,
        data: &[u8],
        offset: usize,
    ) -> Result<(), Self::Error> {
        let mut underlying = self.borrow_mut();
        underlying.block_write(block_idx, data, offset)
    }

    fn block_read(
        &mut self,
        block_idx: BlockIdx,
        data: &mut [u8],
        offset: usize,
    ) -> Result<(), Self::Error> {
        let mut underlying = self.borrow_mut();
        underlying.block_read(block_idx, data, offset)
    }
}
