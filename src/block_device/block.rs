use core::convert::TryFrom;

/// The linear index of a block on a device.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockIdx(pub u32);

/// A number of blocks.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockCount(pub u32);

impl BlockCount {
    /// Whole blocks of `block_size` bytes in `capacity_bytes`. Devices with
    /// more blocks than a `u32` can count are cut short at `u32::MAX`.
    pub fn from_capacity(capacity_bytes: u64, block_size: u16) -> BlockCount {
        let blocks = capacity_bytes / u64::from(block_size.max(1));
        BlockCount(u32::try_from(blocks).unwrap_or(u32::MAX))
    }

    /// Is `block_idx` inside a device of this many blocks?
    pub fn contains(self, block_idx: BlockIdx) -> bool {
        block_idx.0 < self.0
    }
}

/// How a block number turns into a command argument.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AddressingMode {
    /// Arguments are byte offsets: block number times block size.
    Byte,
    /// Arguments are block numbers.
    Block,
}

impl AddressingMode {
    /// The command argument addressing `block_idx`, if it fits in 32 bits.
    pub fn argument(self, block_idx: BlockIdx, block_size: u16) -> Option<u32> {
        match self {
            AddressingMode::Byte => block_idx.0.checked_mul(u32::from(block_size)),
            AddressingMode::Block => Some(block_idx.0),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn block_count_saturates() {
        assert_eq!(BlockCount::from_capacity(1 << 20, 512), BlockCount(2048));
        assert_eq!(BlockCount::from_capacity(1 << 41, 512), BlockCount(u32::MAX));
        assert_eq!(BlockCount::from_capacity(1000, 0), BlockCount(1000));
        assert!(BlockCount(u32::MAX).contains(BlockIdx(u32::MAX - 1)));
    }

    #[test]
    fn byte_addresses_must_fit() {
        assert_eq!(
            AddressingMode::Byte.argument(BlockIdx(3), 512),
            Some(1536)
        );
        assert_eq!(
            AddressingMode::Byte.argument(BlockIdx(1 << 23), 512),
            None
        );
        assert_eq!(
            AddressingMode::Block.argument(BlockIdx(1 << 23), 512),
            Some(1 << 23)
        );
    }
}
