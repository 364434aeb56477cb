//! sensorlog-bus - SD/MMC Protocol
//!
//! Command indices, tokens and register layouts for talking to a memory card
//! in SPI mode.

/// GO_IDLE_STATE - init card in spi mode if CS low
pub const CMD0: u8 = 0x00;
/// SEND_OP_COND - start initialization, legacy cards
pub const CMD1: u8 = 0x01;
/// SEND_IF_COND - verify SD Memory Card interface operating condition
pub const CMD8: u8 = 0x08;
/// SEND_CSD - read the Card Specific Data (CSD register)
pub const CMD9: u8 = 0x09;
/// SET_BLOCKLEN - set the transfer block length
pub const CMD16: u8 = 0x10;
/// READ_SINGLE_BLOCK - read a single data block from the card
pub const CMD17: u8 = 0x11;
/// WRITE_BLOCK - write a single data block to the card
pub const CMD24: u8 = 0x18;
/// APP_CMD - escape for application specific command
pub const CMD55: u8 = 0x37;
/// READ_OCR - read the OCR register of a card
pub const CMD58: u8 = 0x3A;
/// CRC_ON_OFF - enable or disable CRC checking
pub const CMD59: u8 = 0x3B;
/// SD_SEND_OP_COND - sends host capacity support information and activates
/// the card's initialization process
pub const ACMD41: u8 = 0x29;

/// Voltage range 2.7-3.6V plus the check pattern, sent with CMD8.
pub const IF_COND_PATTERN: u32 = 0x1AA;
/// Part of the CMD8 answer that has to echo [`IF_COND_PATTERN`].
pub const IF_COND_MASK: u32 = 0xFFF;
/// ACMD41 argument bit: host supports high capacity cards.
pub const ACMD41_HCS: u32 = 0x4000_0000;
/// OCR bit: card uses block addressing.
pub const OCR_CCS: u32 = 0x4000_0000;

/// Clocked out whenever we only want to clock something in.
pub const FILLER: u8 = 0xFF;
/// start data token for read or write single block
pub const DATA_START_BLOCK: u8 = 0xFE;
/// Data tokens with this bit clear are error tokens.
pub const DATA_TOKEN_OK: u8 = 0x80;
/// mask for data response tokens after a write block operation
pub const DATA_RES_MASK: u8 = 0x07;
/// write data accepted token
pub const DATA_RES_ACCEPTED: u8 = 0x05;
/// The card holds the line low while it is busy.
pub const BUSY: u8 = 0x00;

/// Checksum for CMD0, the only one checked before CRC is switched off.
pub const CRC_CMD0: u8 = 0x95;
/// Checksum for CMD8 with [`IF_COND_PATTERN`].
pub const CRC_CMD8: u8 = 0x87;
/// Sent in place of a checksum once the card ignores them.
pub const CRC_PLACEHOLDER: u8 = 0x01;
/// Sent in place of the data block checksum.
pub const DATA_CRC_PLACEHOLDER: u8 = 0x00;

bitflags::bitflags! {
    /// R1 response flags. An empty set is a plain success.
    pub struct R1: u8 {
        const IDLE_STATE = 1 << 0;
        const ERASE_RESET = 1 << 1;
        const ILLEGAL_COMMAND = 1 << 2;
        const COMMAND_CRC_ERROR = 1 << 3;
        const ERASE_SEQUENCE_ERROR = 1 << 4;
        const ADDRESS_ERROR = 1 << 5;
        const PARAMETER_ERROR = 1 << 6;
    }
}

/// Does this command answer with four more bytes after R1?
pub fn has_extended_response(command: u8) -> bool {
    command == CMD8 || command == CMD58
}

/// The checksum byte sent with `command`.
pub fn command_crc(command: u8) -> u8 {
    match command {
        CMD0 => CRC_CMD0,
        CMD8 => CRC_CMD8,
        _ => CRC_PLACEHOLDER,
    }
}

/// Build the six byte frame for `command` with `arg`.
pub fn command_frame(command: u8, arg: u32) -> [u8; 6] {
    let arg = arg.to_be_bytes();
    [
        0x40 | command,
        arg[0],
        arg[1],
        arg[2],
        arg[3],
        command_crc(command),
    ]
}

/// Card Specific Data register, in either layout.
#[derive(Debug, Clone, PartialEq)]
pub enum Csd {
    V1(CsdV1),
    V2(CsdV2),
}

impl Csd {
    /// Byte 0 bit 6 tells the layouts apart.
    pub fn new(data: [u8; 16]) -> Csd {
        if data[0] & 0x40 != 0 {
            Csd::V2(CsdV2 { data })
        } else {
            Csd::V1(CsdV1 { data })
        }
    }

    /// Is the card write protected, for now or for good?
    pub fn write_protected(&self) -> bool {
        match self {
            Csd::V1(contents) => {
                contents.permanent_write_protection() || contents.temporary_write_protection()
            }
            Csd::V2(contents) => {
                contents.permanent_write_protection() || contents.temporary_write_protection()
            }
        }
    }

    /// Capacity in bytes.
    pub fn card_capacity_bytes(&self) -> u64 {
        match self {
            Csd::V1(contents) => contents.card_capacity_bytes(),
            Csd::V2(contents) => contents.card_capacity_bytes(),
        }
    }
}

/// Version 1 (standard capacity) CSD.
#[derive(Debug, Clone, PartialEq)]
pub struct CsdV1 {
    pub data: [u8; 16],
}

impl CsdV1 {
    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(device_size, u32, [(6, 0, 2), (7, 0, 8), (8, 6, 2)]);
    define_field!(device_size_multiplier, u8, 9, 3, 3);
    define_field!(permanent_write_protection, bool, 14, 5);
    define_field!(temporary_write_protection, bool, 14, 4);

    /// (C_SIZE + 1) * 2^(C_SIZE_MULT + 2) blocks of 2^READ_BL_LEN bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        let block_len = 1u64 << self.read_block_length();
        let mult = 1u64 << (self.device_size_multiplier() + 2);
        let blocks = u64::from(self.device_size()) + 1;
        block_len * mult * blocks
    }
}

/// Version 2 (high capacity) CSD.
#[derive(Debug, Clone, PartialEq)]
pub struct CsdV2 {
    pub data: [u8; 16],
}

impl CsdV2 {
    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(device_size, u32, [(7, 0, 6), (8, 0, 8), (9, 0, 8)]);
    define_field!(permanent_write_protection, bool, 14, 5);
    define_field!(temporary_write_protection, bool, 14, 4);

    /// (C_SIZE + 1) units of 512 KiB
    pub fn card_capacity_bytes(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * 512 * 1024
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn frames() {
        assert_eq!(command_frame(CMD0, 0), hex!("40 00 00 00 00 95"));
        assert_eq!(command_frame(CMD8, IF_COND_PATTERN), hex!("48 00 00 01 AA 87"));
        assert_eq!(command_frame(CMD17, 0x0012_3400), hex!("51 00 12 34 00 01"));
        assert!(has_extended_response(CMD58));
        assert!(!has_extended_response(CMD9));
    }

    #[test]
    fn csd_v1_capacity() {
        // C_SIZE = 0x3FF, C_SIZE_MULT = 7, READ_BL_LEN = 9
        let csd = Csd::new(hex!("00 26 00 32 5F 59 80 FF C0 38 00 00 00 00 00 00"));
        match &csd {
            Csd::V1(v1) => {
                assert_eq!(v1.device_size(), 0x3FF);
                assert_eq!(v1.device_size_multiplier(), 7);
                assert_eq!(v1.read_block_length(), 9);
            }
            Csd::V2(_) => panic!("wrong layout"),
        }
        assert_eq!(csd.card_capacity_bytes(), (1 << 9) * (1 << 9) * 1024);
    }

    #[test]
    fn csd_v1_capacity_small() {
        // C_SIZE = 0xF03 across bytes 6..8, C_SIZE_MULT = 3, READ_BL_LEN = 10
        let csd = Csd::new(hex!("00 2D 00 32 5F 5A 83 C0 C0 18 00 00 00 00 00 00"));
        assert_eq!(csd.card_capacity_bytes(), 1024 * 32 * (0xF03 + 1));
    }

    #[test]
    fn csd_v2_capacity() {
        let csd = Csd::new(hex!("40 0E 00 32 5B 59 00 00 3B 37 7F 80 0A 40 00 8B"));
        match &csd {
            Csd::V2(v2) => assert_eq!(v2.device_size(), 0x3B37),
            Csd::V1(_) => panic!("wrong layout"),
        }
        assert_eq!(csd.card_capacity_bytes(), 15_160 * 512 * 1024);
        assert!(!csd.write_protected());
    }

    #[test]
    fn write_protection_flags() {
        let csd = Csd::new(hex!("40 0E 00 32 5B 59 00 00 3B 37 7F 80 0A 40 10 8B"));
        match &csd {
            Csd::V2(v2) => {
                assert!(v2.temporary_write_protection());
                assert!(!v2.permanent_write_protection());
            }
            Csd::V1(_) => panic!("wrong layout"),
        }
        assert!(csd.write_protected());
        let csd = Csd::new(hex!("00 26 00 32 5F 59 80 FF C0 38 00 00 00 00 20 00"));
        assert!(csd.write_protected());
    }

    #[test]
    fn csd_v2_uses_six_bits_of_byte_7() {
        let csd = Csd::new(hex!("40 0E 00 32 5B 59 00 C1 00 00 7F 80 0A 40 00 8B"));
        assert_eq!(csd.card_capacity_bytes(), (0x01_0000 + 1) * 512 * 1024);
    }
}
