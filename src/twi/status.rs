//! Status codes reported after each bus phase, and their interpretation.
//!
//! Codes are the upper five bits of the status register; the low bits hold
//! the prescaler and are masked off by [`STATUS_MASK`].

pub const STATUS_MASK: u8 = 0xF8;

pub const START: u8 = 0x08;
pub const REP_START: u8 = 0x10;

pub const MT_SLA_ACK: u8 = 0x18;
pub const MT_SLA_NACK: u8 = 0x20;
pub const MT_DATA_ACK: u8 = 0x28;
pub const MT_DATA_NACK: u8 = 0x30;
pub const ARB_LOST: u8 = 0x38;

pub const MR_SLA_ACK: u8 = 0x40;
pub const MR_SLA_NACK: u8 = 0x48;
pub const MR_DATA_ACK: u8 = 0x50;
pub const MR_DATA_NACK: u8 = 0x58;

pub const NO_INFO: u8 = 0xF8;
pub const BUS_ERROR: u8 = 0x00;

/// What a status code means for the phase that just finished.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Success,
    Ack,
    Nack,
    Error,
}

/// After a start or repeated start.
pub fn started(code: u8) -> Status {
    match code {
        START | REP_START => Status::Success,
        _ => Status::Error,
    }
}

/// After sending SLA+R or SLA+W.
pub fn address_ack(code: u8) -> Status {
    match code {
        MT_SLA_ACK | MR_SLA_ACK => Status::Ack,
        MT_SLA_NACK | MR_SLA_NACK => Status::Nack,
        // Mostly lost arbitration.
        _ => Status::Error,
    }
}

/// After the master sent a data byte.
pub fn write_ack(code: u8) -> Status {
    match code {
        MT_DATA_ACK => Status::Ack,
        MT_DATA_NACK => Status::Nack,
        _ => Status::Error,
    }
}

/// After the master received a byte and answered it with ACK or NACK.
pub fn read(code: u8) -> Status {
    match code {
        MR_DATA_ACK | MR_DATA_NACK => Status::Success,
        _ => Status::Error,
    }
}
