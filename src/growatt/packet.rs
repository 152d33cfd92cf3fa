use crate::error::FrameError;

use nom_derive::{Nom, Parse};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;
use std::convert::TryFrom;

pub const HEADER_LEN: usize = 8;
pub const CRC_LEN: usize = 2;

/// Largest frame the header's length field can describe.
pub const MAX_FRAME_LEN: usize = HEADER_LEN + u16::MAX as usize;

/// Payload (header and trailing CRC stripped) of a datalogger acknowledgement.
pub const ACK_PAYLOAD: &[u8] = &[0x47];

/// Frames longer than this carry the extended layout variant.
pub const NORMAL_PACKET_SIZE: usize = 375;

// {{{ ProtocolVersion
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u16)]
pub enum ProtocolVersion {
    V2 = 0x0002,
    V5 = 0x0005,
    V6 = 0x0006,
}

impl ProtocolVersion {
    pub fn has_crc(&self) -> bool {
        matches!(self, Self::V5 | Self::V6)
    }

    /// Low byte of the tag; the only part that appears in layout keys.
    pub fn key_byte(&self) -> u8 {
        (u16::from(*self) & 0xff) as u8
    }
} // }}}

// {{{ MessageType
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u16)]
pub enum MessageType {
    Announcement = 0x0103,
    InverterData = 0x0104,
    Ping = 0x0116,
    SetRegister = 0x0118,
    ReadRegister = 0x0119,
    SmartMeterData = 0x0120,
    Buffered = 0x0150,
}

impl MessageType {
    /// Types that are forwarded but never decoded into records.
    pub fn is_ignored(&self) -> bool {
        use MessageType::*;
        match self {
            Announcement | Ping | ReadRegister | SetRegister => true,
            InverterData | SmartMeterData | Buffered => false,
        }
    }

    /// Types allowed to fall back to the wildcard `NNNN` layout.
    pub fn has_generic_layout(&self) -> bool {
        matches!(self, Self::InverterData | Self::Buffered)
    }

    pub fn is_smart_meter(&self) -> bool {
        *self == Self::SmartMeterData
    }

    /// Lowercase hex of the two tag bytes, as used in layout keys.
    pub fn key_hex(&self) -> String {
        format!("{:04x}", u16::from(*self))
    }
} // }}}

/// The fixed 8-byte frame header, read as-is off the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Nom)]
#[nom(BigEndian)]
pub struct RawHeader {
    pub message_id: u16,
    pub protocol: u16,
    pub length: u16,
    pub message_type: u16,
}

impl RawHeader {
    pub fn read(frame: &[u8]) -> Result<Self, FrameError> {
        match RawHeader::parse(frame) {
            Ok((_, header)) => Ok(header),
            Err(_) => Err(FrameError::ShortFrame { len: frame.len() }),
        }
    }
}

/// Header with its protocol and message type resolved.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    pub message_id: u16,
    pub protocol: ProtocolVersion,
    pub length: u16,
    pub message_type: MessageType,
}

impl TryFrom<RawHeader> for Header {
    type Error = FrameError;

    fn try_from(raw: RawHeader) -> Result<Self, Self::Error> {
        let protocol = ProtocolVersion::try_from(raw.protocol)
            .map_err(|_| FrameError::UnknownProtocol(raw.protocol))?;
        let message_type = MessageType::try_from(raw.message_type)
            .map_err(|_| FrameError::UnknownMessageType(raw.message_type))?;

        Ok(Self {
            message_id: raw.message_id,
            protocol,
            length: raw.length,
            message_type,
        })
    }
}

pub struct Validator;
impl Validator {
    /// Checks declared against actual payload length, then the CRC for
    /// protocol versions that carry one.
    pub fn validate(frame: &[u8]) -> Result<ProtocolVersion, FrameError> {
        let raw = RawHeader::read(frame)?;

        let declared = usize::from(raw.length);
        let actual = frame.len() - HEADER_LEN;
        if declared != actual {
            return Err(FrameError::InvalidPayloadSize { declared, actual });
        }

        let protocol = ProtocolVersion::try_from(raw.protocol)
            .map_err(|_| FrameError::UnknownProtocol(raw.protocol))?;

        if protocol.has_crc() {
            if frame.len() < HEADER_LEN + CRC_LEN {
                return Err(FrameError::ShortFrame { len: frame.len() });
            }

            let (body, crc) = frame.split_at(frame.len() - CRC_LEN);
            let received = u16::from_be_bytes([crc[0], crc[1]]);
            let expected = Self::checksum(body);
            if received != expected {
                return Err(FrameError::InvalidCrc { expected, received });
            }
        }

        Ok(protocol)
    }

    pub fn checksum(data: &[u8]) -> u16 {
        crc16::State::<crc16::MODBUS>::calculate(data)
    }
}

/// Payload bytes between the header and the trailing two CRC bytes.
///
/// Empty for frames too short to hold both.
pub fn payload(frame: &[u8]) -> &[u8] {
    if frame.len() < HEADER_LEN + CRC_LEN {
        return &[];
    }
    &frame[HEADER_LEN..frame.len() - CRC_LEN]
}
