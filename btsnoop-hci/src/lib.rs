#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(unsafe_code)]

//! H4/HCI packet-level helpers
//!
//! Bluetooth HCI packets travel over the UART transport (H4) framed as a
//! one-byte packet-type indicator followed by the raw HCI packet. Each
//! packet type carries its own fixed header, and the header contains the
//! length of the body that follows:
//!
//! | type    | indicator | header | length field        |
//! |---------|-----------|--------|---------------------|
//! | Command | 0x01      | 3      | u8 at offset 2      |
//! | ACL     | 0x02      | 4      | u16 LE at offset 2  |
//! | SCO     | 0x03      | 3      | u8 at offset 2      |
//! | Event   | 0x04      | 2      | u8 at offset 1      |
//!
//! This crate provides the typed indicator/direction enums, the
//! header-driven length calculation, an incremental [`H4Deframer`] for
//! splitting a raw byte stream into packets, and [`frame`] for producing
//! the wire form again.

pub mod deframe;

pub use deframe::{H4Deframer, H4Packet};

use bytes::{BufMut, Bytes, BytesMut};

/// HCI helper error types
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HciError {
    #[error("Unknown H4 packet-type indicator: {0:#04x}")]
    UnknownIndicator(u8),
    #[error("HCI header too short for {packet_type:?}: {actual} bytes (need {needed})")]
    ShortHeader {
        packet_type: PacketType,
        actual: usize,
        needed: usize,
    },
}

/// HCI helper result type
pub type Result<T> = std::result::Result<T, HciError>;

/// H4 packet-type indicator byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// HCI command (host to controller)
    Command,
    /// ACL data
    Acl,
    /// SCO data
    Sco,
    /// HCI event (controller to host)
    Event,
}

impl PacketType {
    /// The H4 wire indicator byte for this type
    pub fn indicator(self) -> u8 {
        match self {
            Self::Command => 0x01,
            Self::Acl => 0x02,
            Self::Sco => 0x03,
            Self::Event => 0x04,
        }
    }

    /// Parse an H4 indicator byte
    pub fn from_indicator(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Self::Command),
            0x02 => Ok(Self::Acl),
            0x03 => Ok(Self::Sco),
            0x04 => Ok(Self::Event),
            other => Err(HciError::UnknownIndicator(other)),
        }
    }

    /// Fixed HCI header length for this packet type (excluding the
    /// H4 indicator byte)
    pub fn header_len(self) -> usize {
        match self {
            Self::Command => 3,
            Self::Acl => 4,
            Self::Sco => 3,
            Self::Event => 2,
        }
    }

    /// The direction dictated by the type itself, where the protocol
    /// defines one. ACL and SCO flow both ways.
    pub fn natural_direction(self) -> Option<Direction> {
        match self {
            Self::Command => Some(Direction::HostToController),
            Self::Event => Some(Direction::ControllerToHost),
            Self::Acl | Self::Sco => None,
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Command => "CMD",
            Self::Acl => "ACL",
            Self::Sco => "SCO",
            Self::Event => "EVT",
        };
        write!(f, "{name}")
    }
}

/// Direction of an HCI packet relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Sent by the host (commands, outbound data)
    HostToController,
    /// Received from the controller (events, inbound data)
    ControllerToHost,
}

impl Direction {
    /// Whether this is the receive direction
    pub fn is_received(self) -> bool {
        matches!(self, Self::ControllerToHost)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::HostToController => "sent",
            Self::ControllerToHost => "rcvd",
        };
        write!(f, "{name}")
    }
}

/// Read the body length a packet's header announces
///
/// `header` must hold at least [`PacketType::header_len`] bytes for the
/// given type.
///
/// # Errors
///
/// Returns [`HciError::ShortHeader`] if the slice is too short.
pub fn body_len(packet_type: PacketType, header: &[u8]) -> Result<usize> {
    let needed = packet_type.header_len();
    if header.len() < needed {
        return Err(HciError::ShortHeader {
            packet_type,
            actual: header.len(),
            needed,
        });
    }

    let len = match packet_type {
        PacketType::Command => header[2] as usize,
        PacketType::Acl => u16::from_le_bytes([header[2], header[3]]) as usize,
        PacketType::Sco => header[2] as usize,
        PacketType::Event => header[1] as usize,
    };
    Ok(len)
}

/// H4-frame an HCI packet: indicator byte followed by the packet bytes
///
/// This is the wire format the live mirror streams to attached clients.
pub fn frame(packet_type: PacketType, payload: &[u8]) -> Bytes {
    let mut framed = BytesMut::with_capacity(1 + payload.len());
    framed.put_u8(packet_type.indicator());
    framed.put_slice(payload);
    framed.freeze()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_indicator_roundtrip() {
        for pt in [
            PacketType::Command,
            PacketType::Acl,
            PacketType::Sco,
            PacketType::Event,
        ] {
            assert_eq!(PacketType::from_indicator(pt.indicator()).unwrap(), pt);
        }
    }

    #[test]
    fn test_unknown_indicator() {
        assert_eq!(
            PacketType::from_indicator(0x05),
            Err(HciError::UnknownIndicator(0x05))
        );
        assert_eq!(
            PacketType::from_indicator(0x00),
            Err(HciError::UnknownIndicator(0x00))
        );
    }

    #[test]
    fn test_header_lens() {
        assert_eq!(PacketType::Command.header_len(), 3);
        assert_eq!(PacketType::Acl.header_len(), 4);
        assert_eq!(PacketType::Sco.header_len(), 3);
        assert_eq!(PacketType::Event.header_len(), 2);
    }

    #[test]
    fn test_natural_direction() {
        assert_eq!(
            PacketType::Command.natural_direction(),
            Some(Direction::HostToController)
        );
        assert_eq!(
            PacketType::Event.natural_direction(),
            Some(Direction::ControllerToHost)
        );
        assert_eq!(PacketType::Acl.natural_direction(), None);
        assert_eq!(PacketType::Sco.natural_direction(), None);
    }

    #[test]
    fn test_body_len_command() {
        // HCI Reset: opcode 0x0c03, no parameters
        let header = [0x03, 0x0c, 0x00];
        assert_eq!(body_len(PacketType::Command, &header).unwrap(), 0);

        let header = [0x03, 0x0c, 0x0a];
        assert_eq!(body_len(PacketType::Command, &header).unwrap(), 10);
    }

    #[test]
    fn test_body_len_acl_little_endian() {
        let header = [0x01, 0x20, 0x34, 0x12];
        assert_eq!(body_len(PacketType::Acl, &header).unwrap(), 0x1234);
    }

    #[test]
    fn test_body_len_event() {
        // Command Complete, 4 parameter bytes
        let header = [0x0e, 0x04];
        assert_eq!(body_len(PacketType::Event, &header).unwrap(), 4);
    }

    #[test]
    fn test_body_len_short_header() {
        let err = body_len(PacketType::Acl, &[0x01, 0x20]).unwrap_err();
        assert_eq!(
            err,
            HciError::ShortHeader {
                packet_type: PacketType::Acl,
                actual: 2,
                needed: 4,
            }
        );
    }

    #[test]
    fn test_frame() {
        let framed = frame(PacketType::Event, &[0x0e, 0x01, 0x05]);
        assert_eq!(&framed[..], &[0x04, 0x0e, 0x01, 0x05]);
    }

    #[test]
    fn test_frame_empty_payload() {
        let framed = frame(PacketType::Command, &[]);
        assert_eq!(&framed[..], &[0x01]);
    }
}
