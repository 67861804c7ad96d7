//! BTSNOOP binary format
//!
//! The BTSNOOP file format (consumed by `hcidump` and Wireshark) is a
//! 16-byte file header followed by variable-length packet records. All
//! integer fields are big-endian.
//!
//! File header: the ASCII magic `"btsnoop\0"`, version `1` (u32), and
//! datalink type `0x3ea` (u32, HCI UART / H4 wrapped).
//!
//! Each record: `original_length` (u32), `included_length` (u32),
//! `flags` (u32), `drops` (u32), `timestamp` (u64, microseconds since
//! year 0), then `included_length` bytes of packet data - the one-byte
//! H4 type indicator followed by the raw HCI packet.

use btsnoop_hci::{Direction, HciError, PacketType};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// The 8-byte identification pattern at the start of every snoop file
pub const MAGIC: [u8; 8] = *b"btsnoop\0";

/// Format version this crate writes and accepts
pub const VERSION: u32 = 1;

/// Datalink type for H4-wrapped HCI packets
pub const DATALINK_H4: u32 = 0x3ea;

/// Total file header length in bytes
pub const FILE_HEADER_LEN: usize = 16;

/// Fixed record header length in bytes (excluding packet data)
pub const RECORD_HEADER_LEN: usize = 24;

/// Microseconds between the snoop epoch (year 0) and the unix epoch
pub const EPOCH_DELTA_US: u64 = 0x00dc_ddb3_0f2f_8000;

/// Largest `included_length` this crate accepts: H4 indicator byte plus
/// the ACL header and a maximal u16 body
pub const MAX_INCLUDED_LEN: u32 = 1 + 4 + u16::MAX as u32;

/// The exact 16 bytes every file written by this crate starts with
pub const FILE_HEADER: [u8; FILE_HEADER_LEN] = [
    0x62, 0x74, 0x73, 0x6e, 0x6f, 0x6f, 0x70, 0x00, // "btsnoop\0"
    0x00, 0x00, 0x00, 0x01, // version 1
    0x00, 0x00, 0x03, 0xea, // datalink HCI UART (H4)
];

/// Format error types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    /// File does not start with the snoop magic
    #[error("Bad snoop magic: {0:02x?}")]
    BadMagic([u8; 8]),

    /// Header version is not the one this crate supports
    #[error("Unsupported snoop version: {0} (expected {VERSION})")]
    UnsupportedVersion(u32),

    /// Header datalink is not H4-wrapped HCI
    #[error("Unsupported datalink type: {0:#x} (expected {DATALINK_H4:#x})")]
    UnsupportedDatalink(u32),

    /// A record claims zero included bytes; every record carries at
    /// least the H4 indicator byte
    #[error("Record with zero included length")]
    EmptyRecord,

    /// `included_length` exceeds `original_length`
    #[error("Included length {included} exceeds original length {original}")]
    LengthMismatch {
        /// The record's `original_length` field
        original: u32,
        /// The record's `included_length` field
        included: u32,
    },

    /// `included_length` exceeds what any H4 packet can occupy
    #[error("Record of {0} bytes exceeds maximum {MAX_INCLUDED_LEN}")]
    OversizedRecord(u32),

    /// Record timestamp predates the unix epoch
    #[error("Record timestamp {0:#x} predates the unix epoch")]
    TimestampUnderflow(u64),

    /// Packet data does not start with a valid H4 indicator
    #[error(transparent)]
    Hci(#[from] HciError),
}

/// Parsed fixed-size record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Length of the packet as captured
    pub original_length: u32,
    /// Length of the packet data stored in this record
    pub included_length: u32,
    /// Direction/channel flags
    pub flags: u32,
    /// Cumulative dropped-packet count (always 0 in files we write)
    pub drops: u32,
    /// Microseconds since the snoop epoch (year 0)
    pub timestamp: u64,
}

/// One captured HCI packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnoopRecord {
    /// H4 packet type
    pub packet_type: PacketType,
    /// Packet direction relative to the host
    pub direction: Direction,
    /// Raw HCI packet bytes (header + body, no H4 indicator)
    pub payload: Bytes,
    /// Capture time, microseconds since the unix epoch
    pub timestamp_us: u64,
}

impl SnoopRecord {
    /// Length stored in both record length fields: the H4 indicator
    /// byte plus the payload
    pub fn included_length(&self) -> u32 {
        1 + self.payload.len() as u32
    }

    /// The record's flags word
    pub fn flags(&self) -> u32 {
        record_flags(self.packet_type, self.direction)
    }

    /// Serialize this record (header + packet data) into `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        let len = self.included_length();
        buf.reserve(RECORD_HEADER_LEN + len as usize);
        buf.put_u32(len);
        buf.put_u32(len);
        buf.put_u32(self.flags());
        buf.put_u32(0); // drops
        buf.put_u64(unix_us_to_snoop(self.timestamp_us));
        buf.put_u8(self.packet_type.indicator());
        buf.put_slice(&self.payload);
    }

    /// Serialized length of this record, header included
    pub fn encoded_len(&self) -> usize {
        RECORD_HEADER_LEN + self.included_length() as usize
    }
}

/// Compute the flags word for a packet
///
/// Bit 0 is the direction (1 = received from the controller), bit 1 is
/// set for the command/event channel. Commands are always flagged as
/// sent and events as received, yielding CMD=2, EVT=3, and ACL/SCO 0
/// or 1 by direction.
pub fn record_flags(packet_type: PacketType, direction: Direction) -> u32 {
    match packet_type {
        PacketType::Command => 2,
        PacketType::Event => 3,
        PacketType::Acl | PacketType::Sco => {
            if direction.is_received() {
                1
            } else {
                0
            }
        }
    }
}

/// Recover a packet direction from a record's flags word
pub fn direction_from_flags(flags: u32) -> Direction {
    if flags & 0x01 != 0 {
        Direction::ControllerToHost
    } else {
        Direction::HostToController
    }
}

/// Convert unix microseconds to the snoop epoch
pub fn unix_us_to_snoop(unix_us: u64) -> u64 {
    unix_us + EPOCH_DELTA_US
}

/// Convert a snoop-epoch timestamp back to unix microseconds
///
/// # Errors
///
/// Returns [`FormatError::TimestampUnderflow`] for timestamps before
/// the unix epoch.
pub fn snoop_us_to_unix(snoop_us: u64) -> Result<u64, FormatError> {
    snoop_us
        .checked_sub(EPOCH_DELTA_US)
        .ok_or(FormatError::TimestampUnderflow(snoop_us))
}

/// Serialize the file header into `buf`
pub fn encode_file_header(buf: &mut BytesMut) {
    buf.put_slice(&FILE_HEADER);
}

/// Validate a file header read from disk
///
/// # Errors
///
/// Returns an error naming the first mismatching field: magic, version,
/// then datalink.
pub fn validate_file_header(bytes: &[u8; FILE_HEADER_LEN]) -> Result<(), FormatError> {
    let mut magic = [0u8; 8];
    magic.copy_from_slice(&bytes[0..8]);
    if magic != MAGIC {
        return Err(FormatError::BadMagic(magic));
    }

    let version = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    if version != VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let datalink = u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
    if datalink != DATALINK_H4 {
        return Err(FormatError::UnsupportedDatalink(datalink));
    }

    Ok(())
}

/// Parse and sanity-check a fixed-size record header
///
/// # Errors
///
/// Rejects empty, oversized, and inconsistent length fields.
pub fn decode_record_header(bytes: &[u8; RECORD_HEADER_LEN]) -> Result<RecordHeader, FormatError> {
    let be32 = |off: usize| u32::from_be_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]);

    let header = RecordHeader {
        original_length: be32(0),
        included_length: be32(4),
        flags: be32(8),
        drops: be32(12),
        timestamp: u64::from_be_bytes([
            bytes[16], bytes[17], bytes[18], bytes[19], bytes[20], bytes[21], bytes[22], bytes[23],
        ]),
    };

    if header.included_length == 0 {
        return Err(FormatError::EmptyRecord);
    }
    if header.included_length > header.original_length {
        return Err(FormatError::LengthMismatch {
            original: header.original_length,
            included: header.included_length,
        });
    }
    if header.included_length > MAX_INCLUDED_LEN {
        return Err(FormatError::OversizedRecord(header.included_length));
    }

    Ok(header)
}

/// Assemble a [`SnoopRecord`] from a parsed header and its packet data
///
/// `data` must hold exactly `header.included_length` bytes: the H4
/// indicator followed by the HCI packet.
///
/// # Errors
///
/// Rejects unknown H4 indicators and pre-epoch timestamps.
pub fn assemble_record(header: &RecordHeader, mut data: Bytes) -> Result<SnoopRecord, FormatError> {
    debug_assert_eq!(data.len(), header.included_length as usize);
    if data.is_empty() {
        return Err(FormatError::EmptyRecord);
    }

    let packet_type = PacketType::from_indicator(data[0])?;
    let _ = data.split_to(1);

    Ok(SnoopRecord {
        packet_type,
        direction: direction_from_flags(header.flags),
        payload: data,
        timestamp_us: snoop_us_to_unix(header.timestamp)?,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_file_header_literal() {
        // Byte-identical to "btsnoop\0" + version 1 + datalink 0x3ea
        let mut buf = BytesMut::new();
        encode_file_header(&mut buf);
        assert_eq!(
            &buf[..],
            &[
                0x62, 0x74, 0x73, 0x6e, 0x6f, 0x6f, 0x70, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00,
                0x00, 0x03, 0xea
            ]
        );
    }

    #[test]
    fn test_validate_file_header_accepts_own_output() {
        assert!(validate_file_header(&FILE_HEADER).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_magic() {
        let mut bytes = FILE_HEADER;
        bytes[0] = b'x';
        assert!(matches!(
            validate_file_header(&bytes),
            Err(FormatError::BadMagic(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_version() {
        let mut bytes = FILE_HEADER;
        bytes[11] = 2;
        assert_eq!(
            validate_file_header(&bytes),
            Err(FormatError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_validate_rejects_bad_datalink() {
        let mut bytes = FILE_HEADER;
        // 0x3e9: HCI unencapsulated, which we do not write
        bytes[15] = 0xe9;
        assert_eq!(
            validate_file_header(&bytes),
            Err(FormatError::UnsupportedDatalink(0x3e9))
        );
    }

    #[test]
    fn test_flags_mapping() {
        assert_eq!(
            record_flags(PacketType::Command, Direction::HostToController),
            2
        );
        assert_eq!(
            record_flags(PacketType::Event, Direction::ControllerToHost),
            3
        );
        assert_eq!(
            record_flags(PacketType::Acl, Direction::HostToController),
            0
        );
        assert_eq!(
            record_flags(PacketType::Acl, Direction::ControllerToHost),
            1
        );
        assert_eq!(
            record_flags(PacketType::Sco, Direction::HostToController),
            0
        );
        assert_eq!(
            record_flags(PacketType::Sco, Direction::ControllerToHost),
            1
        );
    }

    #[test]
    fn test_direction_from_flags() {
        assert_eq!(direction_from_flags(0), Direction::HostToController);
        assert_eq!(direction_from_flags(1), Direction::ControllerToHost);
        assert_eq!(direction_from_flags(2), Direction::HostToController);
        assert_eq!(direction_from_flags(3), Direction::ControllerToHost);
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let unix_us = 1_400_000_000_123_456u64;
        let snoop = unix_us_to_snoop(unix_us);
        assert_eq!(snoop, unix_us + EPOCH_DELTA_US);
        assert_eq!(snoop_us_to_unix(snoop).unwrap(), unix_us);
    }

    #[test]
    fn test_timestamp_underflow() {
        assert_eq!(
            snoop_us_to_unix(EPOCH_DELTA_US - 1),
            Err(FormatError::TimestampUnderflow(EPOCH_DELTA_US - 1))
        );
    }

    #[test]
    fn test_encode_record_layout() {
        let record = SnoopRecord {
            packet_type: PacketType::Command,
            direction: Direction::HostToController,
            payload: Bytes::from_static(&[0x03, 0x0c, 0x00]),
            timestamp_us: 1,
        };

        let mut buf = BytesMut::new();
        record.encode(&mut buf);
        assert_eq!(buf.len(), record.encoded_len());

        // original_length == included_length == 1 + payload
        assert_eq!(&buf[0..4], &[0, 0, 0, 4]);
        assert_eq!(&buf[4..8], &[0, 0, 0, 4]);
        // flags: command sent
        assert_eq!(&buf[8..12], &[0, 0, 0, 2]);
        // drops always zero
        assert_eq!(&buf[12..16], &[0, 0, 0, 0]);
        // timestamp: snoop epoch + 1us
        assert_eq!(
            u64::from_be_bytes(buf[16..24].try_into().unwrap()),
            EPOCH_DELTA_US + 1
        );
        // H4 indicator then payload
        assert_eq!(&buf[24..], &[0x01, 0x03, 0x0c, 0x00]);
    }

    #[test]
    fn test_record_decode_roundtrip() {
        let record = SnoopRecord {
            packet_type: PacketType::Event,
            direction: Direction::ControllerToHost,
            payload: Bytes::from_static(&[0x0e, 0x04, 0x01, 0x03, 0x0c, 0x00]),
            timestamp_us: 1_400_000_000_000_042,
        };

        let mut buf = BytesMut::new();
        record.encode(&mut buf);
        let buf = buf.freeze();

        let header_bytes: [u8; RECORD_HEADER_LEN] = buf[..RECORD_HEADER_LEN].try_into().unwrap();
        let header = decode_record_header(&header_bytes).unwrap();
        assert_eq!(header.original_length, header.included_length);
        assert_eq!(header.drops, 0);

        let decoded =
            assemble_record(&header, buf.slice(RECORD_HEADER_LEN..)).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_decode_rejects_empty_record() {
        let mut bytes = [0u8; RECORD_HEADER_LEN];
        bytes[3] = 0; // original_length = 0
        assert_eq!(decode_record_header(&bytes), Err(FormatError::EmptyRecord));
    }

    #[test]
    fn test_decode_rejects_included_over_original() {
        let mut bytes = [0u8; RECORD_HEADER_LEN];
        bytes[3] = 1; // original_length = 1
        bytes[7] = 2; // included_length = 2
        assert_eq!(
            decode_record_header(&bytes),
            Err(FormatError::LengthMismatch {
                original: 1,
                included: 2
            })
        );
    }

    #[test]
    fn test_decode_rejects_oversized_record() {
        let mut bytes = [0u8; RECORD_HEADER_LEN];
        let too_big = (MAX_INCLUDED_LEN + 1).to_be_bytes();
        bytes[0..4].copy_from_slice(&too_big);
        bytes[4..8].copy_from_slice(&too_big);
        assert_eq!(
            decode_record_header(&bytes),
            Err(FormatError::OversizedRecord(MAX_INCLUDED_LEN + 1))
        );
    }

    #[test]
    fn test_assemble_rejects_unknown_indicator() {
        let header = RecordHeader {
            original_length: 2,
            included_length: 2,
            flags: 0,
            drops: 0,
            timestamp: EPOCH_DELTA_US,
        };
        let result = assemble_record(&header, Bytes::from_static(&[0x09, 0xaa]));
        assert!(matches!(result, Err(FormatError::Hci(_))));
    }
}
