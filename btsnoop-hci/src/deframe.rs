//! Incremental H4 stream deframer
//!
//! Splits a raw H4 byte stream (as read from a UART, FIFO, or mirror
//! socket) into complete typed packets. Input arrives in arbitrary
//! chunks; the deframer buffers partial packets across calls.

use crate::{body_len, HciError, PacketType, Result};
use bytes::{Buf, Bytes, BytesMut};

/// One complete H4 packet pulled out of the stream
///
/// `payload` is the HCI packet bytes: fixed header plus body, without
/// the H4 indicator byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H4Packet {
    /// The packet type from the indicator byte
    pub packet_type: PacketType,
    /// HCI header + body bytes
    pub payload: Bytes,
}

/// Incremental splitter of a raw H4 byte stream into typed packets
///
/// Feed bytes with [`extend`](Self::extend) and drain complete packets
/// with [`next_packet`](Self::next_packet). An unknown indicator byte is
/// a hard error: the stream is unframeable past that point.
#[derive(Debug, Default)]
pub struct H4Deframer {
    buf: BytesMut,
}

impl H4Deframer {
    /// Create an empty deframer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw stream bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed as complete packets
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next complete packet, if the buffer holds one
    ///
    /// Returns `Ok(None)` when more input is needed.
    ///
    /// # Errors
    ///
    /// Returns [`HciError::UnknownIndicator`] if the byte at a packet
    /// boundary is not a valid H4 type.
    pub fn next_packet(&mut self) -> Result<Option<H4Packet>> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        let packet_type = PacketType::from_indicator(self.buf[0])?;
        let header_len = packet_type.header_len();
        if self.buf.len() < 1 + header_len {
            return Ok(None);
        }

        let body = body_len(packet_type, &self.buf[1..1 + header_len])?;
        let total = 1 + header_len + body;
        if self.buf.len() < total {
            return Ok(None);
        }

        self.buf.advance(1);
        let payload = self.buf.split_to(header_len + body).freeze();
        Ok(Some(H4Packet {
            packet_type,
            payload,
        }))
    }
}
