//! H4 byte-stream capture source
//!
//! Adapts any `AsyncRead` carrying a raw H4 stream (UART tap, FIFO,
//! stdin) into the capture service's [`CaptureSource`] seam.

use async_trait::async_trait;
use btsnoop_core::{CaptureSource, CapturedPacket};
use btsnoop_hci::{Direction, H4Deframer};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 4096;

/// Deframes an H4 byte stream into captured packets
///
/// Commands and events carry their direction in the type; ACL and SCO
/// packets on a raw stream do not, so those are stamped with the
/// configured `data_direction`.
pub struct H4StreamSource<R> {
    reader: R,
    deframer: H4Deframer,
    data_direction: Direction,
}

impl<R: AsyncRead + Unpin + Send> H4StreamSource<R> {
    /// Wrap a raw H4 byte stream
    pub fn new(reader: R, data_direction: Direction) -> Self {
        Self {
            reader,
            deframer: H4Deframer::new(),
            data_direction,
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> CaptureSource for H4StreamSource<R> {
    type Error = io::Error;

    async fn next_packet(&mut self) -> Result<Option<CapturedPacket>, Self::Error> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if let Some(packet) = self
                .deframer
                .next_packet()
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            {
                let direction = packet
                    .packet_type
                    .natural_direction()
                    .unwrap_or(self.data_direction);
                return Ok(Some(CapturedPacket {
                    packet_type: packet.packet_type,
                    direction,
                    payload: packet.payload,
                }));
            }

            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                if self.deframer.pending() > 0 {
                    tracing::warn!(
                        bytes = self.deframer.pending(),
                        "Input ended inside an H4 packet; trailing bytes dropped"
                    );
                }
                return Ok(None);
            }
            self.deframer.extend(&chunk[..n]);
        }
    }
}
