//! btsnoop - Bluetooth HCI snoop capture toolkit
//!
//! This library writes and reads BTSNOOP capture files (the binary HCI
//! log format consumed by `hcidump` and Wireshark) and can mirror the
//! captured packet stream in real time over TCP to attached tools. It
//! provides:
//!
//! - **Bit-exact format codec**: the 16-byte file header and 24-byte
//!   record headers, big-endian throughout, with the snoop-epoch
//!   timestamp convention
//! - **Async file writer/reader**: create or resume capture logs,
//!   iterate records with torn-write detection
//! - **Live TCP mirror**: stream H4-framed packets to any number of
//!   attached clients, detaching each on write failure
//! - **Capture service**: a single entry point that timestamps packets
//!   and fans them out to the log file and the mirror
//!
//! # Examples
//!
//! ```rust,no_run
//! use btsnoop_core::{CaptureConfig, CaptureService};
//! use btsnoop_hci::{Direction, PacketType};
//! use bytes::Bytes;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = CaptureService::builder()
//!     .path("/tmp/btsnoop_hci.log")
//!     .mirror_port(4330)
//!     .build();
//!
//! service.start().await?;
//!
//! // HCI Reset command
//! service
//!     .log_packet(
//!         PacketType::Command,
//!         Direction::HostToController,
//!         Bytes::from_static(&[0x03, 0x0c, 0x00]),
//!     )
//!     .await?;
//!
//! service.stop().await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

/// BTSNOOP binary format: header/record encoding and decoding
pub mod format;

/// Snoop-file writer
pub mod writer;

/// Snoop-file reader
pub mod reader;

/// Real-time TCP packet mirror
pub mod mirror;

/// Capture service tying writer and mirror together
pub mod capture;

// Re-export main types at crate root
pub use capture::{
    CaptureConfig, CaptureError, CaptureService, CaptureServiceBuilder, CaptureSource,
    CaptureState, CaptureStats, CapturedPacket,
};
pub use format::{FormatError, SnoopRecord, DATALINK_H4, EPOCH_DELTA_US, MAGIC, VERSION};
pub use mirror::{LiveMirror, MirrorError, MirrorStats, DEFAULT_MIRROR_PORT};
pub use reader::{ReaderError, SnoopReader};
pub use writer::{SnoopWriter, WriterError, WriterStats};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::capture::{CaptureConfig, CaptureService, CaptureSource, CapturedPacket};
    pub use crate::format::SnoopRecord;
    pub use crate::mirror::LiveMirror;
    pub use crate::reader::SnoopReader;
    pub use crate::writer::SnoopWriter;
    pub use btsnoop_hci::{Direction, PacketType};
}
