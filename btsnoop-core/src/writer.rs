//! Snoop-file writer
//!
//! Writes BTSNOOP capture files: the 16-byte file header on creation,
//! then one serialized record per captured packet. Writes go through
//! tokio's buffered file handle; callers decide when to flush.

use crate::format::{self, FormatError, SnoopRecord, FILE_HEADER_LEN};
use bytes::BytesMut;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Writer error types
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// Underlying file I/O failed
    #[error("Snoop file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Existing file is not a snoop log we can append to
    #[error("Cannot resume snoop file: {0}")]
    Format(#[from] FormatError),
}

/// Running counters for a writer
#[derive(Debug, Clone, Default, Serialize)]
pub struct WriterStats {
    /// Records appended since the writer was opened
    pub records_written: u64,
    /// Bytes appended, record headers included (excludes the file header)
    pub bytes_written: u64,
}

/// Appends records to a BTSNOOP capture file
pub struct SnoopWriter {
    file: File,
    path: PathBuf,
    stats: WriterStats,
    scratch: BytesMut,
}

impl SnoopWriter {
    /// Create (or truncate) a capture file and write the file header
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, WriterError> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::create(&path).await?;

        let mut header = BytesMut::with_capacity(FILE_HEADER_LEN);
        format::encode_file_header(&mut header);
        file.write_all(&header).await?;

        tracing::info!(path = %path.display(), "Created snoop capture file");
        Ok(Self {
            file,
            path,
            stats: WriterStats::default(),
            scratch: BytesMut::new(),
        })
    }

    /// Open an existing capture file for appending
    ///
    /// The file's header is validated before any record is written, so
    /// a capture can resume a previous log without corrupting a file
    /// that is not a snoop log.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened, is shorter than the
    /// file header, or carries a foreign magic/version/datalink.
    pub async fn open_append(path: impl AsRef<Path>) -> Result<Self, WriterError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&path)
            .await?;

        let mut header = [0u8; FILE_HEADER_LEN];
        file.read_exact(&mut header).await?;
        format::validate_file_header(&header)?;

        tracing::info!(path = %path.display(), "Resuming snoop capture file");
        Ok(Self {
            file,
            path,
            stats: WriterStats::default(),
            scratch: BytesMut::new(),
        })
    }

    /// Append one record
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    pub async fn append(&mut self, record: &SnoopRecord) -> Result<(), WriterError> {
        self.scratch.clear();
        record.encode(&mut self.scratch);
        self.file.write_all(&self.scratch).await?;

        self.stats.records_written += 1;
        self.stats.bytes_written += self.scratch.len() as u64;

        tracing::trace!(
            packet_type = %record.packet_type,
            direction = %record.direction,
            len = record.payload.len(),
            "Appended snoop record"
        );
        Ok(())
    }

    /// Flush buffered writes to the operating system
    ///
    /// # Errors
    ///
    /// Returns error if the flush fails.
    pub async fn flush(&mut self) -> Result<(), WriterError> {
        self.file.flush().await?;
        Ok(())
    }

    /// Flush and fsync the file
    ///
    /// # Errors
    ///
    /// Returns error if the flush or sync fails.
    pub async fn sync_all(&mut self) -> Result<(), WriterError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        Ok(())
    }

    /// Path of the file being written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writer statistics
    pub fn stats(&self) -> WriterStats {
        self.stats.clone()
    }
}
