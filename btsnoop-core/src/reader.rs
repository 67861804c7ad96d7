//! Snoop-file reader
//!
//! Validating reader for BTSNOOP capture files. The header is checked
//! on open; records are then iterated one at a time. A file that ends
//! exactly on a record boundary is a clean EOF; a file that ends inside
//! a record surfaces as [`ReaderError::TruncatedRecord`] so callers can
//! tell a torn write from end-of-log.

use crate::format::{self, FormatError, SnoopRecord, FILE_HEADER_LEN, RECORD_HEADER_LEN};
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};

/// Reader error types
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    /// Underlying file I/O failed
    #[error("Snoop file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Header or record contents are malformed
    #[error("Malformed snoop file: {0}")]
    Format(#[from] FormatError),

    /// The file ends inside a record (torn final write)
    #[error("Truncated record {index}: got {actual} of {expected} bytes")]
    TruncatedRecord {
        /// Zero-based index of the torn record
        index: u64,
        /// Bytes the record should have occupied
        expected: usize,
        /// Bytes actually present
        actual: usize,
    },
}

/// Iterates records of a BTSNOOP capture file
pub struct SnoopReader {
    file: BufReader<File>,
    path: PathBuf,
    records_read: u64,
}

impl SnoopReader {
    /// Open a capture file and validate its header
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened, is shorter than the
    /// file header, or the header is not a version-1 H4 snoop header.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ReaderError> {
        let path = path.as_ref().to_path_buf();
        let mut file = BufReader::new(File::open(&path).await?);

        let mut header = [0u8; FILE_HEADER_LEN];
        file.read_exact(&mut header).await?;
        format::validate_file_header(&header)?;

        Ok(Self {
            file,
            path,
            records_read: 0,
        })
    }

    /// Read the next record
    ///
    /// Returns `Ok(None)` at a clean end of file.
    ///
    /// # Errors
    ///
    /// Returns [`ReaderError::TruncatedRecord`] if the file ends inside
    /// a record, or a format error for malformed contents.
    pub async fn next_record(&mut self) -> Result<Option<SnoopRecord>, ReaderError> {
        let mut header_bytes = [0u8; RECORD_HEADER_LEN];
        let filled = self.read_up_to(&mut header_bytes).await?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < RECORD_HEADER_LEN {
            return Err(ReaderError::TruncatedRecord {
                index: self.records_read,
                expected: RECORD_HEADER_LEN,
                actual: filled,
            });
        }

        let header = format::decode_record_header(&header_bytes)?;
        let expected = header.included_length as usize;
        let mut data = vec![0u8; expected];
        let filled = self.read_up_to(&mut data).await?;
        if filled < expected {
            return Err(ReaderError::TruncatedRecord {
                index: self.records_read,
                expected: RECORD_HEADER_LEN + expected,
                actual: RECORD_HEADER_LEN + filled,
            });
        }

        let record = format::assemble_record(&header, Bytes::from(data))?;
        self.records_read += 1;
        Ok(Some(record))
    }

    /// Read every remaining record
    ///
    /// # Errors
    ///
    /// Same failure modes as [`next_record`](Self::next_record).
    pub async fn read_all(&mut self) -> Result<Vec<SnoopRecord>, ReaderError> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Path of the file being read
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records returned so far
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    // Fill `buf` as far as the file allows; a short count means EOF.
    async fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize, ReaderError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}
