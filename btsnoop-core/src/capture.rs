//! Capture service
//!
//! `CaptureService` is the composition root of a snoop capture: it
//! timestamps each packet, appends it to the log file, and forwards it
//! to the live mirror when one is configured. Packet producers plug in
//! through the [`CaptureSource`] trait.

use crate::format::SnoopRecord;
use crate::mirror::{LiveMirror, MirrorError, MirrorStats};
use crate::writer::{SnoopWriter, WriterError, WriterStats};
use async_trait::async_trait;
use btsnoop_hci::{Direction, PacketType};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{Mutex, RwLock};

/// Capture error types
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// Invalid lifecycle transition
    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        /// Current state
        from: CaptureState,
        /// Attempted state
        to: CaptureState,
    },

    /// Operation requires a running capture
    #[error("Capture is not running")]
    NotRunning,

    /// Snoop file error
    #[error(transparent)]
    Writer(#[from] WriterError),

    /// Live mirror error
    #[error(transparent)]
    Mirror(#[from] MirrorError),

    /// System clock reports a time before the unix epoch
    #[error("System clock error: {0}")]
    Clock(String),

    /// A capture source failed
    #[error("Capture source error: {0}")]
    Source(String),
}

/// Capture lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureState {
    /// Created but not started
    Idle,
    /// Logging packets
    Running,
    /// Stopped; file flushed and mirror closed
    Stopped,
}

/// Capture configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Snoop log file path
    pub path: PathBuf,
    /// Live mirror listen port; `None` disables the mirror
    pub mirror_port: Option<u16>,
    /// Resume an existing log instead of truncating
    pub append: bool,
    /// Flush the file after every record
    pub flush_each_record: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            // The filename Android's stack historically used
            path: PathBuf::from("btsnoop_hci.log"),
            mirror_port: None,
            append: false,
            flush_each_record: true,
        }
    }
}

/// One packet handed to the capture pipeline
///
/// Timestamps are assigned by the service when the packet is logged,
/// not by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPacket {
    /// H4 packet type
    pub packet_type: PacketType,
    /// Direction relative to the host
    pub direction: Direction,
    /// Raw HCI packet bytes (header + body, no H4 indicator)
    pub payload: Bytes,
}

/// Pluggable packet producer
///
/// Implement this for whatever feeds the capture: a UART reader, a
/// kernel monitor socket, a replayed file.
#[async_trait]
pub trait CaptureSource: Send {
    /// Source error type
    type Error: std::error::Error + Send + Sync + 'static;

    /// Produce the next packet, or `None` when the source is exhausted
    async fn next_packet(&mut self) -> Result<Option<CapturedPacket>, Self::Error>;
}

/// Combined capture statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureStats {
    /// File writer counters
    pub writer: WriterStats,
    /// Mirror counters, when a mirror is configured
    pub mirror: Option<MirrorStats>,
}

/// Builder for [`CaptureService`]
#[derive(Debug, Default)]
pub struct CaptureServiceBuilder {
    config: CaptureConfig,
}

impl CaptureServiceBuilder {
    /// Set the snoop log path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Enable the live mirror on `port` (0 binds an ephemeral port)
    pub fn mirror_port(mut self, port: u16) -> Self {
        self.config.mirror_port = Some(port);
        self
    }

    /// Resume an existing log instead of truncating
    pub fn append(mut self, append: bool) -> Self {
        self.config.append = append;
        self
    }

    /// Control per-record flushing (on by default)
    pub fn flush_each_record(mut self, flush: bool) -> Self {
        self.config.flush_each_record = flush;
        self
    }

    /// Build the service in the `Idle` state
    pub fn build(self) -> CaptureService {
        CaptureService::new(self.config)
    }
}

/// Timestamps captured packets and fans them out to the snoop file and
/// the live mirror
///
/// # Thread Safety
///
/// All internal state is protected by async locks, allowing safe
/// concurrent access from multiple tasks.
pub struct CaptureService {
    config: CaptureConfig,
    state: Arc<RwLock<CaptureState>>,
    writer: Arc<Mutex<Option<SnoopWriter>>>,
    mirror: Arc<RwLock<Option<LiveMirror>>>,
    final_writer_stats: Arc<RwLock<WriterStats>>,
}

impl CaptureService {
    /// Create a service from a config, in the `Idle` state
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(CaptureState::Idle)),
            writer: Arc::new(Mutex::new(None)),
            mirror: Arc::new(RwLock::new(None)),
            final_writer_stats: Arc::new(RwLock::new(WriterStats::default())),
        }
    }

    /// Start building a service
    pub fn builder() -> CaptureServiceBuilder {
        CaptureServiceBuilder::default()
    }

    /// The service configuration
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Current lifecycle state
    pub async fn state(&self) -> CaptureState {
        *self.state.read().await
    }

    /// Whether the capture is running
    pub async fn is_running(&self) -> bool {
        *self.state.read().await == CaptureState::Running
    }

    async fn set_state(&self, new_state: CaptureState) -> Result<(), CaptureError> {
        let mut state = self.state.write().await;
        let current = *state;

        let valid = matches!(
            (current, new_state),
            (CaptureState::Idle, CaptureState::Running)
                | (CaptureState::Running, CaptureState::Stopped)
                | (CaptureState::Stopped, CaptureState::Running)
        );
        if !valid {
            return Err(CaptureError::InvalidStateTransition {
                from: current,
                to: new_state,
            });
        }

        *state = new_state;
        Ok(())
    }

    /// Open the log file, bind the mirror, and start logging
    ///
    /// # Errors
    ///
    /// Returns error if already running, the file cannot be opened, or
    /// the mirror port cannot be bound. On failure the service returns
    /// to its previous startable state.
    pub async fn start(&self) -> Result<(), CaptureError> {
        let previous = self.state().await;
        self.set_state(CaptureState::Running).await?;

        if let Err(e) = self.open_resources().await {
            *self.state.write().await = previous;
            return Err(e);
        }

        tracing::info!(
            path = %self.config.path.display(),
            mirror = ?self.config.mirror_port,
            "Capture started"
        );
        Ok(())
    }

    async fn open_resources(&self) -> Result<(), CaptureError> {
        let resume = self.config.append
            && tokio::fs::try_exists(&self.config.path)
                .await
                .unwrap_or(false);
        let writer = if resume {
            SnoopWriter::open_append(&self.config.path).await?
        } else {
            SnoopWriter::create(&self.config.path).await?
        };
        *self.writer.lock().await = Some(writer);

        if let Some(port) = self.config.mirror_port {
            let mirror = LiveMirror::bind(port).await?;
            *self.mirror.write().await = Some(mirror);
        }
        Ok(())
    }

    /// Log one packet: stamp it, append it to the file, mirror it
    ///
    /// # Errors
    ///
    /// Returns error if the capture is not running or the file write
    /// fails. Mirror write failures never fail the capture; they only
    /// detach the affected client.
    pub async fn log_packet(
        &self,
        packet_type: PacketType,
        direction: Direction,
        payload: Bytes,
    ) -> Result<(), CaptureError> {
        if !self.is_running().await {
            return Err(CaptureError::NotRunning);
        }

        let timestamp_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| CaptureError::Clock(e.to_string()))?
            .as_micros() as u64;

        let record = SnoopRecord {
            packet_type,
            direction,
            payload,
            timestamp_us,
        };

        {
            let mut writer = self.writer.lock().await;
            let writer = writer.as_mut().ok_or(CaptureError::NotRunning)?;
            writer.append(&record).await?;
            if self.config.flush_each_record {
                writer.flush().await?;
            }
        }

        if let Some(mirror) = self.mirror.read().await.as_ref() {
            mirror.forward(record.packet_type, &record.payload).await;
        }

        Ok(())
    }

    /// Drain a source into the capture until it is exhausted
    ///
    /// Returns the number of packets logged.
    ///
    /// # Errors
    ///
    /// Returns error if the source fails or a packet cannot be logged.
    pub async fn run<S: CaptureSource>(&self, source: &mut S) -> Result<u64, CaptureError> {
        let mut logged = 0u64;
        loop {
            let packet = source
                .next_packet()
                .await
                .map_err(|e| CaptureError::Source(e.to_string()))?;
            match packet {
                Some(packet) => {
                    self.log_packet(packet.packet_type, packet.direction, packet.payload)
                        .await?;
                    logged += 1;
                }
                None => break,
            }
        }
        tracing::info!(packets = logged, "Capture source drained");
        Ok(logged)
    }

    /// Stop the capture: flush and sync the file, close the mirror
    ///
    /// # Errors
    ///
    /// Returns error if not running or the final sync fails.
    pub async fn stop(&self) -> Result<(), CaptureError> {
        self.set_state(CaptureState::Stopped).await?;

        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.sync_all().await?;
            *self.final_writer_stats.write().await = writer.stats();
        }

        if let Some(mirror) = self.mirror.write().await.take() {
            mirror.shutdown().await;
        }

        tracing::info!(path = %self.config.path.display(), "Capture stopped");
        Ok(())
    }

    /// Address of the live mirror, when one is bound
    pub async fn mirror_addr(&self) -> Option<SocketAddr> {
        self.mirror.read().await.as_ref().map(LiveMirror::local_addr)
    }

    /// Number of clients attached to the mirror
    pub async fn mirror_client_count(&self) -> usize {
        match self.mirror.read().await.as_ref() {
            Some(mirror) => mirror.client_count().await,
            None => 0,
        }
    }

    /// Combined capture statistics
    ///
    /// After `stop`, returns the final writer counters.
    pub async fn stats(&self) -> CaptureStats {
        let writer = match self.writer.lock().await.as_ref() {
            Some(writer) => writer.stats(),
            None => self.final_writer_stats.read().await.clone(),
        };
        let mirror = match self.mirror.read().await.as_ref() {
            Some(mirror) => Some(mirror.stats().await),
            None => None,
        };
        CaptureStats { writer, mirror }
    }
}

// Shared across capture and control tasks
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<CaptureService>();
};
