//! Real-time TCP packet mirror
//!
//! Listens on a TCP port (4330 by default, the port `hcidump`-style
//! tools expect) and streams every captured packet, H4-framed, to each
//! attached client. A client whose socket write fails is detached
//! silently; other clients are unaffected.

use btsnoop_hci::PacketType;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

/// Default listen port for the live mirror
pub const DEFAULT_MIRROR_PORT: u16 = 4330;

/// Mirror error types
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// Listener could not be bound or inspected
    #[error("Mirror I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Running counters for a mirror
#[derive(Debug, Clone, Default, Serialize)]
pub struct MirrorStats {
    /// Clients accepted over the mirror's lifetime
    pub clients_accepted: u64,
    /// Successful per-client frame deliveries
    pub frames_forwarded: u64,
    /// Clients dropped after a write failure
    pub clients_detached: u64,
}

struct MirrorClient {
    peer: SocketAddr,
    stream: TcpStream,
}

/// Fans captured packets out to attached TCP clients
///
/// All internal state is protected by `RwLock`, so the mirror can be
/// shared across async tasks.
pub struct LiveMirror {
    local_addr: SocketAddr,
    clients: Arc<RwLock<Vec<MirrorClient>>>,
    stats: Arc<RwLock<MirrorStats>>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl LiveMirror {
    /// Bind the listener and start accepting clients
    ///
    /// Pass port 0 to bind an ephemeral port; the bound address is
    /// available from [`local_addr`](Self::local_addr).
    ///
    /// # Errors
    ///
    /// Returns error if the port cannot be bound.
    pub async fn bind(port: u16) -> Result<Self, MirrorError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;

        let clients: Arc<RwLock<Vec<MirrorClient>>> = Arc::new(RwLock::new(Vec::new()));
        let stats = Arc::new(RwLock::new(MirrorStats::default()));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let accept_clients = Arc::clone(&clients);
        let accept_stats = Arc::clone(&stats);
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, peer)) => {
                            tracing::info!(%peer, "Mirror client attached");
                            accept_clients.write().await.push(MirrorClient { peer, stream });
                            accept_stats.write().await.clients_accepted += 1;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Mirror accept failed");
                        }
                    },
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Mirror accept loop stopped");
        });

        tracing::info!(%local_addr, "Live mirror listening");
        Ok(Self {
            local_addr,
            clients,
            stats,
            shutdown_tx,
            accept_task,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Forward one packet, H4-framed, to every attached client
    ///
    /// Clients whose write fails are detached. Returns the number of
    /// clients the frame reached.
    pub async fn forward(&self, packet_type: PacketType, payload: &[u8]) -> usize {
        let frame = btsnoop_hci::frame(packet_type, payload);

        let mut clients = self.clients.write().await;
        let mut survivors = Vec::with_capacity(clients.len());
        let mut delivered = 0u64;
        let mut detached = 0u64;

        for mut client in clients.drain(..) {
            match client.stream.write_all(&frame).await {
                Ok(()) => {
                    delivered += 1;
                    survivors.push(client);
                }
                Err(e) => {
                    tracing::info!(peer = %client.peer, error = %e, "Mirror client detached");
                    detached += 1;
                }
            }
        }
        *clients = survivors;
        drop(clients);

        let mut stats = self.stats.write().await;
        stats.frames_forwarded += delivered;
        stats.clients_detached += detached;

        delivered as usize
    }

    /// Number of currently attached clients
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Mirror statistics
    pub async fn stats(&self) -> MirrorStats {
        self.stats.read().await.clone()
    }

    /// Stop accepting clients and disconnect the attached ones
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.clients.write().await.clear();
        tracing::info!("Live mirror shut down");
    }
}

impl Drop for LiveMirror {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

// Shared across the capture service and caller tasks
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<LiveMirror>();
};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::time::{sleep, timeout, Duration};

    async fn attach_client(mirror: &LiveMirror) -> TcpStream {
        let stream = TcpStream::connect(mirror.local_addr()).await.unwrap();
        // Wait for the accept loop to register the connection
        for _ in 0..100 {
            if mirror.client_count().await > 0 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        stream
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let mirror = LiveMirror::bind(0).await.unwrap();
        assert_ne!(mirror.local_addr().port(), 0);
        assert_eq!(mirror.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_forward_with_no_clients() {
        let mirror = LiveMirror::bind(0).await.unwrap();
        let delivered = mirror.forward(PacketType::Command, &[0x03, 0x0c, 0x00]).await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_client_receives_h4_frames() {
        let mirror = LiveMirror::bind(0).await.unwrap();
        let mut client = attach_client(&mirror).await;

        let delivered = mirror.forward(PacketType::Command, &[0x03, 0x0c, 0x00]).await;
        assert_eq!(delivered, 1);
        mirror.forward(PacketType::Event, &[0x0e, 0x01, 0x05]).await;

        let mut buf = [0u8; 8];
        timeout(Duration::from_secs(1), client.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, &[0x01, 0x03, 0x0c, 0x00, 0x04, 0x0e, 0x01, 0x05]);
    }

    #[tokio::test]
    async fn test_detach_on_write_failure() {
        let mirror = LiveMirror::bind(0).await.unwrap();
        let client = attach_client(&mirror).await;
        assert_eq!(mirror.client_count().await, 1);

        drop(client);

        // The first write after the close may land in the send buffer;
        // keep forwarding until the broken pipe surfaces.
        let mut detached = false;
        for _ in 0..50 {
            mirror.forward(PacketType::Event, &[0x13, 0x00]).await;
            if mirror.client_count().await == 0 {
                detached = true;
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(detached);
        assert_eq!(mirror.stats().await.clients_detached, 1);
    }

    #[tokio::test]
    async fn test_multiple_clients() {
        let mirror = LiveMirror::bind(0).await.unwrap();
        let mut first = attach_client(&mirror).await;
        let mut second = TcpStream::connect(mirror.local_addr()).await.unwrap();
        for _ in 0..100 {
            if mirror.client_count().await == 2 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(mirror.client_count().await, 2);

        let delivered = mirror.forward(PacketType::Sco, &[0x01, 0x00, 0x01, 0xff]).await;
        assert_eq!(delivered, 2);

        for client in [&mut first, &mut second] {
            let mut buf = [0u8; 5];
            timeout(Duration::from_secs(1), client.read_exact(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(&buf, &[0x03, 0x01, 0x00, 0x01, 0xff]);
        }
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_clients() {
        let mirror = LiveMirror::bind(0).await.unwrap();
        let _client = attach_client(&mirror).await;
        assert_eq!(mirror.client_count().await, 1);

        mirror.shutdown().await;
        assert_eq!(mirror.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let mirror = LiveMirror::bind(0).await.unwrap();
        let _client = attach_client(&mirror).await;

        mirror.forward(PacketType::Command, &[0x03, 0x0c, 0x00]).await;
        mirror.forward(PacketType::Event, &[0x0e, 0x01, 0x05]).await;

        let stats = mirror.stats().await;
        assert_eq!(stats.clients_accepted, 1);
        assert_eq!(stats.frames_forwarded, 2);
        assert_eq!(stats.clients_detached, 0);
    }
}
