//! Publisher module for IPC communication
//!
//! Cups and volume rankings are handed to a [`Distributor`]. The IPC
//! [`Publisher`] queues them on a bounded channel; a writer task frames them
//! as length-prefixed MessagePack and writes them to a Unix socket.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{DepthError, Result};
use crate::metrics;
use crate::orderbook::{CupSnapshot, GVolume};

/// Consumer of view publications
#[cfg_attr(test, mockall::automock)]
pub trait Distributor: Send + Sync {
    /// Called when a view's tier is >= 1, or just dropped below 1
    fn distribute(&self, profile_key: &str, tier: i32, cup: CupSnapshot);

    /// Called with each traded-volume ranking
    fn distribute_volumes(&self, _volumes: &[GVolume]) {}
}

/// Message written to the IPC socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Cup { profile: String, tier: i32, cup: CupSnapshot },
    Volumes { volumes: Vec<GVolume> },
}

/// Encode a message as a big-endian `u32` length followed by MessagePack
pub fn encode_frame(message: &Outbound) -> Result<Bytes> {
    let data = rmp_serde::to_vec_named(message)
        .map_err(|e| DepthError::SerializationError(format!("Failed to serialize: {}", e)))?;

    let mut frame = BytesMut::with_capacity(4 + data.len());
    frame.put_u32(data.len() as u32);
    frame.extend_from_slice(&data);
    Ok(frame.freeze())
}

/// Distributor that publishes over a Unix socket
pub struct Publisher {
    tx: mpsc::Sender<Outbound>,
}

impl Publisher {
    /// Create a publisher and spawn its writer task
    pub fn spawn(socket_path: &str, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let writer = IpcWriter {
            socket_path: socket_path.to_string(),
            stream: None,
        };
        let handle = tokio::spawn(writer.run(rx));
        (Self { tx }, handle)
    }

    fn offer(&self, message: Outbound) {
        match self.tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("IPC queue full, dropping publication");
                metrics::record_drop("publish_overflow");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("IPC writer stopped, dropping publication");
            }
        }
    }
}

impl Distributor for Publisher {
    fn distribute(&self, profile_key: &str, tier: i32, cup: CupSnapshot) {
        if let Some(m) = metrics::get() {
            m.cups_published.inc();
        }
        self.offer(Outbound::Cup {
            profile: profile_key.to_string(),
            tier,
            cup,
        });
    }

    fn distribute_volumes(&self, volumes: &[GVolume]) {
        self.offer(Outbound::Volumes {
            volumes: volumes.to_vec(),
        });
    }
}

struct IpcWriter {
    socket_path: String,
    stream: Option<UnixStream>,
}

impl IpcWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<Outbound>) {
        if let Err(e) = self.connect().await {
            warn!(error = %e, "Initial IPC connection failed, will retry on publish");
        }

        while let Some(message) = rx.recv().await {
            let frame = match encode_frame(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Dropping unencodable publication");
                    continue;
                }
            };
            self.write(&frame).await;
        }

        info!("IPC writer stopped");
    }

    async fn connect(&mut self) -> Result<()> {
        let path = Path::new(&self.socket_path);

        if !path.exists() {
            return Err(DepthError::IpcError(format!(
                "Socket path does not exist: {}",
                self.socket_path
            )));
        }

        let stream = UnixStream::connect(path).await.map_err(|e| {
            DepthError::IpcError(format!("Failed to connect to {}: {}", self.socket_path, e))
        })?;
        self.stream = Some(stream);

        info!(path = %self.socket_path, "Connected to IPC socket");
        Ok(())
    }

    /// Publishing never fails the caller; a broken socket is reconnected
    /// on the next frame.
    async fn write(&mut self, frame: &[u8]) {
        if self.stream.is_none() {
            if let Err(e) = self.connect().await {
                debug!(error = %e, "Failed to reconnect to IPC socket");
                return;
            }
        }

        if let Some(stream) = self.stream.as_mut() {
            if let Err(e) = stream.write_all(frame).await {
                warn!(error = %e, "Failed to write to IPC socket");
                self.stream = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::CupLevel;
    use crate::symbol::{MarketSymbol, Segment};
    use rust_decimal_macros::dec;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    fn cup() -> CupSnapshot {
        CupSnapshot {
            symbol: "BTCUSDT".to_string(),
            segment: Segment::Spot,
            profile: "default".to_string(),
            timestamp: 1_700_000_000_000,
            max_tier: 2,
            bids: vec![CupLevel {
                price: dec!(50000),
                quantity: dec!(3),
                distance_pct: dec!(0.1),
                tier: 2,
                age_ms: 1500,
            }],
            asks: vec![],
        }
    }

    #[test]
    fn test_frame_layout() {
        let message = Outbound::Cup {
            profile: "default".to_string(),
            tier: 2,
            cup: cup(),
        };
        let frame = encode_frame(&message).unwrap();

        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);
        let decoded: Outbound = rmp_serde::from_slice(&frame[4..]).unwrap();
        assert_eq!(decoded, message);
    }

    #[tokio::test]
    async fn test_publisher_writes_frames_to_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let (publisher, _writer) = Publisher::spawn(path.to_str().unwrap(), 16);
        let (mut conn, _) = listener.accept().await.unwrap();

        publisher.distribute_volumes(&[GVolume {
            symbol: MarketSymbol::futures("ETHUSDT"),
            volume: dec!(1200),
            delta: dec!(200),
        }]);

        let len = conn.read_u32().await.unwrap() as usize;
        let mut body = vec![0u8; len];
        conn.read_exact(&mut body).await.unwrap();
        match rmp_serde::from_slice::<Outbound>(&body).unwrap() {
            Outbound::Volumes { volumes } => {
                assert_eq!(volumes.len(), 1);
                assert_eq!(volumes[0].delta, dec!(200));
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_publishing_without_writer_does_not_fail() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let publisher = Publisher { tx };
        publisher.distribute("default", 2, cup());
    }
}
