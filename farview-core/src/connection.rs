//! Managed client connection to the relay.
//!
//! Wraps a framed TCP stream in background reader/writer tasks plus a
//! periodic heartbeat, exposing a plain send/recv pair. Used by
//! producers and by any process speaking the protocol as a consumer;
//! the relay handles its accepted sockets itself.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::warn;

use crate::codec::FarCodec;
use crate::endpoint::EndpointId;
use crate::error::FarError;
use crate::packet::Packet;

/// Interval between connection-level heartbeats. Keeps the relay's
/// activity timestamp fresh even on an idle consumer.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Channel half used to hand outbound packets to the writer task.
pub type ConnectionSender = mpsc::Sender<Packet>;

/// A managed connection to the relay.
#[derive(Debug)]
pub struct Connection {
    tx: mpsc::Sender<Packet>,
    rx: mpsc::Receiver<Packet>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        let (mut net_writer, mut net_reader) = Framed::new(stream, FarCodec).split();

        // User -> Network
        let (user_tx, mut network_rx) = mpsc::channel::<Packet>(100);

        // Network -> User
        let (network_tx, user_rx) = mpsc::channel::<Packet>(100);

        // Writer task
        tokio::spawn(async move {
            while let Some(packet) = network_rx.recv().await {
                if let Err(e) = net_writer.send(packet).await {
                    warn!("network write error: {e}");
                    break;
                }
            }
        });

        // Reader task
        tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                match result {
                    Ok(packet) => {
                        if network_tx.send(packet).await.is_err() {
                            // Receiver dropped — stop reading.
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("network read error: {e}");
                        break;
                    }
                }
            }
        });

        // Heartbeat task. The relay identifies the sender by its
        // socket, so an unassigned `from` id is fine here.
        let heartbeat_tx = user_tx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            interval.tick().await; // first tick fires immediately
            loop {
                interval.tick().await;
                if heartbeat_tx
                    .send(Packet::heartbeat(EndpointId::RELAY))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        Self {
            tx: user_tx,
            rx: user_rx,
        }
    }

    /// Connect to a relay at `addr` ("host:port").
    pub async fn connect(addr: &str) -> Result<Self, FarError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::new(stream))
    }

    pub async fn send(&self, packet: Packet) -> Result<(), FarError> {
        self.tx.send(packet).await.map_err(|_| FarError::ChannelClosed)
    }

    /// Receive the next packet. `None` means the transport closed.
    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }

    /// Clone the outbound channel for use by background tasks
    /// (the frame pump writes through this).
    pub fn sender(&self) -> ConnectionSender {
        self.tx.clone()
    }
}
