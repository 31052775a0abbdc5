//! Producer service: registers a render surface with the relay and
//! serves streaming sessions over it.
//!
//! One producer owns one surface. Frames flow out through the
//! [`FramePump`]; interactions flow back in through the
//! [`InteractionTranslator`]. Both share the surface driver handle,
//! so captures and input replay never interleave on the engine.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::endpoint::EndpointId;
use crate::error::FarError;
use crate::message::{
    MessageKind, QualityChange, RegisterAck, RegisterProducer, RequestSession, SessionEnd,
    SessionEstablished, SessionError, TopologyChange, ViewportChange,
};
use crate::packet::Packet;
use crate::pump::{FramePump, PumpConfig};
use crate::surface::SurfaceHandle;
use crate::translator::InteractionTranslator;

/// Attempts before giving up on the target page.
const PAGE_LOAD_ATTEMPTS: u32 = 3;
/// Pause between page load attempts.
const PAGE_LOAD_BACKOFF: Duration = Duration::from_secs(1);
/// How long to wait for the relay's registration ack.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

// ── ProducerConfig ───────────────────────────────────────────────

/// Everything a producer declares about itself and its surface.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Relay address, "host:port".
    pub relay_addr: String,
    pub name: String,
    pub platform: String,
    pub capabilities: Vec<String>,
    /// The page this producer renders and streams.
    pub target_url: String,
    pub capture_width: u32,
    pub capture_height: u32,
    pub pump: PumpConfig,
}

impl ProducerConfig {
    fn register_payload(&self) -> RegisterProducer {
        RegisterProducer {
            name: self.name.clone(),
            platform: self.platform.clone(),
            capabilities: self.capabilities.clone(),
            target_url: self.target_url.clone(),
            capture_width: self.capture_width,
            capture_height: self.capture_height,
        }
    }
}

// ── ProducerService ──────────────────────────────────────────────

/// Drives one surface against one relay until either side goes away.
pub struct ProducerService {
    config: ProducerConfig,
    surface: SurfaceHandle,
}

impl ProducerService {
    pub fn new(config: ProducerConfig, surface: SurfaceHandle) -> Self {
        Self { config, surface }
    }

    /// Load the target page, register, then serve sessions until the
    /// relay connection closes.
    pub async fn run(self) -> Result<(), FarError> {
        load_with_retries(&self.surface, &self.config.target_url).await?;

        let mut conn = Connection::connect(&self.config.relay_addr).await?;
        let id = self.register(&mut conn).await?;
        info!("registered with relay as {id}");

        let pump = FramePump::new(
            id,
            self.surface.clone(),
            conn.sender(),
            self.config.pump.clone(),
        );
        let translator = InteractionTranslator::new(
            self.surface.clone(),
            self.config.capture_width,
            self.config.capture_height,
        );

        self.serve(&mut conn, id, &pump, &translator).await;

        // Dropping the connection deregisters us; the relay tears
        // down our sessions and tells the consumers.
        pump.stop();
        info!("producer {id} stopping");
        Ok(())
    }

    async fn register(&self, conn: &mut Connection) -> Result<EndpointId, FarError> {
        let payload = self.config.register_payload().to_bytes()?;
        conn.send(Packet::new(
            MessageKind::RegisterProducer,
            EndpointId::RELAY,
            EndpointId::RELAY,
            payload,
        )?)
        .await?;

        // The ack carries our relay-assigned id. Heartbeats may
        // arrive first; anything else this early is a protocol error.
        let deadline = tokio::time::sleep(ACK_TIMEOUT);
        tokio::pin!(deadline);
        loop {
            let packet = tokio::select! {
                p = conn.recv() => p.ok_or(FarError::ChannelClosed)?,
                _ = &mut deadline => return Err(FarError::Timeout(ACK_TIMEOUT)),
            };
            match packet.kind() {
                MessageKind::RegisterAck => {
                    return Ok(RegisterAck::from_bytes(packet.payload())?.id);
                }
                MessageKind::SessionError => {
                    let reason = SessionError::from_bytes(packet.payload())
                        .map(|e| e.reason)
                        .unwrap_or_else(|e| e.to_string());
                    return Err(FarError::Other(format!("registration rejected: {reason}")));
                }
                MessageKind::Heartbeat => {}
                other => debug!("ignoring {other} while awaiting ack"),
            }
        }
    }

    /// The session-serving loop. Exits when the relay connection
    /// closes or the surface is lost; every branch in here is
    /// non-fatal.
    async fn serve(
        &self,
        conn: &mut Connection,
        id: EndpointId,
        pump: &FramePump,
        translator: &InteractionTranslator,
    ) {
        loop {
            let packet = tokio::select! {
                p = conn.recv() => match p {
                    Some(p) => p,
                    None => break,
                },
                _ = self.surface.closed() => {
                    warn!("surface lost, closing all sessions");
                    break;
                }
            };
            let from = packet.from();
            match packet.kind() {
                MessageKind::RequestSession => {
                    let request = match RequestSession::from_bytes(packet.payload()) {
                        Ok(r) => r,
                        Err(e) => {
                            warn!("malformed session request from {from}: {e}");
                            continue;
                        }
                    };
                    self.accept_session(conn, id, from, request, pump, translator)
                        .await;
                }

                MessageKind::Interaction => {
                    translator.handle_raw(from, packet.payload()).await;
                }

                MessageKind::QualityChange => match QualityChange::from_bytes(packet.payload()) {
                    Ok(change) => {
                        debug!("quality set to {} by {from}", change.quality);
                        pump.set_quality(change.quality);
                    }
                    Err(e) => warn!("malformed quality change from {from}: {e}"),
                },

                MessageKind::ViewportChange => match ViewportChange::from_bytes(packet.payload()) {
                    Ok(change) => translator.set_viewport(from, change.width, change.height),
                    Err(e) => warn!("malformed viewport change from {from}: {e}"),
                },

                MessageKind::SessionEnd => {
                    // Forwarded by the relay when a consumer ends its
                    // session with us; `from` is the consumer.
                    if SessionEnd::from_bytes(packet.payload()).is_ok() {
                        info!("session with {from} ended");
                        pump.remove_recipient(from);
                        translator.remove_viewer(from);
                    }
                }

                MessageKind::TopologyChange => {
                    if let Ok(TopologyChange::PeerRemoved(peer)) =
                        TopologyChange::from_bytes(packet.payload())
                    {
                        info!("peer {peer} vanished, dropping its session");
                        pump.remove_recipient(peer);
                        translator.remove_viewer(peer);
                    }
                }

                MessageKind::SessionError => {
                    let reason = SessionError::from_bytes(packet.payload())
                        .map(|e| e.reason)
                        .unwrap_or_else(|e| e.to_string());
                    warn!("relay reported: {reason}");
                }

                MessageKind::Heartbeat => {}

                other => debug!("ignoring {other} from {from}"),
            }
        }
    }

    async fn accept_session(
        &self,
        conn: &Connection,
        id: EndpointId,
        consumer: EndpointId,
        request: RequestSession,
        pump: &FramePump,
        translator: &InteractionTranslator,
    ) {
        translator.set_viewport(consumer, request.viewport_width, request.viewport_height);

        let ack = SessionEstablished {
            capture_width: self.config.capture_width,
            capture_height: self.config.capture_height,
            target_fps: self.config.pump.target_fps(),
        };
        let packet = match ack
            .to_bytes()
            .and_then(|bytes| Packet::new(MessageKind::SessionEstablished, id, consumer, bytes))
        {
            Ok(p) => p,
            Err(e) => {
                warn!("session ack build failed: {e}");
                return;
            }
        };
        if conn.send(packet).await.is_err() {
            warn!("session ack to {consumer} failed: connection closed");
            return;
        }

        info!(
            "session with {consumer} established (viewport {}x{})",
            request.viewport_width, request.viewport_height
        );
        // Ack before first frame: the consumer learns the capture
        // geometry before any frame arrives.
        pump.add_recipient(consumer);
    }
}

/// Navigate the surface to `url`, retrying a few times before giving
/// up — render engines are routinely slow to come up.
async fn load_with_retries(surface: &SurfaceHandle, url: &str) -> Result<(), FarError> {
    let mut last_err = None;
    for attempt in 1..=PAGE_LOAD_ATTEMPTS {
        match surface.load_page(url).await {
            Ok(()) => {
                info!("loaded {url} (attempt {attempt})");
                return Ok(());
            }
            Err(e) => {
                warn!("page load attempt {attempt}/{PAGE_LOAD_ATTEMPTS} failed: {e}");
                last_err = Some(e);
                if attempt < PAGE_LOAD_ATTEMPTS {
                    tokio::time::sleep(PAGE_LOAD_BACKOFF).await;
                }
            }
        }
    }
    Err(FarError::LoadFailed(format!(
        "{url}: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

// ── Tests ────────────────────────────────────────────────────────
