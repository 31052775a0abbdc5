//! The relay: pairs producers with consumers and forwards addressed
//! packets between them.
//!
//! Transport I/O is concurrent (one reader and one writer task per
//! accepted connection), but every registry mutation and routing
//! decision goes through a single router task fed by an mpsc channel,
//! so registry and session state need no locking and per-sender
//! emission order is preserved end to end.
//!
//! The router never awaits a peer's outbound queue: hand-offs are
//! `try_send` only, so one stalled transport cannot stall routing for
//! everyone else. A peer whose control queue fills up is treated as
//! dead and torn down like a disconnect.
//!
//! The router never looks at payload bytes of forwarded traffic —
//! only the header (kind, from, to). Control kinds addressed to the
//! relay itself (registration, discovery, session requests) are the
//! one place payloads are decoded.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::codec::FarCodec;
use crate::endpoint::{EndpointId, EndpointMeta, Role};
use crate::error::FarError;
use crate::flags::PacketFlags;
use crate::message::{
    MessageKind, ProducerInfo, ProducerList, RegisterAck, RegisterConsumer, RegisterProducer,
    RequestSession, SessionEnd, SessionError, TopologyChange,
};
use crate::packet::Packet;
use crate::registry::Registry;
use crate::session::SessionTable;

/// Per-connection outbound queue depth.
const PEER_QUEUE: usize = 64;

// ── RelayServer ──────────────────────────────────────────────────

/// The relay process core: TCP accept loop plus router task.
pub struct RelayServer {
    listener: TcpListener,
    running: Arc<AtomicBool>,
}

impl RelayServer {
    /// Bind the relay to `addr` ("host:port"; port 0 for ephemeral).
    pub async fn bind(addr: &str) -> Result<Self, FarError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, FarError> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle to stop the relay from another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run until stopped. Connection ids are assigned here, on
    /// transport connect, and never reused.
    pub async fn run(&self) -> Result<(), FarError> {
        self.running.store(true, Ordering::SeqCst);
        info!("relay listening on {}", self.listener.local_addr()?);

        let (cmd_tx, cmd_rx) = mpsc::channel::<RouterCommand>(1024);
        let router = Router::new();
        let router_task = tokio::spawn(router.run(cmd_rx));

        let mut next_id: u64 = 1;
        while self.running.load(Ordering::SeqCst) {
            let accept = tokio::select! {
                result = self.listener.accept() => result,
                _ = wait_for_stop(&self.running) => break,
            };

            let (stream, peer_addr) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };

            let id = EndpointId::new(next_id);
            next_id += 1;
            debug!("connection {id} from {peer_addr}");
            spawn_connection(id, stream, cmd_tx.clone(), Arc::clone(&self.running));
        }

        // Closing the command channel lets the router drain and exit.
        drop(cmd_tx);
        let _ = router_task.await;
        info!("relay stopped");
        Ok(())
    }
}

async fn wait_for_stop(running: &Arc<AtomicBool>) {
    loop {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

// ── Per-connection I/O ───────────────────────────────────────────

fn spawn_connection(
    id: EndpointId,
    stream: TcpStream,
    cmd_tx: mpsc::Sender<RouterCommand>,
    running: Arc<AtomicBool>,
) {
    let (mut net_writer, mut net_reader) = Framed::new(stream, FarCodec).split();
    let (peer_tx, mut peer_rx) = mpsc::channel::<Packet>(PEER_QUEUE);

    // Writer task: router -> network.
    tokio::spawn(async move {
        while let Some(packet) = peer_rx.recv().await {
            if let Err(e) = net_writer.send(packet).await {
                debug!("write to {id} failed: {e}");
                break;
            }
        }
    });

    // Reader task: network -> router. EOF or a codec error is the
    // disconnect signal — cleanup is triggered on the same channel
    // hop, so it is bounded by one router turn. The reader also
    // watches the stop flag: connected clients must not keep the
    // router (and so the whole relay) alive through shutdown.
    tokio::spawn(async move {
        let _ = cmd_tx.send(RouterCommand::Connected { id, tx: peer_tx }).await;

        loop {
            let result = tokio::select! {
                r = net_reader.next() => match r {
                    Some(r) => r,
                    None => break,
                },
                _ = wait_for_stop(&running) => break,
            };
            match result {
                Ok(packet) => {
                    if cmd_tx
                        .send(RouterCommand::Incoming { id, packet })
                        .await
                        .is_err()
                    {
                        return; // router gone, relay shutting down
                    }
                }
                Err(e) => {
                    debug!("read from {id} failed: {e}");
                    break;
                }
            }
        }

        let _ = cmd_tx.send(RouterCommand::Disconnected { id }).await;
    });
}

// ── Router ───────────────────────────────────────────────────────

enum RouterCommand {
    Connected {
        id: EndpointId,
        tx: mpsc::Sender<Packet>,
    },
    Incoming {
        id: EndpointId,
        packet: Packet,
    },
    Disconnected {
        id: EndpointId,
    },
}

struct Router {
    registry: Registry,
    sessions: SessionTable,
    /// Live transports (registered or not), keyed by connection id.
    peers: HashMap<EndpointId, mpsc::Sender<Packet>>,
    /// Peers condemned mid-command (control queue full or writer
    /// gone); torn down after the current command completes.
    doomed: Vec<EndpointId>,
}

impl Router {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
            sessions: SessionTable::new(),
            peers: HashMap::new(),
            doomed: Vec::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<RouterCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                RouterCommand::Connected { id, tx } => {
                    self.peers.insert(id, tx);
                }
                RouterCommand::Incoming { id, packet } => {
                    self.registry.touch(id);
                    // Never trust the sender-claimed id.
                    let packet = packet.stamp_from(id);
                    if packet.kind().is_control() {
                        self.handle_control(id, packet);
                    } else {
                        self.route_directed(id, packet);
                    }
                }
                RouterCommand::Disconnected { id } => {
                    self.handle_disconnect(id);
                }
            }

            // Teardown of stalled peers can condemn further peers
            // (their notifications may hit other full queues), so
            // drain until stable.
            while let Some(id) = self.doomed.pop() {
                self.handle_disconnect(id);
            }
        }
    }

    // ── Control traffic (addressed to the relay) ─────────────────

    fn handle_control(&mut self, from: EndpointId, packet: Packet) {
        match packet.kind() {
            MessageKind::Heartbeat => {} // touch already done

            MessageKind::RegisterProducer => {
                let meta = match RegisterProducer::from_bytes(packet.payload()) {
                    Ok(reg) => reg.into_meta(),
                    Err(e) => {
                        self.report(from, format!("malformed registration: {e}"));
                        return;
                    }
                };
                self.register(from, Role::Producer, meta);
            }

            MessageKind::RegisterConsumer => {
                let meta = match RegisterConsumer::from_bytes(packet.payload()) {
                    Ok(reg) => EndpointMeta {
                        name: reg.name,
                        ..Default::default()
                    },
                    Err(e) => {
                        self.report(from, format!("malformed registration: {e}"));
                        return;
                    }
                };
                self.register(from, Role::Consumer, meta);
            }

            MessageKind::DiscoverProducers => {
                let list = ProducerList {
                    producers: self
                        .registry
                        .list_by_role(Role::Producer)
                        .map(producer_info)
                        .collect(),
                };
                match list.to_bytes() {
                    Ok(bytes) => {
                        self.send_control(from, MessageKind::ProducerList, PacketFlags::empty(), bytes)
                    }
                    Err(e) => warn!("producer list encode failed: {e}"),
                }
            }

            MessageKind::RequestSession => {
                let request = match RequestSession::from_bytes(packet.payload()) {
                    Ok(r) => r,
                    Err(e) => {
                        self.report(from, format!("malformed session request: {e}"));
                        return;
                    }
                };
                self.handle_session_request(from, request, packet);
            }

            MessageKind::SessionEnd => {
                let end = match SessionEnd::from_bytes(packet.payload()) {
                    Ok(e) => e,
                    Err(e) => {
                        self.report(from, format!("malformed session end: {e}"));
                        return;
                    }
                };
                if self.sessions.close_pair(from, end.producer) {
                    debug!("session {from}↔{} ended by consumer", end.producer);
                    // Tell the producer so it drops the recipient.
                    self.forward(end.producer, packet);
                }
            }

            // Non-control kinds never reach here.
            other => warn!("unexpected control kind {other} from {from}"),
        }
    }

    fn register(&mut self, id: EndpointId, role: Role, meta: EndpointMeta) {
        match self.registry.register(id, role, meta) {
            Ok(id) => {
                info!("{role} {id} registered");
                let ack = RegisterAck { id };
                match ack.to_bytes() {
                    Ok(bytes) => {
                        self.send_control(id, MessageKind::RegisterAck, PacketFlags::empty(), bytes)
                    }
                    Err(e) => warn!("ack encode failed: {e}"),
                }

                // Producer arrivals are announced to every consumer;
                // consumer registrations are silent.
                if role == Role::Producer {
                    if let Some(ep) = self.registry.get(id) {
                        let event = TopologyChange::ProducerAdded(producer_info(ep));
                        self.broadcast_to_consumers(event, Some(id));
                    }
                }
            }
            Err(e) => {
                // Reported to the offender only, never broadcast.
                self.report(id, e.to_string());
            }
        }
    }

    fn handle_session_request(&mut self, from: EndpointId, request: RequestSession, packet: Packet) {
        if !matches!(self.registry.get(from).map(|e| e.role()), Some(Role::Consumer)) {
            self.report(from, FarError::NotRegistered(from).to_string());
            return;
        }

        let producer_ok = matches!(
            self.registry.get(request.producer).map(|e| e.role()),
            Some(Role::Producer)
        );
        if !producer_ok {
            // User-visible connection error for this consumer; its own
            // registration is untouched.
            self.report(from, FarError::ProducerUnavailable(request.producer).to_string());
            return;
        }

        self.sessions.request(from, request.producer);
        debug!("session {from}→{} requested", request.producer);
        self.forward(request.producer, packet);
    }

    // ── Directed traffic (forwarded verbatim) ────────────────────

    fn route_directed(&mut self, from: EndpointId, packet: Packet) {
        let to = packet.to();
        if to.is_relay() {
            warn!("non-control packet {} from {from} addressed to relay", packet.kind());
            return;
        }
        if !self.registry.contains(to) {
            // Reported to the sender only; zero deliveries.
            self.report(from, FarError::TargetUnavailable(to).to_string());
            return;
        }

        // The producer's ack is the Requested → Established trigger.
        if packet.kind() == MessageKind::SessionEstablished {
            if let Err(e) = self.sessions.establish(to, from) {
                warn!("stray session ack from {from} for {to}: {e}");
                self.report(from, e.to_string());
                return;
            }
            debug!("session {to}↔{from} established");
        }

        self.forward(to, packet);
    }

    // ── Teardown ─────────────────────────────────────────────────

    fn handle_disconnect(&mut self, id: EndpointId) {
        self.peers.remove(&id);
        let removed = self.registry.unregister(id);

        // Sessions referencing the endpoint close now; the surviving
        // side learns its peer is gone.
        for (consumer, producer) in self.sessions.close_for_endpoint(id) {
            let survivor = if consumer == id { producer } else { consumer };
            let event = TopologyChange::PeerRemoved(id);
            if let Ok(bytes) = event.to_bytes() {
                self.send_control(survivor, MessageKind::TopologyChange, PacketFlags::empty(), bytes);
            }
        }

        match removed {
            Some(ep) if ep.role() == Role::Producer => {
                info!("producer {id} disconnected");
                self.broadcast_to_consumers(TopologyChange::ProducerRemoved(id), None);
            }
            Some(_) => info!("consumer {id} disconnected"),
            None => debug!("unregistered connection {id} closed"),
        }
    }

    // ── Send helpers ─────────────────────────────────────────────

    /// Forward an already-stamped packet to a live transport. Never
    /// blocks: frames are droppable, and a peer whose control queue
    /// is full is condemned instead of waited on.
    fn forward(&mut self, to: EndpointId, packet: Packet) {
        let Some(tx) = self.peers.get(&to) else {
            debug!("dropping {} for vanished {to}", packet.kind());
            return;
        };

        match tx.try_send(packet) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(p)) => {
                if p.flags().contains(PacketFlags::STREAMING) {
                    // Frames are best-effort, most-recent-only: a
                    // recipient with a full queue loses this one
                    // rather than stalling the router.
                    debug!("slow recipient {to}: dropped frame {}", p.kind());
                } else {
                    // A transport that cannot drain a whole control
                    // queue has stopped reading; keeping it would
                    // stall every other endpoint's traffic.
                    warn!("peer {to} is not draining control traffic, dropping it");
                    self.doom(to);
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("send to {to} failed: writer gone");
                self.doom(to);
            }
        }
    }

    /// Mark a peer for teardown after the current command.
    fn doom(&mut self, id: EndpointId) {
        if !self.doomed.contains(&id) {
            self.doomed.push(id);
        }
    }

    /// Build and send a relay-originated control packet.
    fn send_control(&mut self, to: EndpointId, kind: MessageKind, flags: PacketFlags, payload: Vec<u8>) {
        match Packet::with_flags(kind, flags, EndpointId::RELAY, to, payload) {
            Ok(packet) => self.forward(to, packet),
            Err(e) => warn!("control packet build failed: {e}"),
        }
    }

    /// Report a failure to one endpoint only.
    fn report(&mut self, to: EndpointId, reason: String) {
        warn!("reporting to {to}: {reason}");
        let payload = SessionError { reason };
        match payload.to_bytes() {
            Ok(bytes) => {
                self.send_control(to, MessageKind::SessionError, PacketFlags::empty(), bytes)
            }
            Err(e) => warn!("session error encode failed: {e}"),
        }
    }

    fn broadcast_to_consumers(&mut self, event: TopologyChange, exclude: Option<EndpointId>) {
        let bytes = match event.to_bytes() {
            Ok(b) => b,
            Err(e) => {
                warn!("topology event encode failed: {e}");
                return;
            }
        };

        let consumers: Vec<EndpointId> = self
            .registry
            .list_by_role(Role::Consumer)
            .map(|ep| ep.id())
            .filter(|&id| Some(id) != exclude)
            .collect();

        for id in consumers {
            self.send_control(id, MessageKind::TopologyChange, PacketFlags::BROADCAST, bytes.clone());
        }
    }
}

fn producer_info(ep: &crate::endpoint::Endpoint) -> ProducerInfo {
    ProducerInfo {
        id: ep.id(),
        name: ep.meta().name.clone(),
        capabilities: ep.capabilities().to_vec(),
        target_url: ep.target_url().unwrap_or_default().to_string(),
    }
}
