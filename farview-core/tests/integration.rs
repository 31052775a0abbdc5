//! Integration tests — registration, discovery, session setup, frame
//! routing, and teardown over a real relay on localhost TCP.

use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use farview_core::message::{
    FramePayload, InteractionEvent, ProducerList, RegisterAck, RegisterConsumer, RegisterProducer,
    RequestSession, SessionEnd, SessionError, SessionEstablished, TopologyChange,
};
use farview_core::relay::RelayServer;
use farview_core::surface::spawn_driver;
use farview_core::{
    Connection, EndpointId, FarCodec, FarError, MessageKind, Packet, PacketFlags, ProducerConfig,
    ProducerService, PumpConfig, RenderSurface,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

// ── Helpers ──────────────────────────────────────────────────────

/// Start a relay on an OS-assigned port; runs until the test ends.
async fn start_relay() -> String {
    let server = RelayServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    addr.to_string()
}

/// Receive the next non-heartbeat packet, skipping any heartbeats
/// that arrive first. Bounded by a 5 s timeout.
async fn recv_skip_heartbeat(conn: &mut Connection) -> Packet {
    timeout(Duration::from_secs(5), async {
        loop {
            let pkt = conn.recv().await.expect("connection closed");
            if pkt.kind() != MessageKind::Heartbeat {
                return pkt;
            }
        }
    })
    .await
    .expect("timed out waiting for packet")
}

async fn register_producer(conn: &mut Connection, name: &str) -> EndpointId {
    let reg = RegisterProducer {
        name: name.into(),
        platform: "linux".into(),
        capabilities: vec!["gpu-acceleration".into()],
        target_url: "http://example.test".into(),
        capture_width: 1920,
        capture_height: 1080,
    };
    conn.send(
        Packet::new(
            MessageKind::RegisterProducer,
            EndpointId::RELAY,
            EndpointId::RELAY,
            reg.to_bytes().unwrap(),
        )
        .unwrap(),
    )
    .await
    .unwrap();

    let ack = recv_skip_heartbeat(conn).await;
    assert_eq!(ack.kind(), MessageKind::RegisterAck);
    RegisterAck::from_bytes(ack.payload()).unwrap().id
}

async fn register_consumer(conn: &mut Connection, name: &str) -> EndpointId {
    let reg = RegisterConsumer { name: name.into() };
    conn.send(
        Packet::new(
            MessageKind::RegisterConsumer,
            EndpointId::RELAY,
            EndpointId::RELAY,
            reg.to_bytes().unwrap(),
        )
        .unwrap(),
    )
    .await
    .unwrap();

    let ack = recv_skip_heartbeat(conn).await;
    assert_eq!(ack.kind(), MessageKind::RegisterAck);
    RegisterAck::from_bytes(ack.payload()).unwrap().id
}

async fn request_session(conn: &Connection, producer: EndpointId) {
    let request = RequestSession {
        producer,
        viewport_width: 960,
        viewport_height: 540,
    };
    conn.send(
        Packet::new(
            MessageKind::RequestSession,
            EndpointId::RELAY,
            EndpointId::RELAY,
            request.to_bytes().unwrap(),
        )
        .unwrap(),
    )
    .await
    .unwrap();
}

// ── Registration ─────────────────────────────────────────────────

#[tokio::test]
async fn producer_registration_gets_ack() {
    let addr = start_relay().await;
    let mut conn = Connection::connect(&addr).await.unwrap();

    let id = register_producer(&mut conn, "host-a").await;
    assert!(!id.is_relay());
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let addr = start_relay().await;
    let mut conn = Connection::connect(&addr).await.unwrap();
    register_producer(&mut conn, "host-a").await;

    // Second registration on the same connection, any role.
    let reg = RegisterConsumer { name: "again".into() };
    conn.send(
        Packet::new(
            MessageKind::RegisterConsumer,
            EndpointId::RELAY,
            EndpointId::RELAY,
            reg.to_bytes().unwrap(),
        )
        .unwrap(),
    )
    .await
    .unwrap();

    let pkt = recv_skip_heartbeat(&mut conn).await;
    assert_eq!(pkt.kind(), MessageKind::SessionError);
    let err = SessionError::from_bytes(pkt.payload()).unwrap();
    assert!(err.reason.contains("already registered"), "{}", err.reason);
}

// ── Discovery ────────────────────────────────────────────────────

#[tokio::test]
async fn discovery_lists_producers_in_registration_order() {
    let addr = start_relay().await;

    let mut p1 = Connection::connect(&addr).await.unwrap();
    let id1 = register_producer(&mut p1, "host-a").await;
    let mut p2 = Connection::connect(&addr).await.unwrap();
    let id2 = register_producer(&mut p2, "host-b").await;

    let mut viewer = Connection::connect(&addr).await.unwrap();
    register_consumer(&mut viewer, "viewer").await;

    viewer
        .send(
            Packet::new(
                MessageKind::DiscoverProducers,
                EndpointId::RELAY,
                EndpointId::RELAY,
                Vec::new(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let pkt = recv_skip_heartbeat(&mut viewer).await;
    assert_eq!(pkt.kind(), MessageKind::ProducerList);
    let list = ProducerList::from_bytes(pkt.payload()).unwrap();
    let ids: Vec<EndpointId> = list.producers.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![id1, id2]);
    assert_eq!(list.producers[0].name, "host-a");
    assert_eq!(list.producers[0].target_url, "http://example.test");
}

#[tokio::test]
async fn consumer_learns_of_new_producer() {
    let addr = start_relay().await;

    let mut viewer = Connection::connect(&addr).await.unwrap();
    register_consumer(&mut viewer, "viewer").await;

    let mut producer = Connection::connect(&addr).await.unwrap();
    let pid = register_producer(&mut producer, "host-a").await;

    let pkt = recv_skip_heartbeat(&mut viewer).await;
    assert_eq!(pkt.kind(), MessageKind::TopologyChange);
    assert!(pkt.flags().contains(PacketFlags::BROADCAST));
    match TopologyChange::from_bytes(pkt.payload()).unwrap() {
        TopologyChange::ProducerAdded(info) => {
            assert_eq!(info.id, pid);
            assert_eq!(info.name, "host-a");
        }
        other => panic!("unexpected topology event: {other:?}"),
    }
}

// ── Session setup and routing ────────────────────────────────────

#[tokio::test]
async fn session_request_is_forwarded_and_ack_routed_back() {
    let addr = start_relay().await;

    let mut producer = Connection::connect(&addr).await.unwrap();
    let pid = register_producer(&mut producer, "host-a").await;
    let mut viewer = Connection::connect(&addr).await.unwrap();
    let cid = register_consumer(&mut viewer, "viewer").await;

    request_session(&viewer, pid).await;

    // The producer sees the request with the consumer's real id.
    let pkt = recv_skip_heartbeat(&mut producer).await;
    assert_eq!(pkt.kind(), MessageKind::RequestSession);
    assert_eq!(pkt.from(), cid);
    let request = RequestSession::from_bytes(pkt.payload()).unwrap();
    assert_eq!(request.viewport_width, 960);

    // Producer acknowledges; the consumer gets the capture geometry.
    let ack = SessionEstablished {
        capture_width: 1920,
        capture_height: 1080,
        target_fps: 20,
    };
    producer
        .send(
            Packet::new(
                MessageKind::SessionEstablished,
                pid,
                cid,
                ack.to_bytes().unwrap(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let pkt = recv_skip_heartbeat(&mut viewer).await;
    assert_eq!(pkt.kind(), MessageKind::SessionEstablished);
    assert_eq!(pkt.from(), pid);
    let ack = SessionEstablished::from_bytes(pkt.payload()).unwrap();
    assert_eq!((ack.capture_width, ack.capture_height), (1920, 1080));
}

#[tokio::test]
async fn session_with_unknown_producer_errors_requester_only() {
    let addr = start_relay().await;

    let mut viewer = Connection::connect(&addr).await.unwrap();
    register_consumer(&mut viewer, "viewer").await;
    let mut bystander = Connection::connect(&addr).await.unwrap();
    register_consumer(&mut bystander, "bystander").await;

    request_session(&viewer, EndpointId::new(999)).await;

    let pkt = recv_skip_heartbeat(&mut viewer).await;
    assert_eq!(pkt.kind(), MessageKind::SessionError);
    let err = SessionError::from_bytes(pkt.payload()).unwrap();
    assert!(err.reason.contains("unavailable"), "{}", err.reason);

    // The failure is never broadcast.
    let quiet = timeout(Duration::from_millis(300), bystander.recv()).await;
    assert!(quiet.is_err(), "bystander received unexpected traffic");

    // The requester's registration survives the failure.
    request_session(&viewer, EndpointId::new(999)).await;
    let pkt = recv_skip_heartbeat(&mut viewer).await;
    assert_eq!(pkt.kind(), MessageKind::SessionError);
}

#[tokio::test]
async fn directed_packet_to_vanished_target_reports_sender() {
    let addr = start_relay().await;

    let mut viewer = Connection::connect(&addr).await.unwrap();
    register_consumer(&mut viewer, "viewer").await;

    let event = InteractionEvent::Click { x: 1.0, y: 2.0 };
    viewer
        .send(
            Packet::new(
                MessageKind::Interaction,
                EndpointId::RELAY,
                EndpointId::new(42),
                event.to_bytes().unwrap(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let pkt = recv_skip_heartbeat(&mut viewer).await;
    assert_eq!(pkt.kind(), MessageKind::SessionError);
    assert_eq!(pkt.from(), EndpointId::RELAY);
}

#[tokio::test]
async fn frames_are_forwarded_verbatim_with_sender_stamped() {
    let addr = start_relay().await;

    let mut producer = Connection::connect(&addr).await.unwrap();
    let pid = register_producer(&mut producer, "host-a").await;
    let mut viewer = Connection::connect(&addr).await.unwrap();
    let cid = register_consumer(&mut viewer, "viewer").await;

    let frame = FramePayload {
        frame_number: 7,
        timestamp_us: 350_000,
        data: vec![0xFF, 0xD8, 0xFF, 0xE0],
    };
    // Forged `from`: the relay must overwrite it with the real id.
    producer
        .send(
            Packet::with_flags(
                MessageKind::Frame,
                PacketFlags::STREAMING,
                EndpointId::new(12345),
                cid,
                frame.to_bytes().unwrap(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let pkt = recv_skip_heartbeat(&mut viewer).await;
    assert_eq!(pkt.kind(), MessageKind::Frame);
    assert_eq!(pkt.from(), pid);
    assert_eq!(pkt.to(), cid);
    let back = FramePayload::from_bytes(pkt.payload()).unwrap();
    assert_eq!(back, frame);
}

// ── Teardown ─────────────────────────────────────────────────────

#[tokio::test]
async fn producer_disconnect_notifies_session_peer() {
    let addr = start_relay().await;

    let mut producer = Connection::connect(&addr).await.unwrap();
    let pid = register_producer(&mut producer, "host-a").await;
    let mut viewer = Connection::connect(&addr).await.unwrap();
    let cid = register_consumer(&mut viewer, "viewer").await;

    request_session(&viewer, pid).await;
    let pkt = recv_skip_heartbeat(&mut producer).await;
    assert_eq!(pkt.kind(), MessageKind::RequestSession);
    let ack = SessionEstablished {
        capture_width: 1920,
        capture_height: 1080,
        target_fps: 20,
    };
    producer
        .send(Packet::new(MessageKind::SessionEstablished, pid, cid, ack.to_bytes().unwrap()).unwrap())
        .await
        .unwrap();
    let pkt = recv_skip_heartbeat(&mut viewer).await;
    assert_eq!(pkt.kind(), MessageKind::SessionEstablished);

    drop(producer);

    // The surviving consumer hears about it, as PeerRemoved (its
    // session died) and ProducerRemoved (the producer is gone).
    let mut saw_peer_removed = false;
    let mut saw_producer_removed = false;
    for _ in 0..2 {
        let pkt = recv_skip_heartbeat(&mut viewer).await;
        assert_eq!(pkt.kind(), MessageKind::TopologyChange);
        match TopologyChange::from_bytes(pkt.payload()).unwrap() {
            TopologyChange::PeerRemoved(id) => {
                assert_eq!(id, pid);
                saw_peer_removed = true;
            }
            TopologyChange::ProducerRemoved(id) => {
                assert_eq!(id, pid);
                saw_producer_removed = true;
            }
            other => panic!("unexpected topology event: {other:?}"),
        }
    }
    assert!(saw_peer_removed && saw_producer_removed);
}

// ── Relay robustness ─────────────────────────────────────────────

/// Register a consumer over a raw framed socket, so the test controls
/// (or withholds) every read on the transport.
async fn raw_consumer(addr: &str, name: &str) -> (Framed<TcpStream, FarCodec>, EndpointId) {
    let mut framed = Framed::new(TcpStream::connect(addr).await.unwrap(), FarCodec);
    let reg = RegisterConsumer { name: name.into() };
    framed
        .send(
            Packet::new(
                MessageKind::RegisterConsumer,
                EndpointId::RELAY,
                EndpointId::RELAY,
                reg.to_bytes().unwrap(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let ack = timeout(Duration::from_secs(5), async {
        loop {
            let pkt = framed.next().await.expect("connection closed").unwrap();
            if pkt.kind() != MessageKind::Heartbeat {
                return pkt;
            }
        }
    })
    .await
    .expect("timed out waiting for ack");
    assert_eq!(ack.kind(), MessageKind::RegisterAck);
    let id = RegisterAck::from_bytes(ack.payload()).unwrap().id;
    (framed, id)
}

#[tokio::test]
async fn stalled_peer_does_not_block_relay() {
    let addr = start_relay().await;

    // A consumer that registers and then never reads its socket again.
    let (_stalled, stalled_id) = raw_consumer(&addr, "stalled").await;

    let mut producer = Connection::connect(&addr).await.unwrap();
    let pid = register_producer(&mut producer, "host-a").await;
    let mut viewer = Connection::connect(&addr).await.unwrap();
    register_consumer(&mut viewer, "viewer").await;

    // Flood the stalled peer with directed non-frame traffic until its
    // outbound queue and socket buffers are saturated. The relay must
    // give up on the stalled transport instead of waiting for it.
    let event = InteractionEvent::TypeText {
        text: "x".repeat(1 << 20),
    };
    let payload = event.to_bytes().unwrap();
    for _ in 0..100 {
        viewer
            .send(
                Packet::new(
                    MessageKind::Interaction,
                    EndpointId::RELAY,
                    stalled_id,
                    payload.clone(),
                )
                .unwrap(),
            )
            .await
            .unwrap();
    }

    // Everyone else is still served. Packets addressed to the dropped
    // peer after its teardown come back as SessionError; skip those.
    viewer
        .send(
            Packet::new(
                MessageKind::DiscoverProducers,
                EndpointId::RELAY,
                EndpointId::RELAY,
                Vec::new(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let list = timeout(Duration::from_secs(5), async {
        loop {
            let pkt = recv_skip_heartbeat(&mut viewer).await;
            if pkt.kind() == MessageKind::ProducerList {
                return ProducerList::from_bytes(pkt.payload()).unwrap();
            }
            assert_eq!(pkt.kind(), MessageKind::SessionError);
        }
    })
    .await
    .expect("relay stopped routing for healthy peers");
    assert_eq!(list.producers.len(), 1);
    assert_eq!(list.producers[0].id, pid);
}

#[tokio::test]
async fn shutdown_completes_while_clients_connected() {
    let server = RelayServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    let stop = server.stop_handle();
    let relay = tokio::spawn(async move { server.run().await });

    // A connected, registered client must not hold shutdown hostage.
    let mut viewer = Connection::connect(&addr).await.unwrap();
    register_consumer(&mut viewer, "viewer").await;

    stop.store(false, Ordering::SeqCst);
    timeout(Duration::from_secs(2), relay)
        .await
        .expect("relay did not stop while a client was connected")
        .unwrap()
        .unwrap();
}

// ── End-to-end streaming ─────────────────────────────────────────

/// Surface producing a tiny distinct image per capture.
struct CountingSurface {
    captures: u64,
}

#[async_trait]
impl RenderSurface for CountingSurface {
    async fn load_page(&mut self, _url: &str) -> Result<(), FarError> {
        Ok(())
    }

    async fn capture_frame(&mut self, _quality: u8) -> Result<Bytes, FarError> {
        self.captures += 1;
        Ok(Bytes::from(self.captures.to_le_bytes().to_vec()))
    }

    async fn dispatch_input(&mut self, _event: &InteractionEvent) -> Result<(), FarError> {
        Ok(())
    }
}

#[tokio::test]
async fn streaming_session_end_to_end() {
    let addr = start_relay().await;

    let (surface, _driver) = spawn_driver(CountingSurface { captures: 0 });
    let config = ProducerConfig {
        relay_addr: addr.clone(),
        name: "render host".into(),
        platform: "linux".into(),
        capabilities: vec!["gpu-acceleration".into()],
        target_url: "http://example.test".into(),
        capture_width: 1920,
        capture_height: 1080,
        pump: PumpConfig::default(),
    };
    tokio::spawn(ProducerService::new(config, surface).run());

    // Discover the producer.
    let mut viewer = Connection::connect(&addr).await.unwrap();
    register_consumer(&mut viewer, "viewer").await;
    let pid = loop {
        viewer
            .send(
                Packet::new(
                    MessageKind::DiscoverProducers,
                    EndpointId::RELAY,
                    EndpointId::RELAY,
                    Vec::new(),
                )
                .unwrap(),
            )
            .await
            .unwrap();
        let pkt = recv_skip_heartbeat(&mut viewer).await;
        match pkt.kind() {
            MessageKind::ProducerList => {
                let list = ProducerList::from_bytes(pkt.payload()).unwrap();
                if let Some(info) = list.producers.first() {
                    break info.id;
                }
            }
            // Producer may register after our first poll.
            MessageKind::TopologyChange => {}
            other => panic!("unexpected {other}"),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    // Establish the session.
    request_session(&viewer, pid).await;
    let pkt = loop {
        let pkt = recv_skip_heartbeat(&mut viewer).await;
        // Skip stragglers from the discovery polling above.
        if !matches!(
            pkt.kind(),
            MessageKind::TopologyChange | MessageKind::ProducerList
        ) {
            break pkt;
        }
    };
    assert_eq!(pkt.kind(), MessageKind::SessionEstablished);
    let ack = SessionEstablished::from_bytes(pkt.payload()).unwrap();
    assert_eq!((ack.capture_width, ack.capture_height), (1920, 1080));
    assert_eq!(ack.target_fps, 20);

    // Frames arrive at the configured cadence with increasing numbers.
    let mut last = None;
    for _ in 0..10 {
        let pkt = recv_skip_heartbeat(&mut viewer).await;
        assert_eq!(pkt.kind(), MessageKind::Frame);
        assert_eq!(pkt.from(), pid);
        assert!(pkt.flags().contains(PacketFlags::STREAMING));
        let frame = FramePayload::from_bytes(pkt.payload()).unwrap();
        if let Some(prev) = last {
            assert!(frame.frame_number > prev);
        }
        last = Some(frame.frame_number);
    }

    // End the session; frames stop within a few cadence ticks.
    let end = SessionEnd { producer: pid };
    viewer
        .send(
            Packet::new(
                MessageKind::SessionEnd,
                EndpointId::RELAY,
                EndpointId::RELAY,
                end.to_bytes().unwrap(),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    // Drain in-flight frames, then expect silence.
    let drain_until = tokio::time::Instant::now() + Duration::from_millis(500);
    while tokio::time::Instant::now() < drain_until {
        match timeout(Duration::from_millis(100), viewer.recv()).await {
            Ok(Some(_)) | Err(_) => {}
            Ok(None) => panic!("connection closed"),
        }
    }
    let quiet = timeout(Duration::from_millis(400), async {
        loop {
            let pkt = viewer.recv().await.expect("connection closed");
            if pkt.kind() == MessageKind::Frame {
                return pkt;
            }
        }
    })
    .await;
    assert!(quiet.is_err(), "frames kept flowing after session end");
}
