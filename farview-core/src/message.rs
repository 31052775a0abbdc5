//! Protocol message kinds and typed payloads.
//!
//! The header carries a numeric [`MessageKind`] plus routing ids; the
//! payload is a bincode-serialised struct from this module. The relay
//! looks only at the kind — payload bodies are opaque to it.
//!
//! # Wire Protocol
//!
//! ## Registration
//! ```text
//! Producer ──[RegisterProducer]──────────────► Relay
//!   Payload: RegisterProducer (bincode)
//!
//! Relay    ──[RegisterAck]───────────────────► Producer
//!   Payload: RegisterAck
//!
//! Relay    ──[TopologyChange]────────────────► every Consumer
//!   Payload: TopologyChange::ProducerAdded
//! ```
//!
//! ## Session setup
//! ```text
//! Consumer ──[RequestSession]────────────────► Relay ──► Producer
//! Producer ──[SessionEstablished]────────────► Relay ──► Consumer
//! ```
//!
//! ## Streaming (continuous)
//! ```text
//! Producer ──[Frame + STREAMING]─────────────► Relay ──► Consumer
//! Consumer ──[Interaction]───────────────────► Relay ──► Producer
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::endpoint::{EndpointId, EndpointMeta};
use crate::error::FarError;

// ── MessageKind ──────────────────────────────────────────────────

/// All message kinds understood by the Farview protocol.
///
/// Organized by category:
/// - `0x0001..0x000F` — Connection-level (heartbeat)
/// - `0x0010..0x001F` — Registration
/// - `0x0020..0x002F` — Discovery
/// - `0x0030..0x003F` — Session lifecycle
/// - `0x0040..0x004F` — Frame streaming
/// - `0x0050..0x005F` — Interaction replay
/// - `0x0060..0x006F` — Topology
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Keep-alive; refreshes the sender's activity timestamp.
    Heartbeat = 0x0001,

    /// Declare this connection a producer (capabilities + target URL).
    RegisterProducer = 0x0010,
    /// Declare this connection a consumer.
    RegisterConsumer = 0x0011,
    /// Relay's answer to either registration, carrying the assigned id.
    RegisterAck = 0x0012,

    /// Ask the relay for the current producer list.
    DiscoverProducers = 0x0020,
    /// The producer list, insertion order.
    ProducerList = 0x0021,

    /// Consumer asks for a session with a specific producer.
    RequestSession = 0x0030,
    /// Producer acknowledges; relay forwards to the consumer.
    SessionEstablished = 0x0031,
    /// Consumer ends its session with a producer.
    SessionEnd = 0x0032,
    /// Relay reports a session/routing failure to one endpoint.
    SessionError = 0x0033,

    /// One captured still frame.
    Frame = 0x0040,

    /// A viewer interaction to replay into the render surface.
    Interaction = 0x0050,
    /// Change capture quality for subsequent frames.
    QualityChange = 0x0051,
    /// Consumer's viewport changed; updates the coordinate remap.
    ViewportChange = 0x0052,

    /// A peer appeared or vanished.
    TopologyChange = 0x0060,
}

impl TryFrom<u32> for MessageKind {
    type Error = FarError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(MessageKind::Heartbeat),

            0x0010 => Ok(MessageKind::RegisterProducer),
            0x0011 => Ok(MessageKind::RegisterConsumer),
            0x0012 => Ok(MessageKind::RegisterAck),

            0x0020 => Ok(MessageKind::DiscoverProducers),
            0x0021 => Ok(MessageKind::ProducerList),

            0x0030 => Ok(MessageKind::RequestSession),
            0x0031 => Ok(MessageKind::SessionEstablished),
            0x0032 => Ok(MessageKind::SessionEnd),
            0x0033 => Ok(MessageKind::SessionError),

            0x0040 => Ok(MessageKind::Frame),

            0x0050 => Ok(MessageKind::Interaction),
            0x0051 => Ok(MessageKind::QualityChange),
            0x0052 => Ok(MessageKind::ViewportChange),

            0x0060 => Ok(MessageKind::TopologyChange),

            _ => Err(FarError::UnknownVariant {
                type_name: "MessageKind",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl MessageKind {
    /// Kinds the relay consumes itself; everything else is forwarded
    /// to the endpoint named in the header's `to` field.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            MessageKind::Heartbeat
                | MessageKind::RegisterProducer
                | MessageKind::RegisterConsumer
                | MessageKind::DiscoverProducers
                | MessageKind::RequestSession
                | MessageKind::SessionEnd
        )
    }
}

// ── Payload helpers ──────────────────────────────────────────────

macro_rules! wire_payload {
    ($ty:ty) => {
        impl $ty {
            /// Serialize to bytes.
            pub fn to_bytes(&self) -> Result<Vec<u8>, FarError> {
                bincode::serialize(self).map_err(|e| FarError::Encoding(e.to_string()))
            }

            /// Deserialize from bytes.
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, FarError> {
                bincode::deserialize(bytes).map_err(|e| FarError::Encoding(e.to_string()))
            }
        }
    };
}

// ── Registration ─────────────────────────────────────────────────

/// Producer registration payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterProducer {
    pub name: String,
    pub platform: String,
    pub capabilities: Vec<String>,
    pub target_url: String,
    pub capture_width: u32,
    pub capture_height: u32,
}

wire_payload!(RegisterProducer);

impl RegisterProducer {
    pub fn into_meta(self) -> EndpointMeta {
        EndpointMeta {
            name: self.name,
            platform: self.platform,
            capabilities: self.capabilities,
            target_url: Some(self.target_url),
            capture_width: self.capture_width,
            capture_height: self.capture_height,
        }
    }
}

/// Consumer registration payload. Nothing is required, but a named
/// type keeps the wire format extensible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterConsumer {
    pub name: String,
}

wire_payload!(RegisterConsumer);

/// Relay's registration acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterAck {
    /// The id the relay assigned to this connection.
    pub id: EndpointId,
}

wire_payload!(RegisterAck);

// ── Discovery ────────────────────────────────────────────────────

/// One discoverable producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerInfo {
    pub id: EndpointId,
    pub name: String,
    pub capabilities: Vec<String>,
    pub target_url: String,
}

/// Answer to [`MessageKind::DiscoverProducers`], insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerList {
    pub producers: Vec<ProducerInfo>,
}

wire_payload!(ProducerList);

// ── Session lifecycle ────────────────────────────────────────────

/// Consumer's session request. Carries the viewport so the producer
/// can derive the interaction coordinate remap before the first
/// event arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSession {
    pub producer: EndpointId,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

wire_payload!(RequestSession);

/// Producer's acceptance, forwarded to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEstablished {
    pub capture_width: u32,
    pub capture_height: u32,
    /// Capture cadence the producer will stream at.
    pub target_fps: u8,
}

wire_payload!(SessionEstablished);

/// Consumer ends its session with `producer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnd {
    pub producer: EndpointId,
}

wire_payload!(SessionEnd);

/// Relay-reported failure, delivered only to the endpoint concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    pub reason: String,
}

wire_payload!(SessionError);

// ── Frames ───────────────────────────────────────────────────────

/// One captured still frame. Opaque image bytes — the relay and the
/// protocol never look inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramePayload {
    /// Sequential frame number (0-based, per producer).
    pub frame_number: u64,
    /// Capture timestamp in microseconds since the pump started.
    pub timestamp_us: u64,
    /// Encoded image bytes.
    pub data: Vec<u8>,
}

wire_payload!(FramePayload);

// ── Interaction ──────────────────────────────────────────────────

/// A viewer interaction, in the coordinate space the consumer saw.
///
/// Coordinates are remapped into the capture surface's space by the
/// producer's translator before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InteractionEvent {
    Click { x: f64, y: f64 },
    MouseMove { x: f64, y: f64 },
    Scroll { delta_x: f64, delta_y: f64 },
    KeyPress { key: String },
    TypeText { text: String },
}

wire_payload!(InteractionEvent);

/// Consumer-driven capture quality adjustment (0-100). Affects only
/// subsequent captures, never frames already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityChange {
    pub quality: u8,
}

wire_payload!(QualityChange);

/// Consumer's viewport size changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportChange {
    pub width: u32,
    pub height: u32,
}

wire_payload!(ViewportChange);

// ── Topology ─────────────────────────────────────────────────────

/// Relay notification that the set of connected peers changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyChange {
    /// A new producer registered and is available for sessions.
    ProducerAdded(ProducerInfo),
    /// A producer deregistered or disconnected.
    ProducerRemoved(EndpointId),
    /// A session peer vanished; directed at the surviving side.
    PeerRemoved(EndpointId),
}

wire_payload!(TopologyChange);

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_roundtrip() {
        let kinds = [
            MessageKind::Heartbeat,
            MessageKind::RegisterProducer,
            MessageKind::RegisterConsumer,
            MessageKind::RegisterAck,
            MessageKind::DiscoverProducers,
            MessageKind::ProducerList,
            MessageKind::RequestSession,
            MessageKind::SessionEstablished,
            MessageKind::SessionEnd,
            MessageKind::SessionError,
            MessageKind::Frame,
            MessageKind::Interaction,
            MessageKind::QualityChange,
            MessageKind::ViewportChange,
            MessageKind::TopologyChange,
        ];
        for kind in kinds {
            assert_eq!(MessageKind::try_from(kind as u32).unwrap(), kind);
        }
    }

    #[test]
    fn kind_invalid() {
        assert!(MessageKind::try_from(0xDEAD).is_err());
    }

    #[test]
    fn control_kinds() {
        assert!(MessageKind::RequestSession.is_control());
        assert!(MessageKind::Heartbeat.is_control());
        assert!(!MessageKind::Frame.is_control());
        assert!(!MessageKind::Interaction.is_control());
        assert!(!MessageKind::SessionEstablished.is_control());
    }

    #[test]
    fn register_producer_roundtrip() {
        let reg = RegisterProducer {
            name: "render host".into(),
            platform: "linux".into(),
            capabilities: vec!["gpu-acceleration".into()],
            target_url: "http://example.test".into(),
            capture_width: 1920,
            capture_height: 1080,
        };
        let bytes = reg.to_bytes().unwrap();
        let back = RegisterProducer::from_bytes(&bytes).unwrap();
        assert_eq!(reg, back);

        let meta = back.into_meta();
        assert_eq!(meta.target_url.as_deref(), Some("http://example.test"));
        assert_eq!(meta.capture_width, 1920);
    }

    #[test]
    fn interaction_unknown_discriminant_fails_decode() {
        // bincode enum discriminant 99 maps to nothing — the producer
        // logs and drops such events instead of erroring out.
        let mut bytes = InteractionEvent::Click { x: 1.0, y: 2.0 }.to_bytes().unwrap();
        bytes[0] = 99;
        assert!(InteractionEvent::from_bytes(&bytes).is_err());
    }

    #[test]
    fn frame_payload_is_opaque_bytes() {
        let frame = FramePayload {
            frame_number: 3,
            timestamp_us: 1_000_000,
            data: vec![0xFF, 0xD8, 0xFF],
        };
        let back = FramePayload::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(back.data, vec![0xFF, 0xD8, 0xFF]);
    }
}
