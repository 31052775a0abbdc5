//! # farview-core
//!
//! Core library for the Farview remote-view streaming system: render
//! hosts (producers) capture browser frames at a fixed cadence and
//! stream them through a central relay to viewers (consumers), whose
//! interactions are remapped and replayed into the remote surface.
//!
//! This crate contains:
//! - **Protocol types**: `PacketHeader`, `Packet`, `MessageKind`, `PacketFlags`
//! - **Protocol payloads**: Registration, discovery, session, frame, and interaction types
//! - **Codec**: `FarCodec` for framed TCP I/O via `tokio_util`
//! - **Network**: `Connection` for managed client connections with heartbeat
//! - **Relay**: `RelayServer` — registry, session table, and packet router
//! - **Producer**: `ProducerService`, `FramePump`, `InteractionTranslator`
//! - **Surface**: `RenderSurface` trait and the single-owner driver task
//! - **Error**: `FarError` — typed, `thiserror`-based error hierarchy

pub mod codec;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod flags;
pub mod header;
pub mod message;
pub mod packet;
pub mod producer;
pub mod pump;
pub mod registry;
pub mod relay;
pub mod session;
pub mod surface;
pub mod translator;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::FarCodec;
pub use connection::{Connection, ConnectionSender};
pub use endpoint::{Endpoint, EndpointId, EndpointMeta, Role};
pub use error::FarError;
pub use flags::PacketFlags;
pub use header::{HEADER_SIZE, PacketHeader};
pub use message::{InteractionEvent, MessageKind};
pub use packet::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, Packet};
pub use producer::{ProducerConfig, ProducerService};
pub use pump::{FramePump, PumpConfig};
pub use registry::Registry;
pub use relay::RelayServer;
pub use session::{Session, SessionState, SessionTable};
pub use surface::{RenderSurface, SurfaceHandle, spawn_driver};
pub use translator::{InteractionTranslator, remap};
