//! Endpoint identity and registry records.
//!
//! An [`Endpoint`] is one live transport connection as seen by the
//! relay. The relay assigns an [`EndpointId`] when the transport
//! connects; role and metadata are fixed at registration and never
//! mutated afterwards.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

// ── EndpointId ───────────────────────────────────────────────────

/// Opaque endpoint identifier, unique for the connection's lifetime.
///
/// Id `0` is reserved for the relay itself: packets addressed `to`
/// the relay carry it, and packets originated by the relay carry it
/// as `from`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct EndpointId(u64);

impl EndpointId {
    /// The relay's own address.
    pub const RELAY: EndpointId = EndpointId(0);

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Whether this id addresses the relay rather than a peer.
    pub fn is_relay(self) -> bool {
        self == Self::RELAY
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ── Role ─────────────────────────────────────────────────────────

/// What side of a streaming pairing an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Renders content and streams captured frames.
    Producer,
    /// Views frames and originates interaction events.
    Consumer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Producer => write!(f, "producer"),
            Role::Consumer => write!(f, "consumer"),
        }
    }
}

// ── EndpointMeta ─────────────────────────────────────────────────

/// Metadata declared at registration time.
///
/// Producers declare everything; consumers register with the default
/// (empty) metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointMeta {
    /// Human-readable name ("4090 render host").
    pub name: String,
    /// Host platform string.
    pub platform: String,
    /// Declared feature tags, e.g. "gpu-acceleration".
    pub capabilities: Vec<String>,
    /// The page a producer renders. `None` for consumers.
    pub target_url: Option<String>,
    /// Capture surface resolution (producers only).
    pub capture_width: u32,
    pub capture_height: u32,
}

// ── Endpoint ─────────────────────────────────────────────────────

/// One registered endpoint. Owned exclusively by the registry;
/// everything else refers to it by [`EndpointId`].
#[derive(Debug)]
pub struct Endpoint {
    id: EndpointId,
    role: Role,
    meta: EndpointMeta,
    last_activity: Instant,
}

impl Endpoint {
    pub fn new(id: EndpointId, role: Role, meta: EndpointMeta) -> Self {
        Self {
            id,
            role,
            meta,
            last_activity: Instant::now(),
        }
    }

    pub fn id(&self) -> EndpointId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn meta(&self) -> &EndpointMeta {
        &self.meta
    }

    pub fn capabilities(&self) -> &[String] {
        &self.meta.capabilities
    }

    pub fn target_url(&self) -> Option<&str> {
        self.meta.target_url.as_deref()
    }

    /// Refresh the activity timestamp (called on every inbound packet).
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time since the last inbound packet from this endpoint.
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_id_is_reserved() {
        assert!(EndpointId::RELAY.is_relay());
        assert!(!EndpointId::new(1).is_relay());
    }

    #[test]
    fn display_formats() {
        assert_eq!(EndpointId::new(42).to_string(), "#42");
        assert_eq!(Role::Producer.to_string(), "producer");
        assert_eq!(Role::Consumer.to_string(), "consumer");
    }

    #[test]
    fn touch_resets_idle() {
        let mut ep = Endpoint::new(EndpointId::new(1), Role::Consumer, EndpointMeta::default());
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(ep.idle_for() >= std::time::Duration::from_millis(2));
        ep.touch();
        assert!(ep.idle_for() < std::time::Duration::from_millis(2));
    }
}
