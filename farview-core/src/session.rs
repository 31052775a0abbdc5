//! Session state machine and table.
//!
//! A session pairs exactly one consumer with one producer, holding
//! only their ids — never the endpoint records themselves.
//!
//! ```text
//!  Requested ──► Established
//!      │              │
//!      ▼              ▼
//!      └───────► Closed          (terminal — no way back)
//! ```

use std::collections::HashMap;
use std::time::Instant;

use crate::endpoint::EndpointId;
use crate::error::FarError;

// ── SessionState ─────────────────────────────────────────────────

/// Lifecycle phase of one consumer↔producer pairing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Consumer asked; producer has not yet acknowledged.
    #[default]
    Requested,

    /// Producer acknowledged; frames are (about to be) flowing.
    Established {
        /// When the producer's ack was processed.
        since: Instant,
    },

    /// Terminal. A new session must be requested to resume.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => write!(f, "Requested"),
            Self::Established { .. } => write!(f, "Established"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

impl SessionState {
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Established`. Valid from: `Requested`.
    pub fn establish(&mut self) -> Result<(), FarError> {
        match self {
            Self::Requested => {
                *self = Self::Established {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(FarError::SessionTransition(
                "cannot establish: not in Requested state",
            )),
        }
    }

    /// Transition to `Closed`. Valid from: `Requested`, `Established`.
    pub fn close(&mut self) -> Result<(), FarError> {
        match self {
            Self::Requested | Self::Established { .. } => {
                *self = Self::Closed;
                Ok(())
            }
            Self::Closed => Err(FarError::SessionTransition(
                "cannot close: session already closed",
            )),
        }
    }
}

// ── Session ──────────────────────────────────────────────────────

/// One pairing. Holds ids only; existence of the referenced endpoints
/// is the registry's business.
#[derive(Debug)]
pub struct Session {
    consumer: EndpointId,
    producer: EndpointId,
    state: SessionState,
}

impl Session {
    pub fn new(consumer: EndpointId, producer: EndpointId) -> Self {
        Self {
            consumer,
            producer,
            state: SessionState::Requested,
        }
    }

    pub fn consumer(&self) -> EndpointId {
        self.consumer
    }

    pub fn producer(&self) -> EndpointId {
        self.producer
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn references(&self, id: EndpointId) -> bool {
        self.consumer == id || self.producer == id
    }
}

// ── SessionTable ─────────────────────────────────────────────────

/// All live sessions, keyed by (consumer, producer). Closed sessions
/// are dropped from the table once both sides have been told.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<(EndpointId, EndpointId), Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a consumer's request. At most one session exists per
    /// pair; a repeated request returns the existing session's state
    /// instead of creating a duplicate.
    pub fn request(&mut self, consumer: EndpointId, producer: EndpointId) -> &SessionState {
        let session = self
            .sessions
            .entry((consumer, producer))
            .or_insert_with(|| Session::new(consumer, producer));
        session.state()
    }

    /// Mark a pairing established (producer acknowledged).
    pub fn establish(
        &mut self,
        consumer: EndpointId,
        producer: EndpointId,
    ) -> Result<(), FarError> {
        let session = self
            .sessions
            .get_mut(&(consumer, producer))
            .ok_or(FarError::SessionTransition("no such session"))?;
        session.state.establish()
    }

    pub fn get(&self, consumer: EndpointId, producer: EndpointId) -> Option<&Session> {
        self.sessions.get(&(consumer, producer))
    }

    /// Close and remove one pairing. Idempotent.
    pub fn close_pair(&mut self, consumer: EndpointId, producer: EndpointId) -> bool {
        match self.sessions.remove(&(consumer, producer)) {
            Some(mut session) => {
                // Infallible from Requested/Established.
                let _ = session.state.close();
                true
            }
            None => false,
        }
    }

    /// Close every session referencing `id` (endpoint vanished).
    /// Returns the (consumer, producer) pairs that were torn down.
    pub fn close_for_endpoint(&mut self, id: EndpointId) -> Vec<(EndpointId, EndpointId)> {
        let doomed: Vec<(EndpointId, EndpointId)> = self
            .sessions
            .values()
            .filter(|s| s.references(id))
            .map(|s| (s.consumer, s.producer))
            .collect();

        for key in &doomed {
            if let Some(mut session) = self.sessions.remove(key) {
                let _ = session.state.close();
            }
        }
        doomed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────
