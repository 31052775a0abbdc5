//! Domain-specific error types for the Farview protocol.
//!
//! All fallible operations return `Result<T, FarError>`.
//! No panics on remote input — every error is typed and recoverable.

use std::time::Duration;
use thiserror::Error;

use crate::endpoint::{EndpointId, Role};

/// The canonical error type for the Farview protocol.
#[derive(Debug, Error)]
pub enum FarError {
    // ── Registry / Routing Errors ────────────────────────────────
    /// The connection id is already registered (registration is set-once).
    #[error("endpoint {id} is already registered as {existing}")]
    DuplicateRegistration { id: EndpointId, existing: Role },

    /// A directed message named a target that is not currently connected.
    #[error("target endpoint {0} is unavailable")]
    TargetUnavailable(EndpointId),

    /// A session was requested against a producer that does not exist.
    #[error("producer {0} is unavailable")]
    ProducerUnavailable(EndpointId),

    /// The endpoint sent traffic that requires registration first.
    #[error("endpoint {0} is not registered")]
    NotRegistered(EndpointId),

    // ── Session Errors ───────────────────────────────────────────
    /// A session state transition was attempted out of order.
    #[error("invalid session transition: {0}")]
    SessionTransition(&'static str),

    // ── Capability Surface Errors ────────────────────────────────
    /// A frame capture attempt failed. Transient — retried on the next tick.
    #[error("frame capture failed: {0}")]
    CaptureFailed(String),

    /// An interaction could not be replayed into the surface.
    /// Logged and dropped — replaying stale input later is wrong.
    #[error("input dispatch failed: {0}")]
    DispatchFailed(String),

    /// Page load failed after all retries.
    #[error("page load failed: {0}")]
    LoadFailed(String),

    // ── Protocol Errors ──────────────────────────────────────────
    /// Received bytes that do not start with the FAR0 magic sequence.
    #[error("invalid magic bytes: expected FAR0")]
    InvalidMagic,

    /// A field in the packet header could not be parsed.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The packet payload failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    // ── Packet Errors ────────────────────────────────────────────
    /// The payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for FarError {
    fn from(s: String) -> Self {
        FarError::Other(s)
    }
}

impl From<&str> for FarError {
    fn from(s: &str) -> Self {
        FarError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for FarError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        FarError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for FarError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        FarError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for FarError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        FarError::Encoding(e.to_string())
    }
}
