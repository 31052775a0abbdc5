//! Capability surface — the abstracted rendering engine.
//!
//! The engine itself (a browser, typically) is an external process;
//! this module defines the trait a producer drives it through and a
//! single-owner driver task that serializes all access to it. The
//! frame pump and the interaction translator both go through the
//! driver handle, so a capture can never interleave with an input
//! dispatch on the underlying engine.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::FarError;
use crate::message::InteractionEvent;

// ── RenderSurface ────────────────────────────────────────────────

/// A controllable rendering engine.
#[async_trait]
pub trait RenderSurface: Send + 'static {
    /// Navigate the surface to `url` and wait for it to settle.
    async fn load_page(&mut self, url: &str) -> Result<(), FarError>;

    /// Capture the current visual state as one encoded still image.
    ///
    /// `quality` is a 0-100 compression hint; the surface may ignore
    /// it. Failure is transient ([`FarError::CaptureFailed`]) — the
    /// pump retries on its next tick.
    async fn capture_frame(&mut self, quality: u8) -> Result<Bytes, FarError>;

    /// Replay one interaction event, already remapped into this
    /// surface's coordinate space.
    async fn dispatch_input(&mut self, event: &InteractionEvent) -> Result<(), FarError>;
}

// ── SurfaceDriver ────────────────────────────────────────────────

enum SurfaceCommand {
    Load {
        url: String,
        reply: oneshot::Sender<Result<(), FarError>>,
    },
    Capture {
        quality: u8,
        reply: oneshot::Sender<Result<Bytes, FarError>>,
    },
    Dispatch {
        event: InteractionEvent,
        reply: oneshot::Sender<Result<(), FarError>>,
    },
}

/// Cloneable handle to the surface driver task.
///
/// Commands are executed strictly in arrival order by the one task
/// that owns the surface.
#[derive(Clone)]
pub struct SurfaceHandle {
    tx: mpsc::Sender<SurfaceCommand>,
}

impl SurfaceHandle {
    pub async fn load_page(&self, url: &str) -> Result<(), FarError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SurfaceCommand::Load {
                url: url.to_string(),
                reply,
            })
            .await?;
        rx.await?
    }

    pub async fn capture_frame(&self, quality: u8) -> Result<Bytes, FarError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SurfaceCommand::Capture { quality, reply })
            .await?;
        rx.await?
    }

    pub async fn dispatch_input(&self, event: InteractionEvent) -> Result<(), FarError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SurfaceCommand::Dispatch { event, reply })
            .await?;
        rx.await?
    }

    /// Resolves once the driver task is gone (surface lost).
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

/// Spawn the driver task that exclusively owns `surface`.
///
/// The task exits when every handle is dropped. Dropping the returned
/// `JoinHandle` detaches it.
pub fn spawn_driver<S: RenderSurface>(mut surface: S) -> (SurfaceHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<SurfaceCommand>(32);

    let task = tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                SurfaceCommand::Load { url, reply } => {
                    let _ = reply.send(surface.load_page(&url).await);
                }
                SurfaceCommand::Capture { quality, reply } => {
                    let _ = reply.send(surface.capture_frame(quality).await);
                }
                SurfaceCommand::Dispatch { event, reply } => {
                    let _ = reply.send(surface.dispatch_input(&event).await);
                }
            }
        }
    });

    (SurfaceHandle { tx }, task)
}

// ── Tests ────────────────────────────────────────────────────────
