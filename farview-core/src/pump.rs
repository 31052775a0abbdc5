//! Producer-side frame pump.
//!
//! For a producer with at least one recipient, repeatedly captures a
//! frame through the surface driver and fans it out to every current
//! recipient via the relay connection, at a fixed target cadence.
//!
//! Design rules (see the capture loop):
//! - capture is never pipelined ahead of delivery — the next tick is
//!   scheduled only after the current attempt finishes, so a slow
//!   surface degrades the frame rate instead of queueing frames;
//! - a failed capture is logged and skipped, never fatal;
//! - the pump stops itself when the recipient set empties, and is
//!   respawned by [`add_recipient`](FramePump::add_recipient).

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::connection::ConnectionSender;
use crate::endpoint::EndpointId;
use crate::error::FarError;
use crate::flags::PacketFlags;
use crate::message::{FramePayload, MessageKind};
use crate::packet::Packet;
use crate::surface::SurfaceHandle;

// ── PumpConfig ───────────────────────────────────────────────────

/// Configuration for [`FramePump`].
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Time between capture ticks. 50 ms ≈ 20 captures/second.
    pub interval: Duration,
    /// Initial capture quality (0-100).
    pub quality: u8,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            quality: 80,
        }
    }
}

impl PumpConfig {
    /// Cadence expressed as frames per second, for session acks.
    pub fn target_fps(&self) -> u8 {
        let secs = self.interval.as_secs_f64();
        if secs <= 0.0 {
            return u8::MAX;
        }
        (1.0 / secs).round().clamp(1.0, 255.0) as u8
    }
}

// ── FramePump ────────────────────────────────────────────────────

struct PumpShared {
    self_id: EndpointId,
    surface: SurfaceHandle,
    out: ConnectionSender,
    /// Current recipients, insertion order.
    recipients: Mutex<Vec<EndpointId>>,
    running: AtomicBool,
    quality: AtomicU8,
    interval: Duration,
}

/// Cloneable handle to a producer's capture loop.
#[derive(Clone)]
pub struct FramePump {
    inner: Arc<PumpShared>,
}

impl FramePump {
    pub fn new(
        self_id: EndpointId,
        surface: SurfaceHandle,
        out: ConnectionSender,
        config: PumpConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PumpShared {
                self_id,
                surface,
                out,
                recipients: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                quality: AtomicU8::new(config.quality.min(100)),
                interval: config.interval,
            }),
        }
    }

    /// Add a frame recipient, starting the capture loop if it is not
    /// already running.
    ///
    /// The push and the liveness flip happen under the `recipients`
    /// lock — the same lock the loop holds for its empty-check — so a
    /// concurrent add can never land between the loop seeing an empty
    /// set and it clearing `running`.
    pub fn add_recipient(&self, id: EndpointId) {
        let mut recipients = self.inner.recipients.lock().unwrap();
        if !recipients.contains(&id) {
            recipients.push(id);
        }
        if !self.inner.running.swap(true, Ordering::SeqCst) {
            let shared = Arc::clone(&self.inner);
            tokio::spawn(run(shared));
        }
    }

    /// Remove a recipient. The loop notices an empty set on its next
    /// tick and stops itself.
    pub fn remove_recipient(&self, id: EndpointId) {
        self.inner.recipients.lock().unwrap().retain(|&r| r != id);
    }

    pub fn recipient_count(&self) -> usize {
        self.inner.recipients.lock().unwrap().len()
    }

    /// Adjust capture quality. Applies from the next capture on;
    /// frames already captured are unaffected.
    pub fn set_quality(&self, quality: u8) {
        self.inner.quality.store(quality.min(100), Ordering::SeqCst);
    }

    pub fn quality(&self) -> u8 {
        self.inner.quality.load(Ordering::SeqCst)
    }

    /// Signal the loop to stop regardless of recipients.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }
}

// ── Capture loop ─────────────────────────────────────────────────

async fn run(shared: Arc<PumpShared>) {
    let started = Instant::now();
    let mut frame_number: u64 = 0;
    let mut stat_frames: u64 = 0;
    let mut stat_bytes: u64 = 0;
    let mut last_stats = Instant::now();

    debug!("frame pump started (interval {:?})", shared.interval);

    while shared.running.load(Ordering::SeqCst) {
        let tick_start = Instant::now();

        // Liveness check before each unit of work. Clearing `running`
        // must happen while the set is provably still empty, i.e.
        // under the same lock `add_recipient` takes.
        let recipients: Vec<EndpointId> = {
            let guard = shared.recipients.lock().unwrap();
            if guard.is_empty() {
                shared.running.store(false, Ordering::SeqCst);
                break;
            }
            guard.clone()
        };

        let quality = shared.quality.load(Ordering::SeqCst);
        match shared.surface.capture_frame(quality).await {
            Err(FarError::ChannelClosed) => {
                // The surface driver is gone; no capture will ever
                // succeed again.
                warn!("surface lost, stopping frame pump");
                shared.running.store(false, Ordering::SeqCst);
                break;
            }
            Err(e) => {
                // Transient — skip this tick, try again on the next.
                warn!("frame capture failed: {e}");
            }
            Ok(data) => {
                let payload = FramePayload {
                    frame_number,
                    timestamp_us: started.elapsed().as_micros() as u64,
                    data: data.to_vec(),
                };
                match payload.to_bytes() {
                    Err(e) => warn!("frame encode failed: {e}"),
                    Ok(bytes) => {
                        let size = bytes.len() as u64;
                        for recipient in &recipients {
                            let packet = match Packet::with_flags(
                                MessageKind::Frame,
                                PacketFlags::STREAMING,
                                shared.self_id,
                                *recipient,
                                bytes.clone(),
                            ) {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!("frame packet build failed: {e}");
                                    break;
                                }
                            };
                            if shared.out.send(packet).await.is_err() {
                                // Relay connection gone — nothing left
                                // to stream to.
                                shared.running.store(false, Ordering::SeqCst);
                                break;
                            }
                            stat_frames += 1;
                            stat_bytes += size;
                        }
                        frame_number += 1;
                    }
                }
            }
        }

        if last_stats.elapsed() > Duration::from_secs(1) {
            debug!(
                "streamed {stat_frames} frames / {stat_bytes} bytes to {} recipient(s)",
                recipients.len()
            );
            stat_frames = 0;
            stat_bytes = 0;
            last_stats = Instant::now();
        }

        pace(tick_start, shared.interval).await;
    }

    debug!("frame pump stopped after {frame_number} capture(s)");
}

/// Sleep for the remainder of the tick interval.
async fn pace(tick_start: Instant, interval: Duration) {
    let elapsed = tick_start.elapsed();
    if elapsed < interval {
        tokio::time::sleep(interval - elapsed).await;
    }
}

// ── Tests ────────────────────────────────────────────────────────
