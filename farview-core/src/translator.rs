//! Producer-side interaction translation.
//!
//! Viewer events arrive in the consumer's viewport-relative pixel
//! space. Before dispatch they are remapped into the capture
//! surface's coordinate space with a static linear scale derived from
//! the ratio of capture resolution to the consumer's last reported
//! viewport. Scroll deltas and key events pass through unscaled.
//!
//! Dispatch is fire-and-forget: failures are logged and the event is
//! dropped — replaying a stale input later would be wrong, and the
//! consumer gets its feedback from the next streamed frame anyway.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::endpoint::EndpointId;
use crate::message::InteractionEvent;
use crate::surface::SurfaceHandle;

/// Remap a point from `viewport` space into `capture` space.
///
/// Linear and invertible for non-zero viewports.
pub fn remap(capture: (u32, u32), viewport: (u32, u32), x: f64, y: f64) -> (f64, f64) {
    let sx = capture.0 as f64 / viewport.0 as f64;
    let sy = capture.1 as f64 / viewport.1 as f64;
    (x * sx, y * sy)
}

/// Translates and dispatches interaction events for one producer.
pub struct InteractionTranslator {
    surface: SurfaceHandle,
    capture: (u32, u32),
    /// Last known viewport per consumer.
    viewports: Mutex<HashMap<EndpointId, (u32, u32)>>,
}

impl InteractionTranslator {
    pub fn new(surface: SurfaceHandle, capture_width: u32, capture_height: u32) -> Self {
        Self {
            surface,
            capture: (capture_width, capture_height),
            viewports: Mutex::new(HashMap::new()),
        }
    }

    pub fn capture_size(&self) -> (u32, u32) {
        self.capture
    }

    /// Record a consumer's viewport. Zero dimensions are ignored —
    /// they would make the remap degenerate.
    pub fn set_viewport(&self, consumer: EndpointId, width: u32, height: u32) {
        if width == 0 || height == 0 {
            warn!("ignoring degenerate viewport {width}x{height} from {consumer}");
            return;
        }
        self.viewports
            .lock()
            .unwrap()
            .insert(consumer, (width, height));
    }

    /// Forget a departed consumer.
    pub fn remove_viewer(&self, consumer: EndpointId) {
        self.viewports.lock().unwrap().remove(&consumer);
    }

    /// Decode, remap, and dispatch one raw interaction payload.
    ///
    /// Undecodable payloads (unknown kinds from newer peers) are
    /// logged and dropped, never raised.
    pub async fn handle_raw(&self, from: EndpointId, payload: &[u8]) {
        match InteractionEvent::from_bytes(payload) {
            Ok(event) => self.handle(from, event).await,
            Err(e) => {
                warn!("dropping unknown interaction from {from}: {e}");
            }
        }
    }

    /// Remap and dispatch one decoded event.
    pub async fn handle(&self, from: EndpointId, event: InteractionEvent) {
        let event = self.translate(from, event);
        debug!("dispatching {event:?} for {from}");
        if let Err(e) = self.surface.dispatch_input(event).await {
            // Fire-and-forget: log and drop, never retry.
            warn!("interaction from {from} dropped: {e}");
        }
    }

    fn translate(&self, from: EndpointId, event: InteractionEvent) -> InteractionEvent {
        match event {
            InteractionEvent::Click { x, y } => {
                let (x, y) = self.scale(from, x, y);
                InteractionEvent::Click { x, y }
            }
            InteractionEvent::MouseMove { x, y } => {
                let (x, y) = self.scale(from, x, y);
                InteractionEvent::MouseMove { x, y }
            }
            // No coordinate payload — pass through.
            other @ (InteractionEvent::Scroll { .. }
            | InteractionEvent::KeyPress { .. }
            | InteractionEvent::TypeText { .. }) => other,
        }
    }

    fn scale(&self, from: EndpointId, x: f64, y: f64) -> (f64, f64) {
        let viewport = self
            .viewports
            .lock()
            .unwrap()
            .get(&from)
            .copied()
            // No viewport reported yet: assume it matches the capture
            // surface (identity remap).
            .unwrap_or(self.capture);
        remap(self.capture, viewport, x, y)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FarError;
    use crate::surface::{RenderSurface, spawn_driver};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::Arc;

    struct RecordingSurface {
        dispatched: Arc<Mutex<Vec<InteractionEvent>>>,
        fail: bool,
    }

    #[async_trait]
    impl RenderSurface for RecordingSurface {
        async fn load_page(&mut self, _url: &str) -> Result<(), FarError> {
            Ok(())
        }

        async fn capture_frame(&mut self, _quality: u8) -> Result<Bytes, FarError> {
            Ok(Bytes::new())
        }

        async fn dispatch_input(&mut self, event: &InteractionEvent) -> Result<(), FarError> {
            if self.fail {
                return Err(FarError::DispatchFailed("surface rejected input".into()));
            }
            self.dispatched.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    fn translator(fail: bool) -> (InteractionTranslator, Arc<Mutex<Vec<InteractionEvent>>>) {
        let dispatched = Arc::new(Mutex::new(Vec::new()));
        let (surface, _task) = spawn_driver(RecordingSurface {
            dispatched: Arc::clone(&dispatched),
            fail,
        });
        (InteractionTranslator::new(surface, 1920, 1080), dispatched)
    }

    #[test]
    fn remap_is_linear_and_matches_reference() {
        assert_eq!(
            remap((1920, 1080), (960, 540), 480.0, 270.0),
            (960.0, 540.0)
        );
        // Invertible: applying the inverse scale restores the input.
        let (cx, cy) = remap((1920, 1080), (960, 540), 123.0, 45.0);
        let (bx, by) = remap((960, 540), (1920, 1080), cx, cy);
        assert!((bx - 123.0).abs() < 1e-9);
        assert!((by - 45.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn click_is_scaled_with_reported_viewport() {
        let (translator, dispatched) = translator(false);
        let viewer = EndpointId::new(4);
        translator.set_viewport(viewer, 960, 540);

        translator
            .handle(viewer, InteractionEvent::Click { x: 480.0, y: 270.0 })
            .await;

        let events = dispatched.lock().unwrap();
        assert_eq!(events[0], InteractionEvent::Click { x: 960.0, y: 540.0 });
    }

    #[tokio::test]
    async fn unknown_viewer_gets_identity_remap() {
        let (translator, dispatched) = translator(false);

        translator
            .handle(
                EndpointId::new(5),
                InteractionEvent::MouseMove { x: 10.0, y: 20.0 },
            )
            .await;

        let events = dispatched.lock().unwrap();
        assert_eq!(events[0], InteractionEvent::MouseMove { x: 10.0, y: 20.0 });
    }

    #[tokio::test]
    async fn scroll_and_keys_pass_through_unscaled() {
        let (translator, dispatched) = translator(false);
        let viewer = EndpointId::new(4);
        translator.set_viewport(viewer, 960, 540);

        translator
            .handle(
                viewer,
                InteractionEvent::Scroll {
                    delta_x: 0.0,
                    delta_y: -120.0,
                },
            )
            .await;
        translator
            .handle(viewer, InteractionEvent::KeyPress { key: "Enter".into() })
            .await;

        let events = dispatched.lock().unwrap();
        assert_eq!(
            events[0],
            InteractionEvent::Scroll {
                delta_x: 0.0,
                delta_y: -120.0
            }
        );
        assert_eq!(
            events[1],
            InteractionEvent::KeyPress { key: "Enter".into() }
        );
    }

    #[tokio::test]
    async fn undecodable_payload_is_dropped() {
        let (translator, dispatched) = translator(false);
        translator
            .handle_raw(EndpointId::new(4), &[0xFF, 0xFF, 0xFF, 0xFF])
            .await;
        assert!(dispatched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatch_failure_is_swallowed() {
        let (translator, _) = translator(true);
        // Must not panic or propagate.
        translator
            .handle(EndpointId::new(4), InteractionEvent::Click { x: 1.0, y: 1.0 })
            .await;
    }

    #[tokio::test]
    async fn degenerate_viewport_ignored() {
        let (translator, dispatched) = translator(false);
        let viewer = EndpointId::new(4);
        translator.set_viewport(viewer, 0, 540);

        translator
            .handle(viewer, InteractionEvent::Click { x: 10.0, y: 10.0 })
            .await;

        // Identity remap still in effect.
        let events = dispatched.lock().unwrap();
        assert_eq!(events[0], InteractionEvent::Click { x: 10.0, y: 10.0 });
    }
}
