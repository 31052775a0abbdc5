//! Chrome DevTools Protocol render surface.
//!
//! Attaches to an already-running browser's page target over its
//! DevTools WebSocket and drives it with JSON-RPC: `Page.navigate`
//! for loads, `Page.captureScreenshot` for frames, `Input.*` for
//! interaction replay. The browser is launched separately with remote
//! debugging enabled; this process never owns its lifecycle.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use farview_core::message::InteractionEvent;
use farview_core::surface::RenderSurface;
use farview_core::FarError;

/// Per-command response deadline.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);
/// How long a navigation may take to fire its load event.
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A page target driven over the DevTools protocol.
pub struct CdpSurface {
    ws: WsStream,
    next_id: u64,
    /// Last mouse position, for wheel events which need coordinates.
    mouse_pos: (f64, f64),
}

impl CdpSurface {
    /// Attach to the page target at `devtools_url`.
    pub async fn connect(devtools_url: &str) -> Result<Self, FarError> {
        let (ws, _) = connect_async(devtools_url)
            .await
            .map_err(|e| FarError::Other(format!("devtools connect failed: {e}")))?;

        let mut surface = Self {
            ws,
            next_id: 1,
            mouse_pos: (0.0, 0.0),
        };
        // Page events (load notifications) are off by default.
        surface.call("Page.enable", json!({})).await?;
        Ok(surface)
    }

    /// Issue one protocol command and wait for its response, skipping
    /// unrelated events.
    async fn call(&mut self, method: &str, params: Value) -> Result<Value, FarError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = json!({ "id": id, "method": method, "params": params });
        self.ws
            .send(Message::Text(request.to_string()))
            .await
            .map_err(|e| FarError::Other(format!("devtools send failed: {e}")))?;

        tokio::time::timeout(CALL_TIMEOUT, self.read_response(id))
            .await
            .map_err(|_| FarError::Timeout(CALL_TIMEOUT))?
    }

    async fn read_response(&mut self, id: u64) -> Result<Value, FarError> {
        loop {
            let msg = match self.ws.next().await {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    return Err(FarError::Other(format!("devtools read failed: {e}")));
                }
                None => return Err(FarError::ChannelClosed),
            };
            let Message::Text(text) = msg else { continue };
            let value: Value = serde_json::from_str(&text)
                .map_err(|e| FarError::Encoding(e.to_string()))?;

            if value.get("id").and_then(Value::as_u64) != Some(id) {
                // Unsolicited event — not ours.
                continue;
            }
            if let Some(err) = value.get("error") {
                return Err(FarError::Other(format!("devtools error: {err}")));
            }
            return Ok(value.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    /// Block until the page fires its load event.
    async fn await_load(&mut self) -> Result<(), FarError> {
        let wait = async {
            loop {
                let msg = match self.ws.next().await {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        return Err(FarError::Other(format!("devtools read failed: {e}")));
                    }
                    None => return Err(FarError::ChannelClosed),
                };
                let Message::Text(text) = msg else { continue };
                let value: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(_) => continue,
                };
                if value.get("method").and_then(Value::as_str) == Some("Page.loadEventFired") {
                    return Ok(());
                }
            }
        };
        tokio::time::timeout(LOAD_TIMEOUT, wait)
            .await
            .map_err(|_| FarError::Timeout(LOAD_TIMEOUT))?
    }

    async fn mouse_event(
        &mut self,
        kind: &str,
        x: f64,
        y: f64,
        extra: Value,
    ) -> Result<(), FarError> {
        let mut params = json!({ "type": kind, "x": x, "y": y });
        if let (Some(obj), Some(more)) = (params.as_object_mut(), extra.as_object()) {
            obj.extend(more.clone());
        }
        self.call("Input.dispatchMouseEvent", params)
            .await
            .map_err(|e| FarError::DispatchFailed(e.to_string()))?;
        Ok(())
    }

    async fn key_event(&mut self, kind: &str, key: &str) -> Result<(), FarError> {
        self.call(
            "Input.dispatchKeyEvent",
            json!({ "type": kind, "key": key }),
        )
        .await
        .map_err(|e| FarError::DispatchFailed(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl RenderSurface for CdpSurface {
    async fn load_page(&mut self, url: &str) -> Result<(), FarError> {
        debug!("navigating to {url}");
        let result = self
            .call("Page.navigate", json!({ "url": url }))
            .await
            .map_err(|e| FarError::LoadFailed(e.to_string()))?;

        if let Some(err) = result.get("errorText").and_then(Value::as_str) {
            if !err.is_empty() {
                return Err(FarError::LoadFailed(err.to_string()));
            }
        }
        self.await_load()
            .await
            .map_err(|e| FarError::LoadFailed(e.to_string()))
    }

    async fn capture_frame(&mut self, quality: u8) -> Result<Bytes, FarError> {
        let result = self
            .call(
                "Page.captureScreenshot",
                json!({ "format": "jpeg", "quality": quality }),
            )
            .await
            .map_err(|e| FarError::CaptureFailed(e.to_string()))?;

        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| FarError::CaptureFailed("screenshot response had no data".into()))?;
        let bytes = BASE64
            .decode(data)
            .map_err(|e| FarError::CaptureFailed(format!("bad screenshot encoding: {e}")))?;
        Ok(Bytes::from(bytes))
    }

    async fn dispatch_input(&mut self, event: &InteractionEvent) -> Result<(), FarError> {
        match event {
            InteractionEvent::Click { x, y } => {
                self.mouse_pos = (*x, *y);
                let button = json!({ "button": "left", "clickCount": 1 });
                self.mouse_event("mousePressed", *x, *y, button.clone()).await?;
                self.mouse_event("mouseReleased", *x, *y, button).await
            }
            InteractionEvent::MouseMove { x, y } => {
                self.mouse_pos = (*x, *y);
                self.mouse_event("mouseMoved", *x, *y, json!({})).await
            }
            InteractionEvent::Scroll { delta_x, delta_y } => {
                let (x, y) = self.mouse_pos;
                self.mouse_event(
                    "mouseWheel",
                    x,
                    y,
                    json!({ "deltaX": delta_x, "deltaY": delta_y }),
                )
                .await
            }
            InteractionEvent::KeyPress { key } => {
                self.key_event("keyDown", key).await?;
                self.key_event("keyUp", key).await
            }
            InteractionEvent::TypeText { text } => {
                self.call("Input.insertText", json!({ "text": text }))
                    .await
                    .map_err(|e| FarError::DispatchFailed(e.to_string()))?;
                Ok(())
            }
        }
    }
}
