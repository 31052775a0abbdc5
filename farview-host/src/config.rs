//! Configuration for the render host process.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use farview_core::{ProducerConfig, PumpConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Relay connection settings.
    pub relay: RelayTarget,
    /// What this host declares about itself.
    pub producer: ProducerSettings,
    /// Capture geometry and cadence.
    pub capture: CaptureConfig,
    /// The browser this host drives.
    pub browser: BrowserConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Where the relay lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayTarget {
    /// Relay address, "host:port".
    pub addr: String,
}

/// Registration metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerSettings {
    /// Human-readable host name.
    pub name: String,
    /// Declared feature tags.
    pub capabilities: Vec<String>,
    /// The page to render and stream.
    pub target_url: String,
}

/// Capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Capture surface width in pixels.
    pub width: u32,
    /// Capture surface height in pixels.
    pub height: u32,
    /// Milliseconds between captures. 50 ≈ 20 frames per second.
    pub interval_ms: u64,
    /// JPEG quality (0-100).
    pub quality: u8,
}

/// Browser attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// DevTools WebSocket URL of the page target to drive. The
    /// browser itself is launched separately with remote debugging
    /// enabled.
    pub devtools_url: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            relay: RelayTarget::default(),
            producer: ProducerSettings::default(),
            capture: CaptureConfig::default(),
            browser: BrowserConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RelayTarget {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7500".into(),
        }
    }
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            name: "render host".into(),
            capabilities: vec!["gpu-acceleration".into()],
            target_url: "http://localhost:3000".into(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            interval_ms: 50,
            quality: 80,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            devtools_url: "ws://127.0.0.1:9222/devtools/page/main".into(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Assemble the producer service configuration.
    pub fn to_producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            relay_addr: self.relay.addr.clone(),
            name: self.producer.name.clone(),
            platform: std::env::consts::OS.to_string(),
            capabilities: self.producer.capabilities.clone(),
            target_url: self.producer.target_url.clone(),
            capture_width: self.capture.width,
            capture_height: self.capture.height,
            pump: PumpConfig {
                interval: Duration::from_millis(self.capture.interval_ms.max(1)),
                quality: self.capture.quality.min(100),
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = HostConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("devtools_url"));
        assert!(text.contains("interval_ms"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = HostConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: HostConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.capture.interval_ms, 50);
        assert_eq!(parsed.capture.quality, 80);
    }

    #[test]
    fn to_producer_config_maps_cadence() {
        let mut cfg = HostConfig::default();
        cfg.capture.interval_ms = 100;
        cfg.capture.quality = 150; // clamped
        let pc = cfg.to_producer_config();
        assert_eq!(pc.pump.interval, Duration::from_millis(100));
        assert_eq!(pc.pump.quality, 100);
        assert_eq!(pc.pump.target_fps(), 10);
    }
}
