//! Configuration for the collector.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use camlink_core::TransferVariant;
use camlink_core::wire::DEFAULT_MAX_FRAME_SIZE;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// One entry per listening port.
    pub listeners: Vec<ListenerConfig>,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

/// What a listener expects on each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Length-prefixed frames over one long-lived connection.
    Stream,
    /// One photo per connection, body runs until the sender closes.
    Photo,
    /// One clip per connection, body length declared up front.
    Clip,
}

impl Protocol {
    /// Transfer variant for file protocols, `None` for streaming.
    pub fn transfer_variant(self) -> Option<TransferVariant> {
        match self {
            Self::Stream => None,
            Self::Photo => Some(TransferVariant::UntilClose),
            Self::Clip => Some(TransferVariant::Sized),
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Photo => write!(f, "photo"),
            Self::Clip => write!(f, "clip"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Name used in logs and as the storage subdirectory.
    pub label: String,
    pub bind_address: String,
    /// 0 picks an ephemeral port.
    pub port: u16,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for everything received. Created on demand.
    pub receive_dir: String,
    /// Larger stream frames are treated as a corrupt connection.
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            listeners: vec![
                ListenerConfig::new("rear", 9000, Protocol::Stream),
                ListenerConfig::new("front", 9001, Protocol::Stream),
            ],
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::new("camera", 9000, Protocol::Stream)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            receive_dir: "received".into(),
            max_frame_bytes: DEFAULT_MAX_FRAME_SIZE,
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

impl ListenerConfig {
    pub fn new(label: impl Into<String>, port: u16, protocol: Protocol) -> Self {
        Self {
            label: label.into(),
            bind_address: "0.0.0.0".into(),
            port,
            protocol,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl CollectorConfig {
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

    /// Write the default configuration to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn receive_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.receive_dir)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&CollectorConfig::default()).unwrap();
        assert!(text.contains("[[listeners]]"));
        assert!(text.contains("protocol = \"stream\""));
        assert!(text.contains("receive_dir"));
    }

    #[test]
    fn mixed_listeners_parse() {
        let cfg: CollectorConfig = toml::from_str(
            r#"
            [[listeners]]
            label = "rear"
            port = 9100
            protocol = "clip"

            [[listeners]]
            label = "front"
            port = 9101
            protocol = "photo"

            [storage]
            receive_dir = "/srv/camlink"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.listeners.len(), 2);
        assert_eq!(cfg.listeners[0].protocol, Protocol::Clip);
        assert_eq!(cfg.listeners[1].bind_address, "0.0.0.0");
        assert_eq!(cfg.storage.max_frame_bytes, DEFAULT_MAX_FRAME_SIZE);
        assert_eq!(cfg.receive_dir(), PathBuf::from("/srv/camlink"));
    }

    #[test]
    fn protocols_map_to_variants() {
        assert_eq!(Protocol::Stream.transfer_variant(), None);
        assert_eq!(
            Protocol::Photo.transfer_variant(),
            Some(TransferVariant::UntilClose)
        );
        assert_eq!(Protocol::Clip.transfer_variant(), Some(TransferVariant::Sized));
    }
}
