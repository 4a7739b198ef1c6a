//! Configuration for the sender service.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use camlink_core::supervisor::DEFAULT_MAX_SPOOLED;
use camlink_core::{CaptureMode, Facing, Resolution, RetryPolicy, SupervisorConfig, SyntheticConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderConfig {
    /// Collector address.
    pub network: NetworkConfig,
    /// What to capture and how.
    pub capture: CaptureConfig,
    /// Connection retry and service restart behaviour.
    pub retry: RetryConfig,
    /// Photo / clip burst timing.
    pub burst: BurstConfig,
    /// Synthetic camera settings.
    pub camera: SyntheticConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Collector host (IP literal or hostname).
    pub host: String,
    /// Port receiving the rear camera.
    pub rear_port: u16,
    /// Port receiving the front camera.
    pub front_port: u16,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// `stream`, `photo` or `clip`.
    pub mode: CaptureMode,
    /// Devices to run. Burst modes alternate in this order.
    pub facings: Vec<Facing>,
    /// Whether startup counts as an operator request. Fatal errors of an
    /// operator-started run make the process exit with an error.
    pub manual_start: bool,
    pub width: u32,
    pub height: u32,
    /// Minimum spacing of streamed frames per device.
    pub min_frame_interval_ms: u64,
    pub jpeg_quality: u8,
    pub frame_queue_depth: usize,
    pub capture_timeout_ms: u64,
    /// Timeout for the shared device open/close gate.
    pub guard_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Added to the backoff after each further failure.
    pub backoff_step_ms: u64,
    pub max_backoff_ms: u64,
    /// Restart the supervisor after a terminal failure.
    pub restart_on_failure: bool,
    pub restart_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    /// Recording length in clip mode.
    pub clip_duration_ms: u64,
    /// Pause between bursts.
    pub gap_ms: u64,
    /// Captures wait here until transferred. Empty means the system
    /// temp directory.
    pub spool_dir: String,
    /// Undelivered captures kept in the spool; the oldest beyond this are
    /// deleted. 0 deletes every capture that could not be sent.
    pub max_spooled: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            rear_port: 9000,
            front_port: 9001,
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Stream,
            facings: Facing::ALL.to_vec(),
            manual_start: true,
            width: 640,
            height: 480,
            min_frame_interval_ms: 105,
            jpeg_quality: 80,
            frame_queue_depth: 4,
            capture_timeout_ms: 10_000,
            guard_timeout_ms: 2_500,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 2_000,
            backoff_step_ms: 0,
            max_backoff_ms: 60_000,
            restart_on_failure: false,
            restart_delay_ms: 5_000,
        }
    }
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            clip_duration_ms: 5_000,
            gap_ms: 2_000,
            spool_dir: String::new(),
            max_spooled: DEFAULT_MAX_SPOOLED,
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

impl SenderConfig {
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

    pub fn retry_policy(&self) -> RetryPolicy {
        let r = &self.retry;
        RetryPolicy {
            max_attempts: r.max_attempts.max(1),
            backoff: Duration::from_millis(r.backoff_ms),
            backoff_step: Duration::from_millis(r.backoff_step_ms),
            max_backoff: Duration::from_millis(r.max_backoff_ms.max(r.backoff_ms)),
        }
    }

    /// Convert into the core supervisor's configuration.
    pub fn to_supervisor_config(&self) -> SupervisorConfig {
        let c = &self.capture;
        let spool_dir = if self.burst.spool_dir.is_empty() {
            std::env::temp_dir().join("camlink")
        } else {
            PathBuf::from(&self.burst.spool_dir)
        };
        SupervisorConfig {
            mode: c.mode,
            facings: c.facings.clone(),
            host: self.network.host.clone(),
            rear_port: self.network.rear_port,
            front_port: self.network.front_port,
            connect_timeout: Duration::from_millis(self.network.connect_timeout_ms),
            retry: self.retry_policy(),
            min_frame_interval: Duration::from_millis(c.min_frame_interval_ms),
            target_resolution: Resolution::new(c.width.max(1), c.height.max(1)),
            jpeg_quality: c.jpeg_quality.clamp(1, 100),
            frame_queue_depth: c.frame_queue_depth.max(1),
            clip_duration: Duration::from_millis(self.burst.clip_duration_ms),
            burst_gap: Duration::from_millis(self.burst.gap_ms),
            capture_timeout: Duration::from_millis(c.capture_timeout_ms),
            guard_timeout: Duration::from_millis(c.guard_timeout_ms),
            spool_dir,
            max_spooled: self.burst.max_spooled,
        }
    }
}

/// Parse a `--mode` argument.
pub fn parse_mode(s: &str) -> Result<CaptureMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "stream" => Ok(CaptureMode::Stream),
        "photo" => Ok(CaptureMode::Photo),
        "clip" => Ok(CaptureMode::Clip),
        other => Err(format!("unknown mode '{other}' (expected stream, photo or clip)")),
    }
}

// ── Tests ────────────────────────────────────────────────────────
