//! Capture device abstraction.
//!
//! A [`CaptureBackend`] enumerates devices by [`Facing`] and opens them.
//! An opened [`CaptureDevice`] never returns results from its methods
//! directly: completion, frames and failures are reported as
//! [`DeviceEvent`]s through the device's [`EventSink`], onto a per-device
//! FIFO queue drained by exactly one task.

use std::path::{Path, PathBuf};
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::CamlinkError;

// ── Facing ───────────────────────────────────────────────────────

/// Which physical camera a stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    Front,
    Back,
}

impl Facing {
    /// Both facings, rear first (the order bursts rotate through).
    pub const ALL: [Facing; 2] = [Facing::Back, Facing::Front];

    pub fn as_str(self) -> &'static str {
        match self {
            Facing::Front => "front",
            Facing::Back => "back",
        }
    }

    /// The other device.
    pub fn other(self) -> Facing {
        match self {
            Facing::Front => Facing::Back,
            Facing::Back => Facing::Front,
        }
    }
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Resolution ───────────────────────────────────────────────────

/// An output size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── DeviceInfo ───────────────────────────────────────────────────

/// Static characteristics of one capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Backend-specific identifier.
    pub id: String,
    pub facing: Facing,
    /// Output sizes the device supports.
    pub sizes: Vec<Resolution>,
}

impl DeviceInfo {
    /// Pick the supported size closest in area to `target`.
    ///
    /// Exact matches win; ties prefer the larger size. Falls back to
    /// `target` itself when the device lists no sizes.
    pub fn best_size(&self, target: Resolution) -> Resolution {
        if self.sizes.contains(&target) {
            return target;
        }
        self.sizes
            .iter()
            .copied()
            .min_by_key(|s| (s.area().abs_diff(target.area()), u64::MAX - s.area()))
            .unwrap_or(target)
    }
}

// ── Frame ────────────────────────────────────────────────────────

/// One encoded frame as produced by a device.
///
/// Consumed after a single send attempt; frames are never resent.
#[derive(Debug, Clone)]
pub struct Frame {
    pub facing: Facing,
    pub payload: Bytes,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(facing: Facing, payload: impl Into<Bytes>) -> Self {
        Self {
            facing,
            payload: payload.into(),
            captured_at: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

// ── DeviceEvent ──────────────────────────────────────────────────

/// Asynchronous notifications from an opened device.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The device finished opening.
    Opened,
    /// The capture session is configured and ready for requests.
    Configured,
    /// Session configuration failed.
    ConfigureFailed(String),
    /// A captured frame is available.
    FrameAvailable(Frame),
    /// A recording was finalized on disk.
    RecordingFinished { path: PathBuf },
    /// The device reported a hardware error.
    Error(String),
    /// The device went away.
    Disconnected,
}

/// Sending half of a device's event queue.
#[derive(Debug, Clone)]
pub struct EventSink {
    facing: Facing,
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl EventSink {
    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// Post an event. Returns `false` once the session stopped listening.
    pub fn emit(&self, event: DeviceEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create the FIFO event queue for one device.
pub fn event_queue(facing: Facing) -> (EventSink, mpsc::UnboundedReceiver<DeviceEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { facing, tx }, rx)
}

// ── Traits ───────────────────────────────────────────────────────

/// An opened capture device.
///
/// Every method only *requests* work; results arrive on the event queue.
pub trait CaptureDevice: Send {
    /// Configure the capture session for `size`. Answers with
    /// [`DeviceEvent::Configured`] or [`DeviceEvent::ConfigureFailed`].
    fn configure(&mut self, size: Resolution) -> Result<(), CamlinkError>;

    /// Issue a repeating capture request until `close`.
    fn start_repeating(&mut self) -> Result<(), CamlinkError>;

    /// Issue exactly one capture request.
    fn capture_once(&mut self) -> Result<(), CamlinkError>;

    /// Start recording a clip to `path`.
    fn start_recording(&mut self, path: &Path) -> Result<(), CamlinkError>;

    /// Stop the current recording. Answers with
    /// [`DeviceEvent::RecordingFinished`].
    fn stop_recording(&mut self) -> Result<(), CamlinkError>;

    /// Release the device. Must be safe to call more than once.
    fn close(&mut self);
}

/// Source of capture devices.
pub trait CaptureBackend: Send + Sync {
    /// Look up the device for `facing` and read its characteristics.
    fn device_for(&self, facing: Facing) -> Result<DeviceInfo, CamlinkError>;

    /// Open the device, wiring its events into `sink`.
    fn open(
        &self,
        info: &DeviceInfo,
        sink: EventSink,
    ) -> Result<Box<dyn CaptureDevice>, CamlinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facing_display_and_other() {
        assert_eq!(Facing::Front.to_string(), "front");
        assert_eq!(Facing::Back.other(), Facing::Front);
        assert_eq!(Facing::ALL[0], Facing::Back);
    }

    #[test]
    fn best_size_prefers_exact_then_closest() {
        let info = DeviceInfo {
            id: "0".into(),
            facing: Facing::Back,
            sizes: vec![
                Resolution::new(1920, 1080),
                Resolution::new(640, 480),
                Resolution::new(320, 240),
            ],
        };
        assert_eq!(
            info.best_size(Resolution::new(640, 480)),
            Resolution::new(640, 480)
        );
        assert_eq!(
            info.best_size(Resolution::new(800, 600)),
            Resolution::new(640, 480)
        );

        let empty = DeviceInfo {
            sizes: Vec::new(),
            ..info
        };
        assert_eq!(
            empty.best_size(Resolution::new(800, 600)),
            Resolution::new(800, 600)
        );
    }

    #[tokio::test]
    async fn event_queue_is_fifo() {
        let (sink, mut rx) = event_queue(Facing::Front);
        assert!(sink.emit(DeviceEvent::Opened));
        assert!(sink.emit(DeviceEvent::Configured));
        assert!(matches!(rx.recv().await, Some(DeviceEvent::Opened)));
        assert!(matches!(rx.recv().await, Some(DeviceEvent::Configured)));

        drop(rx);
        assert!(sink.is_closed());
        assert!(!sink.emit(DeviceEvent::Disconnected));
    }
}
