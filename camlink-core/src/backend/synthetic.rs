//! Synthetic test-pattern camera.
//!
//! Produces JPEG frames of a per-facing gradient with a bar that moves one
//! step per frame, so consecutive frames differ and orientation is visible
//! at a glance. Clips are recorded as concatenated JPEGs (MJPEG). Faults
//! can be injected to exercise every error path of the pipeline without
//! hardware.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::clip::discard_partial;
use crate::device::{
    CaptureBackend, CaptureDevice, DeviceEvent, DeviceInfo, EventSink, Facing, Frame, Resolution,
};
use crate::error::CamlinkError;

// ── Configuration ────────────────────────────────────────────────

/// Failure modes the synthetic camera can simulate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticFaults {
    /// `open` fails with `PermissionDenied`.
    pub deny_permission: bool,
    /// Facings that do not exist.
    pub missing: Vec<Facing>,
    /// Facings whose characteristics cannot be read.
    pub unreadable: Vec<Facing>,
    /// Configuration answers with `ConfigureFailed`.
    pub fail_configure: bool,
    /// Emit `Disconnected` after this many frames of one session.
    pub disconnect_after: Option<u64>,
    /// Emit a hardware `Error` after this many frames of one session.
    pub error_after: Option<u64>,
    /// Delay before the `Opened` event.
    pub open_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Frames per second for repeating capture and recording.
    pub fps: u32,
    /// Output sizes every synthetic device advertises.
    pub sizes: Vec<Resolution>,
    /// JPEG quality of generated frames.
    pub quality: u8,
    pub faults: SyntheticFaults,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            fps: 15,
            sizes: vec![
                Resolution::new(1280, 720),
                Resolution::new(640, 480),
                Resolution::new(320, 240),
            ],
            quality: 70,
            faults: SyntheticFaults::default(),
        }
    }
}

impl SyntheticConfig {
    fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

// ── Test pattern ─────────────────────────────────────────────────

/// Render frame `n` for `facing` at `size` as a JPEG.
pub fn render_test_pattern(
    facing: Facing,
    n: u64,
    size: Resolution,
    quality: u8,
) -> Result<Vec<u8>, CamlinkError> {
    let (w, h) = (size.width.max(1), size.height.max(1));
    let bar_width = (w / 16).max(1);
    let bar_x = ((n * bar_width as u64) % w as u64) as u32;

    let img: RgbImage = ImageBuffer::from_fn(w, h, |x, y| {
        if x >= bar_x && x < bar_x + bar_width {
            return Rgb([255, 255, 255]);
        }
        let gx = (x * 255 / w) as u8;
        let gy = (y * 255 / h) as u8;
        match facing {
            Facing::Back => Rgb([gx, gy, 64]),
            Facing::Front => Rgb([64, gx, gy]),
        }
    });

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(&img)?;
    Ok(out)
}

// ── Backend ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct SyntheticBackend {
    config: SyntheticConfig,
    opens: AtomicU64,
}

impl SyntheticBackend {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            opens: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }

    /// Number of successful `open` calls so far.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }
}

impl CaptureBackend for SyntheticBackend {
    fn device_for(&self, facing: Facing) -> Result<DeviceInfo, CamlinkError> {
        let faults = &self.config.faults;
        if faults.missing.contains(&facing) {
            return Err(CamlinkError::NoDevice(facing));
        }
        if faults.unreadable.contains(&facing) {
            return Err(CamlinkError::Characteristics {
                facing,
                reason: "stream configuration map unavailable".into(),
            });
        }
        Ok(DeviceInfo {
            id: format!("synthetic-{facing}"),
            facing,
            sizes: self.config.sizes.clone(),
        })
    }

    fn open(
        &self,
        info: &DeviceInfo,
        sink: EventSink,
    ) -> Result<Box<dyn CaptureDevice>, CamlinkError> {
        if self.config.faults.deny_permission {
            return Err(CamlinkError::PermissionDenied(format!(
                "access to {} refused",
                info.id
            )));
        }
        self.opens.fetch_add(1, Ordering::Relaxed);

        let device = SyntheticDevice {
            facing: info.facing,
            config: Arc::new(self.config.clone()),
            sink,
            size: None,
            frames: Arc::new(AtomicU64::new(0)),
            alive: CancellationToken::new(),
            recording: None,
        };

        let sink = device.sink.clone();
        let alive = device.alive.clone();
        let delay = Duration::from_millis(self.config.faults.open_delay_ms);
        tokio::spawn(async move {
            tokio::select! {
                _ = alive.cancelled() => {}
                _ = tokio::time::sleep(delay) => { sink.emit(DeviceEvent::Opened); }
            }
        });

        debug!(facing = %info.facing, "synthetic device opened");
        Ok(Box::new(device))
    }
}

// ── Device ───────────────────────────────────────────────────────

struct SyntheticDevice {
    facing: Facing,
    config: Arc<SyntheticConfig>,
    sink: EventSink,
    size: Option<Resolution>,
    /// Frames emitted during this session (drives fault injection).
    frames: Arc<AtomicU64>,
    /// Cancelled on close; stops every worker of this device.
    alive: CancellationToken,
    /// Stop signal of the active recording.
    recording: Option<CancellationToken>,
}

impl SyntheticDevice {
    fn configured_size(&self) -> Result<Resolution, CamlinkError> {
        self.size.ok_or_else(|| {
            CamlinkError::Configuration("capture requested before configure".into())
        })
    }

    fn producer(&self) -> Result<FrameProducer, CamlinkError> {
        Ok(FrameProducer {
            facing: self.facing,
            size: self.configured_size()?,
            config: Arc::clone(&self.config),
            frames: Arc::clone(&self.frames),
            sink: self.sink.clone(),
        })
    }
}

/// Renders frames and applies injected faults.
struct FrameProducer {
    facing: Facing,
    size: Resolution,
    config: Arc<SyntheticConfig>,
    frames: Arc<AtomicU64>,
    sink: EventSink,
}

impl FrameProducer {
    /// Render the next frame. `None` once a fault ended the session.
    async fn next(&self) -> Option<Vec<u8>> {
        let n = self.frames.fetch_add(1, Ordering::Relaxed);
        let faults = &self.config.faults;
        if faults.error_after.is_some_and(|limit| n >= limit) {
            self.sink.emit(DeviceEvent::Error("synthetic sensor fault".into()));
            return None;
        }
        if faults.disconnect_after.is_some_and(|limit| n >= limit) {
            self.sink.emit(DeviceEvent::Disconnected);
            return None;
        }

        let (facing, size, quality) = (self.facing, self.size, self.config.quality);
        match tokio::task::spawn_blocking(move || render_test_pattern(facing, n, size, quality))
            .await
        {
            Ok(Ok(jpeg)) => Some(jpeg),
            Ok(Err(e)) => {
                self.sink.emit(DeviceEvent::Error(e.to_string()));
                None
            }
            Err(_) => None,
        }
    }
}

impl CaptureDevice for SyntheticDevice {
    fn configure(&mut self, size: Resolution) -> Result<(), CamlinkError> {
        if self.config.faults.fail_configure {
            self.sink
                .emit(DeviceEvent::ConfigureFailed("synthetic configure fault".into()));
            return Ok(());
        }
        self.size = Some(size);
        self.sink.emit(DeviceEvent::Configured);
        Ok(())
    }

    fn start_repeating(&mut self) -> Result<(), CamlinkError> {
        let producer = self.producer()?;
        let alive = self.alive.clone();
        let period = self.config.frame_interval();

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = alive.cancelled() => break,
                    _ = tick.tick() => {}
                }
                let Some(jpeg) = producer.next().await else { break };
                if alive.is_cancelled()
                    || !producer
                        .sink
                        .emit(DeviceEvent::FrameAvailable(Frame::new(producer.facing, jpeg)))
                {
                    break;
                }
            }
            trace!(facing = %producer.facing, "repeating capture stopped");
        });
        Ok(())
    }

    fn capture_once(&mut self) -> Result<(), CamlinkError> {
        let producer = self.producer()?;
        let alive = self.alive.clone();
        tokio::spawn(async move {
            if let Some(jpeg) = producer.next().await
                && !alive.is_cancelled()
            {
                producer
                    .sink
                    .emit(DeviceEvent::FrameAvailable(Frame::new(producer.facing, jpeg)));
            }
        });
        Ok(())
    }

    fn start_recording(&mut self, path: &Path) -> Result<(), CamlinkError> {
        if self.recording.is_some() {
            return Err(CamlinkError::Device("recording already in progress".into()));
        }
        let producer = self.producer()?;
        let alive = self.alive.clone();
        let stop = CancellationToken::new();
        self.recording = Some(stop.clone());
        let period = self.config.frame_interval();
        let path = path.to_path_buf();

        tokio::spawn(async move {
            let outcome = record(&producer, &path, period, &alive, &stop).await;
            match outcome {
                Ok(true) => {
                    producer.sink.emit(DeviceEvent::RecordingFinished { path });
                }
                Ok(false) => {
                    trace!(facing = %producer.facing, "recording abandoned");
                    discard_partial(&path).await;
                }
                Err(e) => {
                    warn!(facing = %producer.facing, error = %e, "synthetic recording failed");
                    discard_partial(&path).await;
                    producer.sink.emit(DeviceEvent::Error(e.to_string()));
                }
            }
        });
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), CamlinkError> {
        match self.recording.take() {
            Some(stop) => {
                stop.cancel();
                Ok(())
            }
            None => Err(CamlinkError::Device("no recording in progress".into())),
        }
    }

    fn close(&mut self) {
        self.alive.cancel();
        self.recording = None;
    }
}

impl Drop for SyntheticDevice {
    fn drop(&mut self) {
        self.alive.cancel();
    }
}

/// Append frames to `path` until `stop` fires. Returns `false` if the
/// device was closed first.
async fn record(
    producer: &FrameProducer,
    path: &Path,
    period: Duration,
    alive: &CancellationToken,
    stop: &CancellationToken,
) -> Result<bool, CamlinkError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| CamlinkError::file(path, e))?;
    let mut tick = tokio::time::interval(period);

    let finished = loop {
        tokio::select! {
            _ = alive.cancelled() => break false,
            _ = stop.cancelled() => break true,
            _ = tick.tick() => {}
        }
        let Some(jpeg) = producer.next().await else {
            return Ok(false);
        };
        file.write_all(&jpeg)
            .await
            .map_err(|e| CamlinkError::file(path, e))?;
    };

    file.flush().await.map_err(|e| CamlinkError::file(path, e))?;
    file.sync_all().await.map_err(|e| CamlinkError::file(path, e))?;
    Ok(finished)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::event_queue;
    use image::GenericImageView;

    #[test]
    fn pattern_decodes_and_moves() {
        let size = Resolution::new(64, 48);
        let a = render_test_pattern(Facing::Back, 0, size, 80).unwrap();
        let b = render_test_pattern(Facing::Back, 3, size, 80).unwrap();
        assert_ne!(a, b);
        assert_eq!(image::load_from_memory(&a).unwrap().dimensions(), (64, 48));
    }

    #[test]
    fn missing_and_unreadable_devices() {
        let mut cfg = SyntheticConfig::default();
        cfg.faults.missing = vec![Facing::Front];
        cfg.faults.unreadable = vec![Facing::Back];
        let backend = SyntheticBackend::new(cfg);
        assert!(matches!(
            backend.device_for(Facing::Front),
            Err(CamlinkError::NoDevice(Facing::Front))
        ));
        assert!(matches!(
            backend.device_for(Facing::Back),
            Err(CamlinkError::Characteristics { .. })
        ));
    }

    #[tokio::test]
    async fn permission_denied_on_open() {
        let mut cfg = SyntheticConfig::default();
        cfg.faults.deny_permission = true;
        let backend = SyntheticBackend::new(cfg);
        let info = backend.device_for(Facing::Back).unwrap();
        let (sink, _rx) = event_queue(Facing::Back);
        assert!(matches!(
            backend.open(&info, sink),
            Err(CamlinkError::PermissionDenied(_))
        ));
        assert_eq!(backend.open_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_after_frames() {
        let mut cfg = SyntheticConfig::default();
        cfg.fps = 100;
        cfg.faults.disconnect_after = Some(2);
        let backend = SyntheticBackend::new(cfg);
        let info = backend.device_for(Facing::Front).unwrap();
        let (sink, mut rx) = event_queue(Facing::Front);
        let mut dev = backend.open(&info, sink).unwrap();

        assert!(matches!(rx.recv().await, Some(DeviceEvent::Opened)));
        dev.configure(Resolution::new(32, 24)).unwrap();
        assert!(matches!(rx.recv().await, Some(DeviceEvent::Configured)));
        dev.start_repeating().unwrap();

        assert!(matches!(rx.recv().await, Some(DeviceEvent::FrameAvailable(_))));
        assert!(matches!(rx.recv().await, Some(DeviceEvent::FrameAvailable(_))));
        assert!(matches!(rx.recv().await, Some(DeviceEvent::Disconnected)));
        dev.close();
    }

    #[tokio::test]
    async fn recording_writes_mjpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mjpeg");
        let mut cfg = SyntheticConfig::default();
        cfg.fps = 50;
        let backend = SyntheticBackend::new(cfg);
        let info = backend.device_for(Facing::Back).unwrap();
        let (sink, mut rx) = event_queue(Facing::Back);
        let mut dev = backend.open(&info, sink).unwrap();

        assert!(matches!(rx.recv().await, Some(DeviceEvent::Opened)));
        dev.configure(Resolution::new(32, 24)).unwrap();
        assert!(matches!(rx.recv().await, Some(DeviceEvent::Configured)));
        dev.start_recording(&path).unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        dev.stop_recording().unwrap();

        match rx.recv().await {
            Some(DeviceEvent::RecordingFinished { path: done }) => assert_eq!(done, path),
            other => panic!("unexpected event {other:?}"),
        }
        let bytes = std::fs::read(&path).unwrap();
        // Starts with a JPEG SOI marker.
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        dev.close();
    }

    #[tokio::test]
    async fn capture_before_configure_is_rejected() {
        let backend = SyntheticBackend::default();
        let info = backend.device_for(Facing::Back).unwrap();
        let (sink, _rx) = event_queue(Facing::Back);
        let mut dev = backend.open(&info, sink).unwrap();
        assert!(dev.capture_once().is_err());
        dev.close();
    }
}
