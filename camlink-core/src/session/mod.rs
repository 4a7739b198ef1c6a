//! Per-device capture session.
//!
//! A [`CaptureSession`] wraps one [`CaptureDevice`] and drives it through
//! `open → configure → capture → close`. Opening only *starts* the work:
//! the device answers on the session's FIFO event queue, and the owning
//! task feeds each event back through [`CaptureSession::handle_event`],
//! one at a time and in arrival order.

pub mod state;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::device::{
    CaptureBackend, CaptureDevice, DeviceEvent, Facing, Frame, Resolution, event_queue,
};
use crate::error::CamlinkError;
use crate::guard::DeviceLifecycleGuard;
use crate::throttle::FrameThrottle;

pub use state::CaptureSessionState;

// ── CaptureMode ──────────────────────────────────────────────────

/// What a session captures once configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Repeating capture, frames streamed over a persistent connection.
    Stream,
    /// One still per burst cycle.
    Photo,
    /// One fixed-duration recording per burst cycle.
    Clip,
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream => write!(f, "stream"),
            Self::Photo => write!(f, "photo"),
            Self::Clip => write!(f, "clip"),
        }
    }
}

// ── DeviceStream ─────────────────────────────────────────────────

/// Mutable per-device bookkeeping.
#[derive(Debug, Clone)]
pub struct DeviceStream {
    pub facing: Facing,
    pub state: CaptureSessionState,
    /// Requested output size.
    pub target: Resolution,
    /// Size actually configured on the device.
    pub configured: Option<Resolution>,
    pub throttle: FrameThrottle,
}

impl DeviceStream {
    pub fn new(facing: Facing, target: Resolution, throttle: FrameThrottle) -> Self {
        Self {
            facing,
            state: CaptureSessionState::Closed,
            target,
            configured: None,
            throttle,
        }
    }

    pub fn last_frame_sent_at(&self) -> Option<std::time::Instant> {
        self.throttle.last_sent()
    }
}

/// Snapshot published to observers after every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub facing: Facing,
    pub state: CaptureSessionState,
    pub frames_forwarded: u64,
    pub frames_throttled: u64,
}

impl DeviceStatus {
    fn closed(facing: Facing) -> Self {
        Self {
            facing,
            state: CaptureSessionState::Closed,
            frames_forwarded: 0,
            frames_throttled: 0,
        }
    }
}

// ── SessionStep ──────────────────────────────────────────────────

/// Outcome of handling one device event.
#[derive(Debug)]
pub enum SessionStep {
    /// The device opened and configuration was requested.
    Opened,
    /// Configuration completed and the capture request was issued.
    Ready,
    /// A frame passed the throttle and should be sent.
    Frame(Frame),
    /// A frame arrived too soon after the last one and was dropped.
    Throttled,
    /// The event does not apply to the current state.
    Ignored,
    /// A recording was finalized at the given path.
    ClipFinished(PathBuf),
}

// ── CaptureSession ───────────────────────────────────────────────

pub struct CaptureSession {
    stream: DeviceStream,
    mode: CaptureMode,
    backend: Arc<dyn CaptureBackend>,
    guard: DeviceLifecycleGuard,
    device: Option<Box<dyn CaptureDevice>>,
    events: Option<mpsc::UnboundedReceiver<DeviceEvent>>,
    clip_path: Option<PathBuf>,
    status: watch::Sender<DeviceStatus>,
}

impl CaptureSession {
    pub fn new(
        stream: DeviceStream,
        mode: CaptureMode,
        backend: Arc<dyn CaptureBackend>,
        guard: DeviceLifecycleGuard,
    ) -> Self {
        let (status, _) = watch::channel(DeviceStatus::closed(stream.facing));
        Self {
            stream,
            mode,
            backend,
            guard,
            device: None,
            events: None,
            clip_path: None,
            status,
        }
    }

    pub fn facing(&self) -> Facing {
        self.stream.facing
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    pub fn state(&self) -> CaptureSessionState {
        self.stream.state
    }

    pub fn stream(&self) -> &DeviceStream {
        &self.stream
    }

    /// Receive a [`DeviceStatus`] after every state change.
    pub fn subscribe(&self) -> watch::Receiver<DeviceStatus> {
        self.status.subscribe()
    }

    fn publish(&self) {
        self.status.send_replace(DeviceStatus {
            facing: self.stream.facing,
            state: self.stream.state,
            frames_forwarded: self.stream.throttle.forwarded(),
            frames_throttled: self.stream.throttle.dropped(),
        });
    }

    /// Request the device be opened.
    ///
    /// Returns once the open has been *issued*; the device confirms with
    /// [`DeviceEvent::Opened`] on the event queue. Lookup, guard and
    /// permission failures are returned directly and leave the session
    /// `Failed`. A device left over from an unfinished teardown is released
    /// first; if that still cannot get the guard, the open is refused.
    pub async fn open(&mut self) -> Result<(), CamlinkError> {
        if self.holds_device() {
            self.teardown().await?;
        }
        self.stream.state.begin_open()?;
        self.publish();

        match self.issue_open().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.stream.state.mark_failed();
                self.publish();
                Err(e)
            }
        }
    }

    /// Like [`open`](Self::open), recording to `path` once configured.
    pub async fn open_recording(&mut self, path: PathBuf) -> Result<(), CamlinkError> {
        self.clip_path = Some(path);
        self.open().await
    }

    async fn issue_open(&mut self) -> Result<(), CamlinkError> {
        let facing = self.stream.facing;
        let info = self.backend.device_for(facing)?;
        let size = info.best_size(self.stream.target);

        let permit = self.guard.acquire(facing, "open").await?;
        let (sink, rx) = event_queue(facing);
        let device = self.backend.open(&info, sink)?;
        drop(permit);

        debug!(%facing, device = %info.id, %size, "device open issued");
        self.stream.configured = Some(size);
        self.device = Some(device);
        self.events = Some(rx);
        Ok(())
    }

    /// Wait for the next device event. `None` when no device is open or
    /// the device dropped its side of the queue.
    pub async fn next_event(&mut self) -> Option<DeviceEvent> {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    fn device_mut(&mut self) -> Result<&mut Box<dyn CaptureDevice>, CamlinkError> {
        let from = self.stream.state;
        self.device
            .as_mut()
            .ok_or(CamlinkError::InvalidTransition {
                from,
                action: "issue a capture request",
            })
    }

    /// Apply one device event to the session.
    ///
    /// Hardware errors, disconnects and configuration failures come back
    /// as `Err`; the caller decides between retrying and giving up.
    pub fn handle_event(&mut self, event: DeviceEvent) -> Result<SessionStep, CamlinkError> {
        let facing = self.stream.facing;
        match event {
            DeviceEvent::Opened => {
                self.stream.state.opened()?;
                self.publish();
                let size = self.stream.configured.unwrap_or(self.stream.target);
                self.device_mut()?.configure(size)?;
                Ok(SessionStep::Opened)
            }
            DeviceEvent::Configured => {
                self.stream.state.configured(self.mode)?;
                match self.mode {
                    CaptureMode::Stream => self.device_mut()?.start_repeating()?,
                    CaptureMode::Photo => self.device_mut()?.capture_once()?,
                    CaptureMode::Clip => {
                        let path = self.clip_path.clone().ok_or_else(|| {
                            CamlinkError::Configuration("clip mode without a recording path".into())
                        })?;
                        self.device_mut()?.start_recording(&path)?;
                    }
                }
                self.publish();
                info!(%facing, mode = %self.mode, "capture started");
                Ok(SessionStep::Ready)
            }
            DeviceEvent::ConfigureFailed(reason) => Err(CamlinkError::Configuration(reason)),
            DeviceEvent::FrameAvailable(frame) => {
                if !self.stream.state.is_active() {
                    return Ok(SessionStep::Ignored);
                }
                if self.mode != CaptureMode::Stream {
                    return Ok(SessionStep::Frame(frame));
                }
                if self.stream.throttle.admit(frame.captured_at) {
                    Ok(SessionStep::Frame(frame))
                } else {
                    Ok(SessionStep::Throttled)
                }
            }
            DeviceEvent::RecordingFinished { path } => Ok(SessionStep::ClipFinished(path)),
            DeviceEvent::Error(reason) => Err(CamlinkError::Device(reason)),
            DeviceEvent::Disconnected => Err(CamlinkError::Disconnected(facing)),
        }
    }

    /// Ask the device to finalize the current recording.
    pub fn stop_recording(&mut self) -> Result<(), CamlinkError> {
        self.device_mut()?.stop_recording()
    }

    /// Release the device under the lifecycle guard. Idempotent.
    ///
    /// Pending events are discarded. If the guard cannot be acquired in
    /// time nothing is released: the device stays held, the session stays
    /// `Closing` and the timeout is returned. Calling `teardown` again
    /// retries the release.
    pub async fn teardown(&mut self) -> Result<(), CamlinkError> {
        let facing = self.stream.facing;
        if !self.holds_device() {
            if self.stream.state == CaptureSessionState::Closing {
                self.stream.state.force_close();
                self.publish();
            }
            return Ok(());
        }

        if self.stream.state.begin_close().is_err() {
            self.stream.state = CaptureSessionState::Closing;
        }
        self.publish();

        let permit = match self.guard.acquire(facing, "close").await {
            Ok(permit) => permit,
            Err(e) => {
                warn!(%facing, error = %e, "device left open, lifecycle permit not acquired");
                return Err(e);
            }
        };
        if let Some(mut device) = self.device.take() {
            device.close();
        }
        drop(permit);

        if let Some(mut rx) = self.events.take() {
            rx.close();
            let mut discarded = 0usize;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                debug!(%facing, discarded, "dropped pending device events");
            }
        }

        self.clip_path = None;
        self.stream.throttle.reset();
        self.stream.state.force_close();
        self.publish();
        info!(%facing, "capture session closed");
        Ok(())
    }

    /// Whether a device (or its event queue) is still held.
    pub fn holds_device(&self) -> bool {
        self.device.is_some() || self.events.is_some()
    }

    /// Record that the current burst cycle failed.
    pub fn mark_failed(&mut self) {
        self.stream.state.mark_failed();
        self.publish();
    }
}

/// A device still held at drop is closed under the lifecycle permit: at
/// once if the permit is free, otherwise from a task that waits for it.
impl Drop for CaptureSession {
    fn drop(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        let facing = self.stream.facing;
        warn!(%facing, "capture session dropped while device open");

        if let Some(_permit) = self.guard.try_acquire(facing, "close") {
            device.close();
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let guard = self.guard.clone();
                handle.spawn(async move {
                    match guard.acquire(facing, "close").await {
                        Ok(_permit) => device.close(),
                        Err(e) => error!(%facing, error = %e, "dropped device never released"),
                    }
                });
            }
            Err(_) => error!(%facing, "dropped device never released, no runtime to wait on"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SyntheticBackend, SyntheticConfig};
    use std::time::Duration;

    fn session(mode: CaptureMode, backend: SyntheticBackend) -> CaptureSession {
        CaptureSession::new(
            DeviceStream::new(
                Facing::Back,
                Resolution::new(320, 240),
                FrameThrottle::new(Duration::from_millis(100)),
            ),
            mode,
            Arc::new(backend),
            DeviceLifecycleGuard::new(Duration::from_secs(1)),
        )
    }

    async fn drive_until_ready(s: &mut CaptureSession) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), s.next_event())
                .await
                .unwrap()
                .unwrap();
            if let SessionStep::Ready = s.handle_event(event).unwrap() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn open_configure_stream_and_teardown() {
        let mut s = session(CaptureMode::Stream, SyntheticBackend::new(SyntheticConfig::default()));
        let mut status = s.subscribe();

        s.open().await.unwrap();
        assert_eq!(s.state(), CaptureSessionState::Opening);
        drive_until_ready(&mut s).await;
        assert!(matches!(s.state(), CaptureSessionState::Streaming { .. }));
        assert!(status.borrow_and_update().state.is_active());

        let mut frames = 0;
        while frames < 2 {
            let event = s.next_event().await.unwrap();
            if let SessionStep::Frame(f) = s.handle_event(event).unwrap() {
                assert_eq!(f.facing, Facing::Back);
                frames += 1;
            }
        }

        s.teardown().await.unwrap();
        assert_eq!(s.state(), CaptureSessionState::Closed);
        assert_eq!(status.borrow().state, CaptureSessionState::Closed);
        // Second teardown is a no-op.
        s.teardown().await.unwrap();
        assert!(s.next_event().await.is_none());
    }

    #[tokio::test]
    async fn teardown_from_closed_is_noop() {
        let mut s = session(CaptureMode::Photo, SyntheticBackend::new(SyntheticConfig::default()));
        s.teardown().await.unwrap();
        assert_eq!(s.state(), CaptureSessionState::Closed);
    }

    #[tokio::test]
    async fn missing_device_fails_open() {
        let mut cfg = SyntheticConfig::default();
        cfg.faults.missing.push(Facing::Back);
        let mut s = session(CaptureMode::Stream, SyntheticBackend::new(cfg));

        let err = s.open().await.unwrap_err();
        assert!(matches!(err, CamlinkError::NoDevice(Facing::Back)));
        assert_eq!(s.state(), CaptureSessionState::Failed);
    }

    #[tokio::test]
    async fn configure_failure_is_fatal() {
        let mut cfg = SyntheticConfig::default();
        cfg.faults.fail_configure = true;
        let mut s = session(CaptureMode::Stream, SyntheticBackend::new(cfg));
        s.open().await.unwrap();

        let err = loop {
            let event = s.next_event().await.unwrap();
            if let Err(e) = s.handle_event(event) {
                break e;
            }
        };
        assert!(matches!(err, CamlinkError::Configuration(_)));
        assert_eq!(err.class(), crate::error::ErrorClass::Fatal);
        s.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn throttle_drops_fast_frames() {
        let mut s = session(CaptureMode::Stream, SyntheticBackend::new(SyntheticConfig::default()));
        s.stream.state = CaptureSessionState::Streaming {
            since: std::time::Instant::now(),
        };
        let first = Frame::new(Facing::Back, vec![1u8]);
        let mut second = first.clone();
        second.captured_at = first.captured_at + Duration::from_millis(10);

        assert!(matches!(
            s.handle_event(DeviceEvent::FrameAvailable(first)).unwrap(),
            SessionStep::Frame(_)
        ));
        assert!(matches!(
            s.handle_event(DeviceEvent::FrameAvailable(second)).unwrap(),
            SessionStep::Throttled
        ));
        assert_eq!(s.stream().throttle.dropped(), 1);
    }

    #[test]
    fn frames_ignored_when_not_active() {
        let mut s = session(CaptureMode::Stream, SyntheticBackend::new(SyntheticConfig::default()));
        let step = s
            .handle_event(DeviceEvent::FrameAvailable(Frame::new(Facing::Back, vec![0u8])))
            .unwrap();
        assert!(matches!(step, SessionStep::Ignored));
    }
}
