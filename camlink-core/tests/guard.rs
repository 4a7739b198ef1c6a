//! The lifecycle guard serializes open/close across both devices and on a
//! single device, even when the backend blocks inside those calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use camlink_core::{
    CamlinkError, CaptureBackend, CaptureDevice, CaptureMode, CaptureSession,
    CaptureSessionState, DeviceInfo, DeviceLifecycleGuard, DeviceStream, EventSink, Facing,
    FrameThrottle, Resolution,
};
use tokio::sync::Mutex;

/// Counts how many open/close calls are inside the backend at once.
#[derive(Default)]
struct Overlap {
    inside: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Overlap {
    fn enter(&self) {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(15));
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }
}

struct SlowBackend(Arc<Overlap>);

struct SlowDevice(Arc<Overlap>);

impl CaptureBackend for SlowBackend {
    fn device_for(&self, facing: Facing) -> Result<DeviceInfo, CamlinkError> {
        Ok(DeviceInfo {
            id: format!("slow-{facing}"),
            facing,
            sizes: vec![Resolution::new(320, 240)],
        })
    }

    fn open(
        &self,
        _info: &DeviceInfo,
        _sink: EventSink,
    ) -> Result<Box<dyn CaptureDevice>, CamlinkError> {
        self.0.enter();
        Ok(Box::new(SlowDevice(Arc::clone(&self.0))))
    }
}

impl CaptureDevice for SlowDevice {
    fn configure(&mut self, _size: Resolution) -> Result<(), CamlinkError> {
        Ok(())
    }

    fn start_repeating(&mut self) -> Result<(), CamlinkError> {
        Ok(())
    }

    fn capture_once(&mut self) -> Result<(), CamlinkError> {
        Ok(())
    }

    fn start_recording(&mut self, _path: &std::path::Path) -> Result<(), CamlinkError> {
        Ok(())
    }

    fn stop_recording(&mut self) -> Result<(), CamlinkError> {
        Ok(())
    }

    fn close(&mut self) {
        self.0.enter();
    }
}

fn session(
    facing: Facing,
    backend: &Arc<dyn CaptureBackend>,
    guard: &DeviceLifecycleGuard,
) -> CaptureSession {
    let stream = DeviceStream::new(
        facing,
        Resolution::new(320, 240),
        FrameThrottle::new(Duration::ZERO),
    );
    CaptureSession::new(stream, CaptureMode::Stream, Arc::clone(backend), guard.clone())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn open_and_close_never_overlap() {
    let overlap = Arc::new(Overlap::default());
    let backend: Arc<dyn CaptureBackend> = Arc::new(SlowBackend(Arc::clone(&overlap)));
    let guard = DeviceLifecycleGuard::new(Duration::from_secs(5));

    let mut workers = Vec::new();
    for facing in Facing::ALL {
        let backend = Arc::clone(&backend);
        let guard = guard.clone();
        workers.push(tokio::spawn(async move {
            let mut session = session(facing, &backend, &guard);
            for _ in 0..5 {
                session.open().await.unwrap();
                session.teardown().await.unwrap();
            }
        }));
    }
    for w in workers {
        w.await.unwrap();
    }

    assert_eq!(overlap.calls.load(Ordering::SeqCst), 20);
    assert_eq!(overlap.peak.load(Ordering::SeqCst), 1);
    assert!(!guard.is_held());
}

/// Open and teardown race on one shared session while the other device
/// cycles on its own session.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn open_and_teardown_of_one_slot_never_overlap() {
    let overlap = Arc::new(Overlap::default());
    let backend: Arc<dyn CaptureBackend> = Arc::new(SlowBackend(Arc::clone(&overlap)));
    let guard = DeviceLifecycleGuard::new(Duration::from_secs(5));

    let slot = Arc::new(Mutex::new(session(Facing::Back, &backend, &guard)));
    let mut workers = Vec::new();
    for opener in [true, false] {
        let slot = Arc::clone(&slot);
        workers.push(tokio::spawn(async move {
            for _ in 0..6 {
                let mut s = slot.lock().await;
                if opener {
                    s.open().await.unwrap();
                } else {
                    s.teardown().await.unwrap();
                }
                drop(s);
                tokio::task::yield_now().await;
            }
        }));
    }
    let mut other = session(Facing::Front, &backend, &guard);
    workers.push(tokio::spawn(async move {
        for _ in 0..6 {
            other.open().await.unwrap();
            other.teardown().await.unwrap();
        }
    }));
    for w in workers {
        w.await.unwrap();
    }
    slot.lock().await.teardown().await.unwrap();

    // Six opens per session, each closed exactly once.
    assert_eq!(overlap.calls.load(Ordering::SeqCst), 24);
    assert_eq!(overlap.peak.load(Ordering::SeqCst), 1);
    assert!(!slot.lock().await.holds_device());
}

#[tokio::test]
async fn close_waits_for_the_guard_instead_of_releasing_early() {
    let overlap = Arc::new(Overlap::default());
    let backend: Arc<dyn CaptureBackend> = Arc::new(SlowBackend(Arc::clone(&overlap)));
    let guard = DeviceLifecycleGuard::new(Duration::from_millis(50));
    let mut session = session(Facing::Back, &backend, &guard);
    session.open().await.unwrap();

    // Someone else holds the guard past its timeout.
    let held = guard.acquire(Facing::Front, "open").await.unwrap();
    let err = session.teardown().await.unwrap_err();
    assert!(matches!(err, CamlinkError::GuardTimeout(_)));

    // Only the open reached the backend; the device is still held.
    assert_eq!(overlap.calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), CaptureSessionState::Closing);
    assert!(session.holds_device());
    drop(held);

    // The next open finishes the release before opening again.
    session.open().await.unwrap();
    assert_eq!(overlap.calls.load(Ordering::SeqCst), 3);
    assert_eq!(session.state(), CaptureSessionState::Opening);
    session.teardown().await.unwrap();
    assert_eq!(overlap.calls.load(Ordering::SeqCst), 4);
    assert_eq!(session.state(), CaptureSessionState::Closed);
    assert_eq!(overlap.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dropped_session_closes_only_under_the_guard() {
    let overlap = Arc::new(Overlap::default());
    let backend: Arc<dyn CaptureBackend> = Arc::new(SlowBackend(Arc::clone(&overlap)));
    let guard = DeviceLifecycleGuard::new(Duration::from_secs(2));
    let mut session = session(Facing::Back, &backend, &guard);
    session.open().await.unwrap();

    let held = guard.acquire(Facing::Front, "open").await.unwrap();
    drop(session);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(overlap.calls.load(Ordering::SeqCst), 1);

    drop(held);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while overlap.calls.load(Ordering::SeqCst) < 2 {
        assert!(tokio::time::Instant::now() < deadline, "dropped device never closed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(overlap.peak.load(Ordering::SeqCst), 1);
}
