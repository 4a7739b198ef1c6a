//! # camlink-core
//!
//! Capture-to-socket streaming pipeline for a front and a rear camera.
//!
//! This crate contains:
//! - **Devices**: `CaptureBackend` / `CaptureDevice` traits and the event queue
//! - **Session**: `CaptureSession` state machine (open → configure → capture → close)
//! - **Guard**: `DeviceLifecycleGuard`, the single-permit open/close gate
//! - **Throttle / Transform**: per-device rate limiting and frame orientation
//! - **Wire**: `FrameCodec` for streaming, filename + payload transfers
//! - **Transport**: `Connection` with flush-per-frame and fail-fast semantics
//! - **Supervisor**: bounded-retry connects, stream and burst workers, events
//! - **Backend**: `SyntheticBackend`, a test-pattern camera with fault injection
//! - **Error**: `CamlinkError`, a `thiserror`-based error with `ErrorClass`

pub mod backend;
pub mod clip;
pub mod device;
pub mod error;
pub mod guard;
pub mod registry;
pub mod session;
pub mod supervisor;
pub mod throttle;
pub mod throughput;
pub mod transform;
pub mod transport;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use backend::{SyntheticBackend, SyntheticConfig, SyntheticFaults};
pub use clip::{ClipFile, ClipKind};
pub use device::{
    CaptureBackend, CaptureDevice, DeviceEvent, DeviceInfo, EventSink, Facing, Frame, Resolution,
    event_queue,
};
pub use error::{CamlinkError, ErrorClass};
pub use guard::{DeviceLifecycleGuard, LifecyclePermit};
pub use registry::DeviceRegistry;
pub use session::{CaptureMode, CaptureSession, CaptureSessionState, DeviceStatus, DeviceStream, SessionStep};
pub use supervisor::{
    BurstScheduler, Connector, RetryPolicy, RetryState, StartOrigin, StatsSnapshot, Supervisor,
    SupervisorConfig, SupervisorEvent,
};
pub use throttle::FrameThrottle;
pub use throughput::ThroughputMeter;
pub use transform::FrameTransform;
pub use transport::{Connection, Endpoint};
pub use wire::{FrameCodec, TransferHeader, TransferVariant};
