//! Connection supervisor.
//!
//! Owns the capture sessions of both devices and runs them in the
//! configured [`CaptureMode`]:
//!
//! - **Stream**: one worker per device. Each worker connects with bounded
//!   retry, opens the device and forwards throttled, transformed frames to a
//!   per-device sender task over a bounded channel.
//! - **Photo / Clip**: one [`BurstScheduler`] alternates between devices;
//!   each cycle opens, captures once (or records for `clip_duration`),
//!   tears down and transfers the result on a fresh connection.
//!
//! Everything the owner needs to know arrives as [`SupervisorEvent`]s.

mod burst;
pub mod connector;
pub mod events;
pub mod retry;
pub mod scheduler;
pub mod stats;
mod stream;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::device::{CaptureBackend, Facing, Resolution};
use crate::error::CamlinkError;
use crate::guard::{DEFAULT_GUARD_TIMEOUT, DeviceLifecycleGuard};
use crate::registry::DeviceRegistry;
use crate::session::{CaptureMode, CaptureSession, DeviceStatus, DeviceStream};
use crate::throttle::{DEFAULT_MIN_INTERVAL, FrameThrottle};
use crate::transform::DEFAULT_JPEG_QUALITY;
use crate::transport::Endpoint;

pub use connector::Connector;
pub use events::{StartOrigin, SupervisorEvent};
pub use retry::{RetryDecision, RetryPolicy, RetryState};
pub use scheduler::{BurstScheduler, BusyTicket};
pub use stats::{StatsSnapshot, StreamStats};

// ── SupervisorConfig ─────────────────────────────────────────────

/// Default bound on undelivered captures left in the spool.
pub const DEFAULT_MAX_SPOOLED: usize = 16;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub mode: CaptureMode,
    /// Devices to run, in burst rotation order.
    pub facings: Vec<Facing>,
    /// Collector host shared by both devices.
    pub host: String,
    pub rear_port: u16,
    pub front_port: u16,
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
    pub min_frame_interval: Duration,
    pub target_resolution: Resolution,
    pub jpeg_quality: u8,
    /// Frames buffered between a capture worker and its sender.
    pub frame_queue_depth: usize,
    pub clip_duration: Duration,
    /// Pause between burst cycles.
    pub burst_gap: Duration,
    /// How long to wait for the device to become ready, deliver a photo,
    /// or finalize a recording.
    pub capture_timeout: Duration,
    pub guard_timeout: Duration,
    /// Local directory for burst captures awaiting transfer.
    pub spool_dir: PathBuf,
    /// Undelivered captures kept in the spool. Older ones are deleted.
    pub max_spooled: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            mode: CaptureMode::Stream,
            facings: Facing::ALL.to_vec(),
            host: "127.0.0.1".to_string(),
            rear_port: 9000,
            front_port: 9001,
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            min_frame_interval: DEFAULT_MIN_INTERVAL,
            target_resolution: Resolution::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            frame_queue_depth: 4,
            clip_duration: Duration::from_secs(5),
            burst_gap: Duration::from_secs(2),
            capture_timeout: Duration::from_secs(10),
            guard_timeout: DEFAULT_GUARD_TIMEOUT,
            spool_dir: std::env::temp_dir().join("camlink"),
            max_spooled: DEFAULT_MAX_SPOOLED,
        }
    }
}

impl SupervisorConfig {
    pub fn port_for(&self, facing: Facing) -> u16 {
        match facing {
            Facing::Back => self.rear_port,
            Facing::Front => self.front_port,
        }
    }

    /// Validated collector endpoint for `facing`.
    pub fn endpoint(&self, facing: Facing) -> Result<Endpoint, CamlinkError> {
        Endpoint::new(self.host.clone(), self.port_for(facing))
    }

    /// Time between burst triggers.
    pub fn burst_period(&self) -> Duration {
        match self.mode {
            CaptureMode::Clip => self.clip_duration + self.burst_gap,
            CaptureMode::Photo | CaptureMode::Stream => self.burst_gap,
        }
    }

    fn connector(&self, facing: Facing) -> Result<Connector, CamlinkError> {
        Ok(Connector::new(
            self.endpoint(facing)?,
            self.connect_timeout,
            self.retry,
        ))
    }
}

// ── Worker context ───────────────────────────────────────────────

/// State shared by every worker of one supervisor run.
pub(crate) struct WorkerContext {
    pub config: Arc<SupervisorConfig>,
    pub origin: StartOrigin,
    pub events: mpsc::UnboundedSender<SupervisorEvent>,
    /// Cancelled on shutdown (and by burst mode on exhaustion).
    pub cancel: CancellationToken,
}

impl WorkerContext {
    pub fn emit(&self, event: SupervisorEvent) {
        if self.events.send(event).is_err() {
            debug!("supervisor event dropped, no listener");
        }
    }

    pub fn fatal(&self, facing: Facing, error: &CamlinkError) {
        error!(%facing, %error, "device stopped on fatal error");
        self.emit(SupervisorEvent::Fatal {
            facing,
            class: error.class(),
            error: error.to_string(),
        });
    }
}

// ── Supervisor ───────────────────────────────────────────────────

struct DeviceHandle {
    status: watch::Receiver<DeviceStatus>,
    stats: Arc<StreamStats>,
}

pub struct Supervisor {
    config: Arc<SupervisorConfig>,
    backend: Arc<dyn CaptureBackend>,
    guard: DeviceLifecycleGuard,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    cancel: Option<CancellationToken>,
    devices: DeviceRegistry<DeviceHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        backend: Arc<dyn CaptureBackend>,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        let guard = DeviceLifecycleGuard::new(config.guard_timeout);
        Self {
            config: Arc::new(config),
            backend,
            guard,
            events,
            cancel: None,
            devices: DeviceRegistry::new(),
            tasks: Vec::new(),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Whether any worker is still running.
    pub fn is_running(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_finished())
    }

    /// Spawn the workers for the configured mode.
    ///
    /// Fails without starting anything if the target address is invalid
    /// or a previous run is still active.
    pub fn start(&mut self, origin: StartOrigin) -> Result<(), CamlinkError> {
        if self.is_running() {
            return Err(CamlinkError::Other("supervisor already running".into()));
        }
        self.tasks.clear();

        let mut connectors = DeviceRegistry::new();
        for &facing in &self.config.facings {
            connectors.insert(facing, self.config.connector(facing)?);
        }

        let cancel = CancellationToken::new();
        let ctx = Arc::new(WorkerContext {
            config: Arc::clone(&self.config),
            origin,
            events: self.events.clone(),
            cancel: cancel.clone(),
        });

        self.devices = DeviceRegistry::new();
        let mut sessions = Vec::new();
        for &facing in &self.config.facings {
            let stream = DeviceStream::new(
                facing,
                self.config.target_resolution,
                FrameThrottle::new(self.config.min_frame_interval),
            );
            let session = CaptureSession::new(
                stream,
                self.config.mode,
                Arc::clone(&self.backend),
                self.guard.clone(),
            );
            let stats = Arc::new(StreamStats::default());
            self.devices.insert(
                facing,
                DeviceHandle {
                    status: session.subscribe(),
                    stats: Arc::clone(&stats),
                },
            );
            sessions.push((session, stats));
        }

        match self.config.mode {
            CaptureMode::Stream => {
                for (session, stats) in sessions {
                    let Some(connector) = connectors.remove(session.facing()) else {
                        continue;
                    };
                    self.tasks.push(tokio::spawn(stream::run_stream(
                        Arc::clone(&ctx),
                        session,
                        connector,
                        stats,
                    )));
                }
            }
            CaptureMode::Photo | CaptureMode::Clip => {
                let slots = sessions
                    .into_iter()
                    .filter_map(|(session, stats)| {
                        let connector = connectors.remove(session.facing())?;
                        Some(burst::BurstSlot::new(session, connector, stats))
                    })
                    .collect();
                self.tasks
                    .push(tokio::spawn(burst::run_burst(Arc::clone(&ctx), slots)));
            }
        }

        info!(
            mode = %self.config.mode,
            %origin,
            host = %self.config.host,
            devices = self.config.facings.len(),
            "supervisor started"
        );
        self.cancel = Some(cancel);
        Ok(())
    }

    /// Latest published status of `facing`.
    pub fn status(&self, facing: Facing) -> Option<DeviceStatus> {
        self.devices
            .get(facing)
            .map(|h| h.status.borrow().clone())
    }

    /// Counters of `facing` for the current (or last) run.
    pub fn stats(&self, facing: Facing) -> Option<StatsSnapshot> {
        self.devices.get(facing).map(|h| h.stats.snapshot())
    }

    /// Wait for every worker to finish on its own.
    pub async fn join(&mut self) {
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "supervisor worker panicked");
            }
        }
    }

    /// Cancel every worker and wait until all devices are released.
    pub async fn shutdown(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.join().await;
        info!("supervisor stopped");
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}
