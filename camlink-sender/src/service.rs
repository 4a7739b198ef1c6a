//! Sender service core logic.
//!
//! Runs one [`Supervisor`] for the configured mode, watches its events and
//! decides what happens after a failure: restart, exit quietly, or exit
//! with an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info};

use camlink_core::{
    CamlinkError, CaptureBackend, Facing, StartOrigin, Supervisor, SupervisorEvent,
    SyntheticBackend,
};

use crate::config::SenderConfig;

/// Why [`SenderService::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceExit {
    /// Stopped through the stop handle.
    Stopped,
    /// Retries were exhausted and restarting is disabled.
    Exhausted,
    /// Every device stopped on its own.
    Ended,
}

// ── SenderService ────────────────────────────────────────────────

pub struct SenderService {
    config: SenderConfig,
    backend: Arc<dyn CaptureBackend>,
    running: Arc<AtomicBool>,
    restarts: AtomicU32,
}

impl SenderService {
    /// Create a service capturing from the synthetic camera in `config`.
    pub fn new(config: SenderConfig) -> Self {
        let backend = Arc::new(SyntheticBackend::new(config.camera.clone()));
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: SenderConfig, backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            config,
            backend,
            running: Arc::new(AtomicBool::new(false)),
            restarts: AtomicU32::new(0),
        }
    }

    /// Handle that stops the service when set to `false`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Automatic restarts performed so far.
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Run until stopped or until the devices give up.
    ///
    /// Returns an error if the supervisor cannot start, or if an
    /// operator-started run hits a fatal device error.
    pub async fn run(&self) -> Result<ServiceExit, CamlinkError> {
        self.running.store(true, Ordering::SeqCst);
        let result = self.run_inner().await;
        self.running.store(false, Ordering::SeqCst);
        info!("sender service stopped");
        result
    }

    async fn run_inner(&self) -> Result<ServiceExit, CamlinkError> {
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut supervisor = Supervisor::new(
            self.config.to_supervisor_config(),
            Arc::clone(&self.backend),
            tx,
        );

        let mut origin = if self.config.capture.manual_start {
            StartOrigin::Operator
        } else {
            StartOrigin::AutoRestart
        };
        supervisor.start(origin)?;
        let devices = supervisor.config().facings.len();
        let mut active = devices;
        let mut exhausted = false;

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = Self::wait_for_stop(&self.running) => {
                    supervisor.shutdown().await;
                    self.log_stats(&supervisor);
                    return Ok(ServiceExit::Stopped);
                }
            };
            // The supervisor owns a sender, so the channel stays open.
            let Some(event) = event else {
                return Ok(ServiceExit::Ended);
            };

            match event {
                SupervisorEvent::StreamStarted { facing, origin } => {
                    info!(%facing, %origin, "device streaming");
                }
                SupervisorEvent::ClipDelivered {
                    facing,
                    filename,
                    bytes,
                } => {
                    info!(%facing, filename, bytes, "capture delivered");
                }
                SupervisorEvent::Fatal {
                    facing,
                    class,
                    error,
                } => {
                    error!(%facing, ?class, error, "device stopped by fatal error");
                    if origin == StartOrigin::Operator {
                        supervisor.shutdown().await;
                        self.log_stats(&supervisor);
                        return Err(CamlinkError::Other(format!("{facing} camera: {error}")));
                    }
                }
                SupervisorEvent::TerminalFailure { facing, attempts } => {
                    error!(%facing, attempts, "collector unreachable, retries exhausted");
                    if !self.config.retry.restart_on_failure {
                        exhausted = true;
                        continue;
                    }

                    supervisor.shutdown().await;
                    self.log_stats(&supervisor);
                    while events.try_recv().is_ok() {}

                    let delay = Duration::from_millis(self.config.retry.restart_delay_ms);
                    info!(?delay, "restarting supervisor");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = Self::wait_for_stop(&self.running) => return Ok(ServiceExit::Stopped),
                    }

                    origin = StartOrigin::AutoRestart;
                    supervisor.start(origin)?;
                    self.restarts.fetch_add(1, Ordering::SeqCst);
                    active = devices;
                }
                SupervisorEvent::StreamStopped { facing } => {
                    info!(%facing, "device stopped");
                    active = active.saturating_sub(1);
                    if active == 0 {
                        supervisor.join().await;
                        self.log_stats(&supervisor);
                        return Ok(if exhausted {
                            ServiceExit::Exhausted
                        } else {
                            ServiceExit::Ended
                        });
                    }
                }
            }
        }
    }

    fn log_stats(&self, supervisor: &Supervisor) {
        for facing in Facing::ALL {
            let Some(s) = supervisor.stats(facing) else {
                continue;
            };
            info!(
                %facing,
                frames = s.frames_sent,
                bytes = s.bytes_sent,
                throttled = s.throttled,
                channel_dropped = s.channel_dropped,
                send_failures = s.send_failures,
                clips = s.clips_delivered,
                clips_failed = s.clips_failed,
                "device statistics"
            );
        }
    }

    /// Resolves when `running` becomes false.
    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
