//! Burst worker: periodic single photos or fixed-length clips, alternating
//! between devices, each delivered on its own connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::clip::{ClipFile, ClipKind, clip_path, discard_partial, prune_spool};
use crate::device::Facing;
use crate::error::{CamlinkError, ErrorClass};
use crate::session::{CaptureMode, CaptureSession, SessionStep};
use crate::supervisor::WorkerContext;
use crate::supervisor::connector::Connector;
use crate::supervisor::events::SupervisorEvent;
use crate::supervisor::scheduler::{BurstScheduler, BusyTicket};
use crate::supervisor::stats::StreamStats;
use crate::transform::FrameTransform;

/// One device's share of the burst rotation.
#[derive(Clone)]
pub(crate) struct BurstSlot {
    facing: Facing,
    session: Arc<Mutex<CaptureSession>>,
    connector: Connector,
    stats: Arc<StreamStats>,
}

impl BurstSlot {
    pub fn new(session: CaptureSession, connector: Connector, stats: Arc<StreamStats>) -> Self {
        Self {
            facing: session.facing(),
            session: Arc::new(Mutex::new(session)),
            connector,
            stats,
        }
    }
}

pub(crate) async fn run_burst(ctx: Arc<WorkerContext>, slots: Vec<BurstSlot>) {
    if slots.is_empty() {
        warn!("burst mode without devices, nothing to do");
        return;
    }

    let scheduler = BurstScheduler::new(ctx.config.burst_period());
    for slot in &slots {
        ctx.emit(SupervisorEvent::StreamStarted {
            facing: slot.facing,
            origin: ctx.origin,
        });
    }
    info!(
        mode = %ctx.config.mode,
        period = ?scheduler.period(),
        "burst scheduler running"
    );

    let mut next = 0usize;
    let mut cycles = JoinSet::new();
    scheduler
        .run(&ctx.cancel, |ticket| {
            while cycles.try_join_next().is_some() {}
            let slot = slots[next % slots.len()].clone();
            next = next.wrapping_add(1);
            cycles.spawn(run_cycle(Arc::clone(&ctx), slot, ticket));
        })
        .await;

    while let Some(joined) = cycles.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "burst cycle panicked");
        }
    }

    for slot in &slots {
        if let Err(e) = slot.session.lock().await.teardown().await {
            warn!(facing = %slot.facing, error = %e, "final teardown failed");
        }
        let s = slot.stats.snapshot();
        info!(
            facing = %slot.facing,
            delivered = s.clips_delivered,
            failed = s.clips_failed,
            bytes = s.bytes_sent,
            "burst device stopped"
        );
        ctx.emit(SupervisorEvent::StreamStopped { facing: slot.facing });
    }
    info!(
        fired = scheduler.fired(),
        skipped = scheduler.skipped(),
        "burst scheduler stopped"
    );
}

/// One capture-and-deliver cycle. Holds `ticket` until the transfer ends.
///
/// A cycle that fails before producing a capture removes whatever part of
/// its recording reached the spool.
async fn run_cycle(ctx: Arc<WorkerContext>, slot: BurstSlot, ticket: BusyTicket) {
    let facing = slot.facing;
    let started_at = Local::now();
    let recording = (ctx.config.mode == CaptureMode::Clip)
        .then(|| clip_path(&ctx.config.spool_dir, facing, ClipKind::Video, started_at));

    let (captured, released) = {
        let mut session = slot.session.lock().await;
        let result = capture(&ctx, &mut session, recording.as_deref(), started_at).await;
        let released = session.teardown().await;
        if result.is_err() || released.is_err() {
            session.mark_failed();
        }
        (result, released)
    };

    if let Err(e) = released {
        error!(%facing, error = %e, "device release failed after burst capture");
        cycle_failed(&ctx, facing, e);
    }
    match captured {
        Ok(clip) => deliver(&ctx, &slot, clip).await,
        Err(e) => {
            if let Some(path) = &recording {
                discard_partial(path).await;
            }
            if !matches!(e, CamlinkError::Cancelled) {
                cycle_failed(&ctx, facing, e);
            }
        }
    }
    drop(ticket);
}

fn cycle_failed(ctx: &WorkerContext, facing: Facing, error: CamlinkError) {
    match (&error, error.class()) {
        // Hardware faults and disconnects only cost this cycle.
        (CamlinkError::Device(_), _) | (_, ErrorClass::Transient) => {
            warn!(%facing, %error, "burst cycle failed, advancing");
        }
        (_, ErrorClass::Contention) => {
            error!(%facing, %error, "burst cycle abandoned, device busy");
        }
        (_, ErrorClass::Fatal) => {
            ctx.fatal(facing, &error);
            ctx.cancel.cancel();
        }
        (_, ErrorClass::Ignorable) => {
            warn!(%facing, %error, "burst cycle produced nothing");
        }
    }
}

async fn capture(
    ctx: &WorkerContext,
    session: &mut CaptureSession,
    recording: Option<&Path>,
    started_at: DateTime<Local>,
) -> Result<ClipFile, CamlinkError> {
    let facing = session.facing();
    let spool = &ctx.config.spool_dir;
    let timeout = ctx.config.capture_timeout;

    match session.mode() {
        CaptureMode::Photo => {
            session.open().await?;
            let frame = wait_for(ctx, session, timeout, |step| match step {
                SessionStep::Frame(frame) => Some(frame),
                _ => None,
            })
            .await?;

            let transform = FrameTransform::new(ctx.config.jpeg_quality);
            let frame = tokio::task::spawn_blocking(move || transform.apply(frame))
                .await
                .map_err(|e| CamlinkError::Other(format!("frame transform task failed: {e}")))?;
            ClipFile::write_photo(spool, facing, &frame.payload).await
        }
        CaptureMode::Clip => {
            let path = recording.ok_or_else(|| {
                CamlinkError::Configuration("clip cycle without a recording path".into())
            })?;
            tokio::fs::create_dir_all(spool)
                .await
                .map_err(|e| CamlinkError::file(spool, e))?;
            session.open_recording(path.to_path_buf()).await?;

            wait_for(ctx, session, timeout, |step| match step {
                SessionStep::Ready => Some(()),
                _ => None,
            })
            .await?;

            let duration = ctx.config.clip_duration;
            record_for(ctx, session, duration).await?;
            session.stop_recording()?;

            let finished: PathBuf = wait_for(ctx, session, timeout, |step| match step {
                SessionStep::ClipFinished(path) => Some(path),
                _ => None,
            })
            .await?;
            ClipFile::from_recording(finished, facing, started_at, duration).await
        }
        CaptureMode::Stream => Err(CamlinkError::Configuration(
            "stream mode has no burst cycle".into(),
        )),
    }
}

/// Drain device events until `pick` accepts a step.
async fn wait_for<T>(
    ctx: &WorkerContext,
    session: &mut CaptureSession,
    timeout: Duration,
    mut pick: impl FnMut(SessionStep) -> Option<T>,
) -> Result<T, CamlinkError> {
    let facing = session.facing();
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let event = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(CamlinkError::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Err(CamlinkError::CaptureTimeout(timeout)),
            event = session.next_event() => event.ok_or(CamlinkError::Disconnected(facing))?,
        };
        if let Some(value) = pick(session.handle_event(event)?) {
            return Ok(value);
        }
    }
}

/// Keep the recording running for `duration`, surfacing device failures.
async fn record_for(
    ctx: &WorkerContext,
    session: &mut CaptureSession,
    duration: Duration,
) -> Result<(), CamlinkError> {
    let facing = session.facing();
    let until = tokio::time::Instant::now() + duration;
    loop {
        let event = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(CamlinkError::Cancelled),
            _ = tokio::time::sleep_until(until) => return Ok(()),
            event = session.next_event() => event.ok_or(CamlinkError::Disconnected(facing))?,
        };
        session.handle_event(event)?;
    }
}

/// Transfer `clip` once. Removed on success, kept on disk otherwise,
/// within the spool bound.
async fn deliver(ctx: &WorkerContext, slot: &BurstSlot, clip: ClipFile) {
    let facing = slot.facing;
    let filename = clip.filename();

    let result = async {
        let mut conn = slot.connector.connect(&ctx.cancel).await?;
        let bytes = conn.send_file(&clip.path, &filename, clip.variant()).await?;
        conn.close().await?;
        Ok::<_, CamlinkError>(bytes)
    }
    .await;

    match result {
        Ok(bytes) => {
            info!(%facing, filename, bytes, "capture delivered");
            slot.stats.record_clip(true, bytes);
            ctx.emit(SupervisorEvent::ClipDelivered {
                facing,
                filename,
                bytes,
            });
            clip.remove().await;
        }
        Err(CamlinkError::RetriesExhausted { attempts }) => {
            slot.stats.record_clip(false, 0);
            error!(%facing, path = ?clip.path, attempts, "collector unreachable, capture kept on disk");
            ctx.emit(SupervisorEvent::TerminalFailure { facing, attempts });
            ctx.cancel.cancel();
            bound_spool(ctx).await;
        }
        Err(CamlinkError::Cancelled) => {
            slot.stats.record_clip(false, 0);
            info!(%facing, path = ?clip.path, "delivery cancelled, capture kept on disk");
            bound_spool(ctx).await;
        }
        Err(e) => {
            slot.stats.record_clip(false, 0);
            warn!(%facing, path = ?clip.path, error = %e, "delivery failed, capture kept on disk");
            bound_spool(ctx).await;
        }
    }
}

async fn bound_spool(ctx: &WorkerContext) {
    let spool = &ctx.config.spool_dir;
    match prune_spool(spool, ctx.config.max_spooled).await {
        Ok(0) => {}
        Ok(removed) => warn!(removed, keep = ctx.config.max_spooled, "spool full, oldest captures deleted"),
        Err(e) => warn!(error = %e, "could not prune spool"),
    }
}
