//! Continuous streaming worker (one per device).

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::device::Frame;
use crate::error::{CamlinkError, ErrorClass};
use crate::session::{CaptureSession, SessionStep};
use crate::supervisor::connector::Connector;
use crate::supervisor::events::SupervisorEvent;
use crate::supervisor::retry::{RetryDecision, RetryState};
use crate::supervisor::stats::StreamStats;
use crate::supervisor::WorkerContext;
use crate::transform::FrameTransform;
use crate::transport::Connection;

/// How one connect → open → stream round ended.
enum RoundOutcome {
    /// Shutdown was requested.
    Cancelled,
    /// The round failed. `delivered` is set if any frame reached the
    /// collector before the failure.
    Failed { error: CamlinkError, delivered: bool },
}

pub(crate) async fn run_stream(
    ctx: Arc<WorkerContext>,
    mut session: CaptureSession,
    connector: Connector,
    stats: Arc<StreamStats>,
) {
    let facing = session.facing();
    let transform = FrameTransform::new(ctx.config.jpeg_quality);
    let mut retry = RetryState::new(ctx.config.retry);

    loop {
        let conn = match connector.connect(&ctx.cancel).await {
            Ok(conn) => conn,
            Err(CamlinkError::Cancelled) => break,
            Err(CamlinkError::RetriesExhausted { attempts }) => {
                ctx.emit(SupervisorEvent::TerminalFailure { facing, attempts });
                break;
            }
            Err(e) => {
                ctx.fatal(facing, &e);
                break;
            }
        };

        let outcome = run_round(&ctx, &mut session, conn, transform, &stats).await;
        if let Err(e) = session.teardown().await {
            ctx.fatal(facing, &e);
            break;
        }

        let error = match outcome {
            RoundOutcome::Cancelled => break,
            RoundOutcome::Failed { error, delivered } => {
                if delivered {
                    retry.reset();
                }
                error
            }
        };

        match error.class() {
            ErrorClass::Fatal | ErrorClass::Contention => {
                ctx.fatal(facing, &error);
                break;
            }
            ErrorClass::Transient | ErrorClass::Ignorable => match retry.record_failure() {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        %facing,
                        %error,
                        attempt = retry.attempt_count(),
                        retry_in = ?delay,
                        "stream interrupted, restarting"
                    );
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::Exhausted { attempts } => {
                    error!(%facing, %error, attempts, "stream keeps failing, giving up");
                    ctx.emit(SupervisorEvent::TerminalFailure { facing, attempts });
                    break;
                }
            },
        }
    }

    if let Err(e) = session.teardown().await {
        warn!(%facing, error = %e, "final teardown failed");
    }
    let s = stats.snapshot();
    info!(
        %facing,
        frames = s.frames_sent,
        bytes = s.bytes_sent,
        throttled = s.throttled,
        dropped = s.channel_dropped,
        "device stream stopped"
    );
    ctx.emit(SupervisorEvent::StreamStopped { facing });
}

async fn run_round(
    ctx: &WorkerContext,
    session: &mut CaptureSession,
    conn: Connection,
    transform: FrameTransform,
    stats: &Arc<StreamStats>,
) -> RoundOutcome {
    let facing = session.facing();
    if let Err(error) = session.open().await {
        return RoundOutcome::Failed {
            error,
            delivered: false,
        };
    }

    let round = ctx.cancel.child_token();
    let (tx, rx) = mpsc::channel(ctx.config.frame_queue_depth.max(1));
    let sent_before = stats.snapshot().frames_sent;
    let sender = tokio::spawn(send_frames(
        conn,
        rx,
        transform,
        round.clone(),
        Arc::clone(stats),
    ));

    let ready_timeout = ctx.config.capture_timeout;
    let ready_deadline = tokio::time::Instant::now() + ready_timeout;
    let mut ready = false;
    let mut failure = None;

    loop {
        tokio::select! {
            biased;
            _ = round.cancelled() => break,
            _ = tokio::time::sleep_until(ready_deadline), if !ready => {
                failure = Some(CamlinkError::CaptureTimeout(ready_timeout));
                break;
            }
            event = session.next_event() => {
                let Some(event) = event else {
                    failure = Some(CamlinkError::Disconnected(facing));
                    break;
                };
                match session.handle_event(event) {
                    Ok(SessionStep::Frame(frame)) => match tx.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            stats.record_channel_drop();
                            trace!(%facing, "sender busy, frame dropped");
                        }
                        Err(TrySendError::Closed(_)) => break,
                    },
                    Ok(SessionStep::Throttled) => stats.record_throttled(),
                    Ok(SessionStep::Ready) => {
                        ready = true;
                        ctx.emit(SupervisorEvent::StreamStarted {
                            facing,
                            origin: ctx.origin,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }
    }

    drop(tx);
    round.cancel();
    let sent = match sender.await {
        Ok(result) => result,
        Err(e) => Err(CamlinkError::Other(format!("frame sender task failed: {e}"))),
    };
    let delivered = stats.snapshot().frames_sent > sent_before;

    match failure.or(sent.err()) {
        Some(error) => {
            warn!(%facing, %error, delivered, "stream round ended");
            RoundOutcome::Failed { error, delivered }
        }
        None => RoundOutcome::Cancelled,
    }
}

/// Per-device sender: transform each queued frame and write it out.
///
/// The first send error cancels `round` so the capture side stops too.
async fn send_frames(
    mut conn: Connection,
    mut rx: mpsc::Receiver<Frame>,
    transform: FrameTransform,
    round: CancellationToken,
    stats: Arc<StreamStats>,
) -> Result<(), CamlinkError> {
    let result = loop {
        let frame = tokio::select! {
            biased;
            _ = round.cancelled() => break Ok(()),
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break Ok(()),
            },
        };

        let frame = match tokio::task::spawn_blocking(move || transform.apply(frame)).await {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "frame transform task failed, frame dropped");
                continue;
            }
        };

        match conn.send_frame(&frame.payload).await {
            Ok(()) => stats.record_sent(frame.len()),
            Err(e) => {
                stats.record_send_failure();
                round.cancel();
                break Err(e);
            }
        }
    };

    if let Err(e) = conn.close().await {
        debug!(endpoint = %conn.endpoint(), error = %e, "close after stream failed");
    }
    result
}
