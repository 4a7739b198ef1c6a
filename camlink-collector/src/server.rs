//! Listening side of the camlink protocols.
//!
//! Each configured listener runs its own accept loop. Stream listeners keep
//! a connection open and store every frame; photo and clip listeners
//! receive exactly one file per connection.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, trace, warn};

use camlink_core::throughput::format_rate;
use camlink_core::wire::{read_header, receive_body, sanitize_filename};
use camlink_core::{CamlinkError, FrameCodec, ThroughputMeter, TransferVariant};

use crate::config::{CollectorConfig, ListenerConfig};
use crate::storage::ReceiveDir;

// ── Stats ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CollectorStats {
    connections: AtomicU64,
    frames: AtomicU64,
    frame_bytes: AtomicU64,
    files_saved: AtomicU64,
    files_discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorSnapshot {
    pub connections: u64,
    pub frames: u64,
    pub frame_bytes: u64,
    pub files_saved: u64,
    pub files_discarded: u64,
}

impl CollectorStats {
    pub fn snapshot(&self) -> CollectorSnapshot {
        CollectorSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            frame_bytes: self.frame_bytes.load(Ordering::Relaxed),
            files_saved: self.files_saved.load(Ordering::Relaxed),
            files_discarded: self.files_discarded.load(Ordering::Relaxed),
        }
    }
}

// ── CollectorServer ──────────────────────────────────────────────

/// Shared by every connection handler.
struct Shared {
    storage: ReceiveDir,
    max_frame_bytes: usize,
    running: Arc<AtomicBool>,
    stats: Arc<CollectorStats>,
}

pub struct CollectorServer {
    listeners: Vec<(ListenerConfig, TcpListener)>,
    shared: Arc<Shared>,
}

impl CollectorServer {
    /// Bind every configured listener.
    pub async fn bind(config: &CollectorConfig) -> Result<Self, CamlinkError> {
        let mut listeners = Vec::with_capacity(config.listeners.len());
        for l in &config.listeners {
            let listener = TcpListener::bind((l.bind_address.as_str(), l.port)).await?;
            info!(
                label = l.label,
                protocol = %l.protocol,
                addr = %listener.local_addr()?,
                "listening"
            );
            listeners.push((l.clone(), listener));
        }
        Ok(Self {
            listeners,
            shared: Arc::new(Shared {
                storage: ReceiveDir::new(config.receive_dir()),
                max_frame_bytes: config.storage.max_frame_bytes,
                running: Arc::new(AtomicBool::new(false)),
                stats: Arc::new(CollectorStats::default()),
            }),
        })
    }

    /// Bound address of the listener named `label`.
    pub fn local_addr(&self, label: &str) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|(l, _)| l.label == label)
            .and_then(|(_, listener)| listener.local_addr().ok())
    }

    /// Handle that stops the server when set to `false`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shared.running)
    }

    pub fn stats(&self) -> Arc<CollectorStats> {
        Arc::clone(&self.shared.stats)
    }

    /// Serve until the stop handle is cleared.
    pub async fn run(self) {
        self.shared.running.store(true, Ordering::SeqCst);
        let mut loops = JoinSet::new();
        for (config, listener) in self.listeners {
            loops.spawn(accept_loop(config, listener, Arc::clone(&self.shared)));
        }
        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "accept loop panicked");
            }
        }
        let s = self.shared.stats.snapshot();
        info!(
            connections = s.connections,
            frames = s.frames,
            files = s.files_saved,
            discarded = s.files_discarded,
            "collector stopped"
        );
    }
}

async fn accept_loop(config: ListenerConfig, listener: TcpListener, shared: Arc<Shared>) {
    let config = Arc::new(config);
    let mut handlers = JoinSet::new();
    while shared.running.load(Ordering::SeqCst) {
        let accept = tokio::select! {
            result = listener.accept() => result,
            _ = wait_for_stop(&shared.running) => break,
        };
        let (sock, peer) = match accept {
            Ok(pair) => pair,
            Err(e) => {
                warn!(label = config.label, "accept error: {e}");
                continue;
            }
        };
        shared.stats.connections.fetch_add(1, Ordering::Relaxed);
        debug!(label = config.label, %peer, "connection accepted");

        let (config, shared) = (Arc::clone(&config), Arc::clone(&shared));
        handlers.spawn(async move {
            match config.protocol.transfer_variant() {
                None => handle_stream(sock, peer, &config.label, &shared).await,
                Some(variant) => {
                    match handle_transfer(sock, &config.label, variant, &shared).await {
                        Ok(path) => {
                            shared.stats.files_saved.fetch_add(1, Ordering::Relaxed);
                            info!(label = config.label, %peer, ?path, "transfer saved");
                        }
                        Err(e) => {
                            shared.stats.files_discarded.fetch_add(1, Ordering::Relaxed);
                            warn!(label = config.label, %peer, error = %e, "transfer discarded");
                        }
                    }
                }
            }
        });
        while handlers.try_join_next().is_some() {}
    }
    while handlers.join_next().await.is_some() {}
}

/// Store every frame of one streaming connection until it closes.
async fn handle_stream(sock: TcpStream, peer: SocketAddr, label: &str, shared: &Shared) {
    let mut frames = FramedRead::new(sock, FrameCodec::with_max_frame_size(shared.max_frame_bytes));
    let mut meter = ThroughputMeter::new();
    let mut report = tokio::time::interval(Duration::from_secs(1));
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);
    report.tick().await;
    let mut seq = 0u64;
    let mut reported = 0u64;

    info!(label, %peer, "stream connected");
    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(payload)) => {
                    meter.record(payload.len() as u64);
                    if payload.is_empty() {
                        trace!(label, "empty frame");
                    } else {
                        seq += 1;
                        match shared.storage.write_frame(label, seq, &payload).await {
                            Ok(path) => trace!(label, ?path, bytes = payload.len(), "frame stored"),
                            Err(e) => warn!(label, error = %e, "could not store frame"),
                        }
                    }
                    shared.stats.frames.fetch_add(1, Ordering::Relaxed);
                    shared.stats.frame_bytes.fetch_add(payload.len() as u64, Ordering::Relaxed);
                }
                Some(Err(e)) => {
                    warn!(label, %peer, error = %e, "dropping corrupt stream");
                    break;
                }
                None => break,
            },
            _ = report.tick() => {
                if meter.total_frames() > reported {
                    reported = meter.total_frames();
                    info!(
                        label,
                        rate = %format_rate(meter.bytes_per_sec()),
                        fps = meter.frames_per_sec(),
                        "throughput"
                    );
                }
            }
            _ = wait_for_stop(&shared.running) => break,
        }
    }
    info!(
        label,
        %peer,
        frames = meter.total_frames(),
        bytes = meter.total_bytes(),
        "stream closed"
    );
}

/// Receive one file. It only appears under its final name when complete.
async fn handle_transfer(
    mut sock: TcpStream,
    label: &str,
    variant: TransferVariant,
    shared: &Shared,
) -> Result<PathBuf, CamlinkError> {
    let header = read_header(&mut sock, variant).await?;
    let filename = sanitize_filename(&header.filename)
        .ok_or(CamlinkError::MalformedHeader("empty filename"))?;
    debug!(label, filename, size = ?header.size, "transfer started");

    let mut pending = shared.storage.begin_transfer(label, &filename).await?;
    match receive_body(&mut sock, pending.file_mut(), &header).await {
        Ok(bytes) => {
            let path = pending.commit().await?;
            debug!(label, filename, bytes, "transfer complete");
            Ok(path)
        }
        Err(e) => {
            pending.discard().await;
            Err(e)
        }
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
