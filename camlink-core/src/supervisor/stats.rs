use std::sync::atomic::{AtomicU64, Ordering};

/// Live per-device counters, shared between the capture worker and the
/// frame sender.
#[derive(Debug, Default)]
pub struct StreamStats {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    throttled: AtomicU64,
    channel_dropped: AtomicU64,
    send_failures: AtomicU64,
    clips_delivered: AtomicU64,
    clips_failed: AtomicU64,
}

/// Point-in-time copy of [`StreamStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub throttled: u64,
    pub channel_dropped: u64,
    pub send_failures: u64,
    pub clips_delivered: u64,
    pub clips_failed: u64,
}

impl StreamStats {
    pub fn record_sent(&self, bytes: usize) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_throttled(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_channel_drop(&self) {
        self.channel_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_clip(&self, delivered: bool, bytes: u64) {
        if delivered {
            self.clips_delivered.fetch_add(1, Ordering::Relaxed);
            self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
        } else {
            self.clips_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            channel_dropped: self.channel_dropped.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            clips_delivered: self.clips_delivered.load(Ordering::Relaxed),
            clips_failed: self.clips_failed.load(Ordering::Relaxed),
        }
    }
}
