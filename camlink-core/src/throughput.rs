//! Rolling-window throughput accounting.
//!
//! Records `(timestamp, bytes)` samples and derives bytes/second and
//! frames/second over the most recent window. Used by the collector to
//! log stream throughput.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub struct ThroughputMeter {
    samples: VecDeque<(Instant, u64)>,
    window: Duration,
    /// Bytes currently inside the window.
    window_bytes: u64,
    total_bytes: u64,
    total_frames: u64,
}

impl ThroughputMeter {
    /// Meter with a 1-second window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(64),
            window,
            window_bytes: 0,
            total_bytes: 0,
            total_frames: 0,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        self.record_at(Instant::now(), bytes);
    }

    /// Record with an explicit timestamp (useful for testing).
    pub fn record_at(&mut self, when: Instant, bytes: u64) {
        self.samples.push_back((when, bytes));
        self.window_bytes += bytes;
        self.total_bytes += bytes;
        self.total_frames += 1;
        self.evict(when);
    }

    /// Average bytes/second over the window.
    ///
    /// The divisor is the window length, not the sample span, so a single
    /// burst does not read as an enormous rate.
    pub fn bytes_per_sec(&self) -> u64 {
        let secs = self.window.as_secs_f64();
        if secs == 0.0 {
            return 0;
        }
        (self.window_bytes as f64 / secs) as u64
    }

    /// Frames/second over the window.
    pub fn frames_per_sec(&self) -> f64 {
        let secs = self.window.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.samples.len() as f64 / secs
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    // ── Internal ─────────────────────────────────────────────────

    fn evict(&mut self, now: Instant) {
        while let Some(&(ts, bytes)) = self.samples.front() {
            if now.saturating_duration_since(ts) > self.window {
                self.samples.pop_front();
                self.window_bytes = self.window_bytes.saturating_sub(bytes);
            } else {
                break;
            }
        }
    }
}

impl Default for ThroughputMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Human-readable byte rate, e.g. `1.5 MiB/s`.
pub fn format_rate(bytes_per_sec: u64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes_per_sec as f64;
    if b >= KIB * KIB {
        format!("{:.1} MiB/s", b / (KIB * KIB))
    } else if b >= KIB {
        format!("{:.1} KiB/s", b / KIB)
    } else {
        format!("{bytes_per_sec} B/s")
    }
}

// ── Tests ────────────────────────────────────────────────────────
