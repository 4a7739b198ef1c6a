//! Per-device frame rate limiter.
//!
//! A frame arriving less than `min_interval` after the last *forwarded*
//! frame is dropped. Dropped frames do not move the reference point, so
//! a steady burst above the limit still forwards one frame per interval.

use std::time::{Duration, Instant};

/// Default minimum spacing between forwarded frames (~9.5 fps).
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(105);

/// Rate limiter owned by exactly one device stream.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    min_interval: Duration,
    last_sent: Option<Instant>,
    forwarded: u64,
    dropped: u64,
}

impl FrameThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: None,
            forwarded: 0,
            dropped: 0,
        }
    }

    /// Decide whether a frame captured at `t` is forwarded.
    ///
    /// Timestamps earlier than `last_sent` (clock jitter between capture
    /// threads) count as zero elapsed time.
    pub fn admit(&mut self, t: Instant) -> bool {
        if let Some(last) = self.last_sent
            && t.saturating_duration_since(last) < self.min_interval
        {
            self.dropped += 1;
            return false;
        }
        self.last_sent = Some(t);
        self.forwarded += 1;
        true
    }

    pub fn last_sent(&self) -> Option<Instant> {
        self.last_sent
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Forget the reference point (used when a stream is reopened).
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

impl Default for FrameThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn first_frame_always_forwarded() {
        let mut th = FrameThrottle::default();
        assert!(th.admit(Instant::now()));
        assert_eq!(th.forwarded(), 1);
    }

    #[test]
    fn drops_inside_interval_and_keeps_reference() {
        let mut th = FrameThrottle::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(th.admit(t0));
        assert!(!th.admit(t0 + Duration::from_millis(60)));
        assert_eq!(th.last_sent(), Some(t0));
        // Measured from t0, not from the dropped frame at 60ms.
        assert!(th.admit(t0 + Duration::from_millis(110)));
        assert_eq!(th.dropped(), 1);
        assert_eq!(th.forwarded(), 2);
    }

    #[test]
    fn exact_interval_is_forwarded() {
        let mut th = FrameThrottle::new(Duration::from_millis(105));
        let t0 = Instant::now();
        th.admit(t0);
        assert!(th.admit(t0 + Duration::from_millis(105)));
    }

    #[test]
    fn out_of_order_timestamp_is_dropped() {
        let mut th = FrameThrottle::new(Duration::from_millis(10));
        let t0 = Instant::now() + Duration::from_secs(1);
        th.admit(t0);
        assert!(!th.admit(t0 - Duration::from_millis(500)));
    }

    proptest! {
        #[test]
        fn gap_below_interval_never_forwards(
            interval_ms in 1u64..1_000,
            gap_frac in 0.0f64..1.0,
        ) {
            let interval = Duration::from_millis(interval_ms);
            let gap = interval.mul_f64(gap_frac);
            prop_assume!(gap < interval);

            let mut th = FrameThrottle::new(interval);
            let t1 = Instant::now();
            prop_assert!(th.admit(t1));
            prop_assert!(!th.admit(t1 + gap));
            prop_assert_eq!(th.last_sent(), Some(t1));
        }

        #[test]
        fn forwarded_frames_are_spaced(gaps in proptest::collection::vec(0u64..300, 1..64)) {
            let interval = Duration::from_millis(105);
            let mut th = FrameThrottle::new(interval);
            let mut t = Instant::now();
            let mut previous: Option<Instant> = None;
            for g in gaps {
                t += Duration::from_millis(g);
                if th.admit(t) {
                    if let Some(p) = previous {
                        prop_assert!(t - p >= interval);
                    }
                    previous = Some(t);
                }
            }
        }
    }
}
