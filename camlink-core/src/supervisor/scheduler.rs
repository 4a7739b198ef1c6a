//! Periodic burst trigger with a re-entrancy guard.
//!
//! At most one cycle is in flight. A tick that finds the previous cycle
//! still running is discarded, never queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
pub struct BurstScheduler {
    period: Duration,
    busy: Arc<AtomicBool>,
    fired: AtomicU64,
    skipped: AtomicU64,
}

/// Marks a cycle as in flight until dropped.
#[derive(Debug)]
pub struct BusyTicket {
    busy: Arc<AtomicBool>,
}

impl Drop for BusyTicket {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

impl BurstScheduler {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            busy: Arc::new(AtomicBool::new(false)),
            fired: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Claim the in-flight slot, or `None` if a cycle is running.
    pub fn try_begin(&self) -> Option<BusyTicket> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyTicket {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Ticks that started a cycle.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Ticks discarded because a cycle was in flight.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Handle one trigger.
    pub fn trigger(&self) -> Option<BusyTicket> {
        match self.try_begin() {
            Some(ticket) => {
                self.fired.fetch_add(1, Ordering::Relaxed);
                Some(ticket)
            }
            None => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                debug!("burst trigger discarded, cycle still in flight");
                None
            }
        }
    }

    /// Tick every `period` (first tick immediately) until `cancel` fires,
    /// handing each accepted trigger's ticket to `on_fire`.
    pub async fn run<F>(&self, cancel: &CancellationToken, mut on_fire: F)
    where
        F: FnMut(BusyTicket),
    {
        let mut tick = tokio::time::interval(self.period.max(Duration::from_millis(1)));
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    if let Some(ticket) = self.trigger() {
                        on_fire(ticket);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_trigger_discarded_while_busy() {
        let sched = BurstScheduler::new(Duration::from_secs(1));
        let first = sched.trigger().expect("first trigger fires");
        assert!(sched.is_busy());
        assert!(sched.trigger().is_none());
        assert!(sched.trigger().is_none());
        assert_eq!(sched.fired(), 1);
        assert_eq!(sched.skipped(), 2);

        drop(first);
        assert!(!sched.is_busy());
        assert!(sched.trigger().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_discards_ticks_during_long_cycle() {
        let sched = Arc::new(BurstScheduler::new(Duration::from_millis(100)));
        let cancel = CancellationToken::new();
        let in_flight = Arc::new(AtomicU64::new(0));
        let max_in_flight = Arc::new(AtomicU64::new(0));

        let runner = {
            let sched = Arc::clone(&sched);
            let cancel = cancel.clone();
            let in_flight = Arc::clone(&in_flight);
            let max_in_flight = Arc::clone(&max_in_flight);
            tokio::spawn(async move {
                sched
                    .run(&cancel, |ticket| {
                        let n = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_in_flight.fetch_max(n, Ordering::SeqCst);
                        let in_flight = Arc::clone(&in_flight);
                        tokio::spawn(async move {
                            // Each cycle outlasts three periods.
                            tokio::time::sleep(Duration::from_millis(350)).await;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            drop(ticket);
                        });
                    })
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(1000)).await;
        cancel.cancel();
        runner.await.unwrap();

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert!(sched.skipped() >= 4, "skipped = {}", sched.skipped());
        assert!(sched.fired() >= 2);
    }
}
