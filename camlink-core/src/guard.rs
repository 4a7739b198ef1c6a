//! Process-wide serialization of device open/close.
//!
//! Camera stacks misbehave when two devices are opened or released at the
//! same time, so every open and every close across the whole device set
//! holds the single permit of one [`DeviceLifecycleGuard`]. Acquisition is
//! timed; running out of time is fatal for that operation and surfaces as
//! [`CamlinkError::GuardTimeout`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{trace, warn};

use crate::device::Facing;
use crate::error::CamlinkError;

/// Default acquisition deadline.
pub const DEFAULT_GUARD_TIMEOUT: Duration = Duration::from_millis(2500);

/// Cloneable handle to the shared single-permit gate.
#[derive(Debug, Clone)]
pub struct DeviceLifecycleGuard {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

/// Proof of exclusive lifecycle access. Released on drop.
#[derive(Debug)]
pub struct LifecyclePermit {
    _permit: OwnedSemaphorePermit,
    facing: Facing,
    operation: &'static str,
}

impl LifecyclePermit {
    pub fn facing(&self) -> Facing {
        self.facing
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }
}

impl Drop for LifecyclePermit {
    fn drop(&mut self) {
        trace!(facing = %self.facing, operation = self.operation, "lifecycle permit released");
    }
}

impl DeviceLifecycleGuard {
    pub fn new(timeout: Duration) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait up to the configured timeout for the permit.
    pub async fn acquire(
        &self,
        facing: Facing,
        operation: &'static str,
    ) -> Result<LifecyclePermit, CamlinkError> {
        let acquire = Arc::clone(&self.permits).acquire_owned();
        match tokio::time::timeout(self.timeout, acquire).await {
            Ok(Ok(permit)) => {
                trace!(%facing, operation, "lifecycle permit acquired");
                Ok(LifecyclePermit {
                    _permit: permit,
                    facing,
                    operation,
                })
            }
            // The semaphore is never closed while a guard handle exists.
            Ok(Err(_closed)) => Err(CamlinkError::ChannelClosed),
            Err(_) => {
                warn!(%facing, operation, timeout = ?self.timeout, "lifecycle guard timed out");
                Err(CamlinkError::GuardTimeout(self.timeout))
            }
        }
    }

    /// Take the permit only if it is free right now.
    pub fn try_acquire(&self, facing: Facing, operation: &'static str) -> Option<LifecyclePermit> {
        let permit = Arc::clone(&self.permits).try_acquire_owned().ok()?;
        trace!(%facing, operation, "lifecycle permit acquired");
        Some(LifecyclePermit {
            _permit: permit,
            facing,
            operation,
        })
    }

    /// Whether some open or close currently holds the permit.
    pub fn is_held(&self) -> bool {
        self.permits.available_permits() == 0
    }
}

impl Default for DeviceLifecycleGuard {
    fn default() -> Self {
        Self::new(DEFAULT_GUARD_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permit_is_exclusive() {
        let guard = DeviceLifecycleGuard::new(Duration::from_millis(50));
        let held = guard.acquire(Facing::Back, "open").await.unwrap();
        assert!(guard.is_held());
        assert_eq!(held.operation(), "open");

        let err = guard.acquire(Facing::Front, "open").await.unwrap_err();
        assert!(matches!(err, CamlinkError::GuardTimeout(_)));

        drop(held);
        assert!(!guard.is_held());
        let again = guard.acquire(Facing::Front, "close").await.unwrap();
        assert_eq!(again.facing(), Facing::Front);
    }

    #[tokio::test]
    async fn try_acquire_never_waits() {
        let guard = DeviceLifecycleGuard::new(Duration::from_secs(5));
        let held = guard.try_acquire(Facing::Back, "open").unwrap();
        assert!(guard.try_acquire(Facing::Front, "close").is_none());
        drop(held);
        assert!(guard.try_acquire(Facing::Front, "close").is_some());
    }

    #[tokio::test]
    async fn waiter_gets_permit_after_release() {
        let guard = DeviceLifecycleGuard::new(Duration::from_secs(2));
        let held = guard.acquire(Facing::Back, "close").await.unwrap();

        let waiter = tokio::spawn({
            let guard = guard.clone();
            async move { guard.acquire(Facing::Front, "open").await.map(|p| p.facing()) }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap().unwrap(), Facing::Front);
    }
}
