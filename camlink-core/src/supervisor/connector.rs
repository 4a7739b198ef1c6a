use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{CamlinkError, ErrorClass};
use crate::supervisor::retry::{RetryDecision, RetryPolicy, RetryState};
use crate::transport::{Connection, Endpoint};

/// Connects to one endpoint with a timeout per attempt and bounded retry.
#[derive(Debug, Clone)]
pub struct Connector {
    endpoint: Endpoint,
    timeout: Duration,
    policy: RetryPolicy,
}

impl Connector {
    pub fn new(endpoint: Endpoint, timeout: Duration, policy: RetryPolicy) -> Self {
        Self {
            endpoint,
            timeout,
            policy,
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Run one connection-establishment episode.
    ///
    /// Transient failures are retried after the policy's backoff. Fails
    /// with [`CamlinkError::RetriesExhausted`] once `max_attempts`
    /// consecutive attempts failed, or [`CamlinkError::Cancelled`] as soon
    /// as `cancel` fires. Non-transient errors are returned immediately.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<Connection, CamlinkError> {
        let mut retry = RetryState::new(self.policy);
        loop {
            let attempt = retry.attempt_count() + 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(CamlinkError::Cancelled),
                r = Connection::connect(&self.endpoint, self.timeout) => r,
            };

            let err = match result {
                Ok(conn) => {
                    if attempt > 1 {
                        info!(endpoint = %self.endpoint, attempt, "connected after retry");
                    }
                    return Ok(conn);
                }
                Err(e) if e.class() != ErrorClass::Transient => return Err(e),
                Err(e) => e,
            };

            match retry.record_failure() {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        endpoint = %self.endpoint,
                        attempt,
                        max = retry.max_attempts(),
                        error = %err,
                        retry_in = ?delay,
                        "connect failed"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(CamlinkError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::Exhausted { attempts } => {
                    error!(endpoint = %self.endpoint, attempts, error = %err, "giving up on collector");
                    return Err(CamlinkError::RetriesExhausted { attempts });
                }
            }
        }
    }
}
